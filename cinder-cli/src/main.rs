//! Command line interface for cinder.
//!
//! Runs one script inside a [`ScriptRuntime`](cinder_runtime::ScriptRuntime)
//! hosted on the file system, ticking it until no bookmark is left or the
//! requested number of frames has passed.

use clap::Parser;
use cinder_cli::{Args, RunOptions, check_file, run_file};
use cinder_lang::log;
use cinder_lang::utils::fileloader;

#[cfg(not(target_arch = "wasm32"))]
use mimalloc::MiMalloc;
#[cfg(not(target_arch = "wasm32"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if cfg!(debug_assertions) | cfg!(test) {
        colog::default_builder()
            .filter_level(log::LevelFilter::Trace)
            .init();
    } else {
        colog::default_builder().init();
    }

    let args = Args::parse();
    let fullpath = fileloader::get_canonical_path(".", &args.file)?;
    let options = RunOptions::from_args(&args);
    if options.check_only {
        return check_file(&fullpath).map_err(|n| format!("{n} error(s) in {}", args.file).into());
    }
    match run_file(&options, &fullpath) {
        Ok(summary) => {
            log::info!(
                "{} ran for {} ms, {} bookmark(s) left",
                args.file,
                summary.elapsed_ms,
                summary.pending
            );
            for (name, count) in &summary.calls {
                println!("{count:>8}  {name}");
            }
            Ok(())
        }
        Err(e) => {
            if let cinder_runtime::Error::Load { .. } = e {
                // the runtime only keeps the plain text; print the rich report
                let _ = check_file(&fullpath);
            }
            Err(format!("Failed to process {}: {e}", args.file).into())
        }
    }
}
