use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    rc::Rc,
};

use clap::ValueEnum;
use cinder_lang::{
    compiler,
    runtime::{
        alloc::AllocatorKind,
        vm::{FrameInfo, GcMode, GcPolicy},
    },
    utils::{error::report, fileloader},
};
use cinder_runtime::{
    Error, RuntimeConfig, ScriptRuntime,
    host::*,
    profiler::{ProfilerSink, ProfilingMode},
};

#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Script to run. Its directory becomes the resource root.
    #[clap(value_parser)]
    pub file: String,

    /// Compile the script, report errors and exit
    #[arg(long, default_value_t = false)]
    pub check: bool,

    /// Stop after this many frames even if bookmarks are still pending.
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Length of one frame in milliseconds
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,

    /// Count calls while running and print them at exit
    #[arg(long, default_value_t = false)]
    pub profile: bool,

    /// Directory searched for `system:/` scripts before the embedded ones
    #[arg(long)]
    pub system_dir: Option<PathBuf>,

    /// Directory holding natives_<build>.json files
    #[arg(long)]
    pub natives_dir: Option<PathBuf>,

    #[arg(long, requires = "natives_dir")]
    pub natives_build: Option<String>,

    /// Fail allocations once this many bytes are in use
    #[arg(long)]
    pub memory_limit: Option<usize>,

    #[arg(long, value_enum, default_value_t = Gc::Generational)]
    pub gc: Gc,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Gc {
    Incremental,
    Generational,
}

impl Args {
    pub fn to_runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig {
            system_dir: self.system_dir.clone(),
            natives_dir: self.natives_dir.clone(),
            natives_build: self.natives_build.clone(),
            ..Default::default()
        };
        config.lang.vm.gc = GcPolicy {
            mode: match self.gc {
                Gc::Incremental => GcMode::Incremental,
                Gc::Generational => GcMode::Generational,
            },
            ..Default::default()
        };
        if let Some(limit) = self.memory_limit {
            config.lang.vm.allocator = AllocatorKind::Budget(limit);
        }
        config
    }
}

/// Execution options derived from CLI arguments.
pub struct RunOptions {
    pub check_only: bool,
    pub ticks: Option<u64>,
    pub tick_ms: u64,
    pub profile: bool,
    pub config: RuntimeConfig,
}

impl RunOptions {
    pub fn from_args(args: &Args) -> Self {
        Self {
            check_only: args.check,
            ticks: args.ticks,
            tick_ms: args.tick_ms.max(1),
            profile: args.profile,
            config: args.to_runtime_config(),
        }
    }
}

/// Counts calls per function name while a session is active.
#[derive(Default)]
pub struct CallCounter {
    counts: RefCell<BTreeMap<String, u64>>,
}

impl ProfilerSink for CallCounter {
    fn register_timeline(&self, name: &str) -> Option<u32> {
        log::info!("profiling {name}");
        Some(0)
    }
    fn enter_scope(&self, _timeline: u32, frame: &FrameInfo) {
        *self.counts.borrow_mut().entry(frame.name.clone()).or_default() += 1;
    }
    fn exit_scope(&self, _timeline: u32) {}
    fn mode_changed(&self, mode: ProfilingMode) {
        log::debug!("profiler is now {mode:?}");
    }
}

/// Serves the files of one directory and prints traces to stdout.
pub struct FsHost {
    root: PathBuf,
    resource: String,
    counter: Option<Rc<CallCounter>>,
}

impl FsHost {
    pub fn new(root: PathBuf, profile: bool) -> Self {
        let resource = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cinder".to_string());
        Self {
            root,
            resource,
            counter: profile.then(Rc::default),
        }
    }

    /// Most called first.
    pub fn call_counts(&self) -> Vec<(String, u64)> {
        let mut counts = self
            .counter
            .as_ref()
            .map(|c| c.counts.borrow().clone().into_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }
}

impl ScriptHost for FsHost {
    fn open_host_file(&self, name: &str) -> io::Result<Box<dyn Read>> {
        let path = fileloader::resolve_under(&self.root, name)
            .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
        Ok(Box::new(File::open(path)?))
    }

    fn resource_name(&self) -> String {
        self.resource.clone()
    }

    fn trace(&self, message: &str) {
        println!("{message}");
    }

    fn profiler(&self) -> Option<Rc<dyn ProfilerSink>> {
        self.counter
            .clone()
            .map(|c| c as Rc<dyn ProfilerSink>)
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// Simulated time when the run stopped.
    pub elapsed_ms: u64,
    pub pending: usize,
    pub calls: Vec<(String, u64)>,
}

/// Compile `path` without running it. Errors are reported to stderr and counted.
pub fn check_file(path: &Path) -> Result<(), usize> {
    let content = fileloader::load(&path.to_string_lossy()).map_err(|e| {
        log::error!("{e}");
        1usize
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    compiler::compile(&content, &name).map(|_| ()).map_err(|errs| {
        report(&content, &path.display().to_string(), &errs);
        errs.len()
    })
}

fn drive(rt: &ScriptRuntime, options: &RunOptions, name: &str) -> Result<RunSummary, Error> {
    rt.load_file(name)?;
    let mut now = 0;
    let mut frames = 0;
    while rt.pending_bookmarks() > 0 && options.ticks.is_none_or(|max| frames < max) {
        now += options.tick_ms;
        frames += 1;
        rt.tick(now)?;
    }
    Ok(RunSummary {
        elapsed_ms: now,
        pending: rt.pending_bookmarks(),
        calls: vec![],
    })
}

/// Create a runtime for the directory of `path`, run the script and tear it down.
pub fn run_file(options: &RunOptions, path: &Path) -> Result<RunSummary, Error> {
    let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let host = Rc::new(FsHost::new(root, options.profile));
    let rt = ScriptRuntime::new(options.config.clone())?;
    rt.create(host.clone())?;
    if options.profile && !rt.profiler_tick(true) {
        log::warn!("profiling could not be started");
    }

    let result = drive(&rt, options, &name);
    if rt.is_profiling() {
        rt.profiler_tick(false);
    }
    let destroyed = rt.destroy();
    let summary = result?;
    destroyed?;
    Ok(RunSummary {
        calls: host.call_counts(),
        ..summary
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    fn options(extra: &[&str]) -> RunOptions {
        let args = Args::parse_from(["cinder", "main.cin"].iter().chain(extra));
        RunOptions::from_args(&args)
    }

    #[test]
    fn runs_until_nothing_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.cin");
        std::fs::write(
            &path,
            "(define n 0)\n(defn step () (set! n (+ n 1)) (if (< n 3) (set-timeout 10 step)))\n(step)",
        )
        .unwrap();
        let summary = run_file(&options(&["--tick-ms", "10"]), &path).unwrap();
        assert_eq!(summary.elapsed_ms, 20);
        assert_eq!(summary.pending, 0);
    }

    #[test]
    fn tick_limit_stops_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.cin");
        std::fs::write(&path, "(defn tick () 1)\n(set-interval 16 tick)").unwrap();
        let summary = run_file(&options(&["--ticks", "5", "--profile"]), &path).unwrap();
        assert_eq!(summary.elapsed_ms, 80);
        assert_eq!(summary.pending, 1);
        assert!(summary.calls.iter().any(|(name, n)| name == "tick" && *n == 5));
    }

    #[test]
    fn files_stay_inside_the_resource() {
        let dir = tempfile::tempdir().unwrap();
        let host = FsHost::new(dir.path().to_path_buf(), false);
        assert!(host.open_host_file("../secret.cin").is_err());
        assert!(host.open_host_file("missing.cin").is_err());
        std::fs::write(dir.path().join("a.cin"), "1").unwrap();
        assert!(host.open_host_file("a.cin").is_ok());
    }

    #[test]
    fn config_from_flags() {
        let opts = options(&["--memory-limit", "4096", "--gc", "incremental"]);
        assert_eq!(opts.config.lang.vm.allocator, AllocatorKind::Budget(4096));
        assert_eq!(opts.config.lang.vm.gc.mode, GcMode::Incremental);
        assert!(check_file(Path::new("/nonexistent/main.cin")).is_err());
    }
}
