//! Embedding layer for the cinder machine.
//!
//! A [`ScriptRuntime`] owns exactly one [`Machine`](cinder_lang::runtime::vm::Machine)
//! and exposes it to a host application through the capability traits in
//! [`host`]. The host implements [`host::ScriptHost`] to provide files, natives,
//! tracing and an optional profiler.
//!
//! ```no_run
//! use std::rc::Rc;
//! use cinder_runtime::{ScriptRuntime, RuntimeConfig, host::*};
//!
//! # fn host() -> Rc<dyn ScriptHost> { unimplemented!() }
//! let rt = ScriptRuntime::new(RuntimeConfig::default())?;
//! rt.create(host())?;
//! rt.load_file("main.cin")?;
//! rt.tick(16)?;
//! rt.destroy()?;
//! # Ok::<(), cinder_runtime::Error>(())
//! ```

pub mod bookmark;
pub mod bridge;
pub mod current;
pub mod error;
pub mod host;
pub mod loader;
pub mod natives;
pub mod payload;
pub mod profiler;
pub mod routines;
pub mod runtime;
mod scriptlib;
pub mod state;

pub use cinder_lang;
pub use error::{Error, Result};
pub use runtime::{RuntimeConfig, ScriptRuntime};
