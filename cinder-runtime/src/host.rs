//! Contracts between a runtime and the application hosting it.
//!
//! The host implements [`ScriptHost`] (and optionally the smaller traits it
//! hands out). The runtime side is described by the capability traits in
//! [`capabilities`], all of which [`ScriptRuntime`](crate::ScriptRuntime)
//! implements.

use std::{io::Read, rc::Rc};

use cinder_lang::runtime::vm::{FrameInfo, Machine};

use crate::{ScriptRuntime, bridge::ScriptRef, error::Result, payload::Payload, profiler::ProfilerSink};

pub mod capabilities;
pub use capabilities::*;

/// Arguments and environment of one native invocation.
pub struct NativeContext<'a> {
    pub args: Vec<Payload>,
    pub machine: &'a mut Machine,
    pub runtime: &'a ScriptRuntime,
}

impl NativeContext<'_> {
    /// Call back into a script reference from inside a native.
    pub fn call_ref(&mut self, id: ScriptRef, args: &[Payload]) -> Result<Vec<Payload>> {
        let packed = Payload::pack(args)?;
        let out = self.runtime.call_ref_in(self.machine, id, &packed)?;
        Payload::unpack(&out)
    }
}

pub type NativeHandler = Rc<dyn Fn(&mut NativeContext) -> std::result::Result<Payload, String>>;

pub fn native_handler(
    f: impl Fn(&mut NativeContext) -> std::result::Result<Payload, String> + 'static,
) -> NativeHandler {
    Rc::new(f)
}

/// Native dispatch table, keyed by 64-bit hash.
pub trait NativeTable {
    fn get_native(&self, hash: u64) -> Option<NativeHandler>;
}

/// Receives deadlines of newly scheduled bookmarks.
pub trait BookmarkHost {
    fn schedule_bookmark(&self, runtime_id: i32, token: u64, deadline_ms: u64);
    fn remove_bookmarks(&self, _runtime_id: i32) {}
}

pub trait DebugEventListener {
    fn on_script_loaded(&self, _name: &str, _load_id: u32) {}
    fn on_script_error(&self, _script: &str, _message: &str) {}
}

pub trait StackWalkVisitor {
    fn submit_frame(&mut self, frame: &FrameInfo);
}

/// The application a runtime lives in.
pub trait ScriptHost {
    /// Open a resource file for reading.
    fn open_host_file(&self, name: &str) -> std::io::Result<Box<dyn Read>>;

    fn resource_name(&self) -> String {
        String::new()
    }

    /// Sink for `print` output and script error reports.
    fn trace(&self, message: &str) {
        log::info!("{message}");
    }

    fn native_table(&self) -> Option<Rc<dyn NativeTable>> {
        None
    }

    fn profiler(&self) -> Option<Rc<dyn ProfilerSink>> {
        None
    }

    fn bookmark_host(&self) -> Option<Rc<dyn BookmarkHost>> {
        None
    }
}
