use std::rc::Rc;

use super::{DebugEventListener, ScriptHost, StackWalkVisitor};
use crate::{bridge::ScriptRef, error::Result};

pub trait Runtime {
    /// Attach the host, install the script library and run the system scripts.
    fn create(&self, host: Rc<dyn ScriptHost>) -> Result<()>;
    /// Tear everything down. Later operations fail with `NotActive`.
    fn destroy(&self) -> Result<()>;
    fn instance_id(&self) -> i32;
    fn parent_object(&self) -> Option<Rc<dyn std::any::Any>>;
    fn set_parent_object(&self, parent: Option<Rc<dyn std::any::Any>>);
}

pub trait FileHandlingRuntime {
    fn handles_file(&self, name: &str) -> bool;
    fn load_file(&self, name: &str) -> Result<()>;
}

pub trait TickRuntimeWithBookmarks {
    /// Service every bookmark due at `now_ms`.
    fn tick(&self, now_ms: u64) -> Result<()>;
    /// Run the given tokens now, in order, regardless of their deadlines.
    fn tick_bookmarks(&self, tokens: &[u64]) -> Result<()>;
}

pub trait EventRuntime {
    fn trigger_event(&self, name: &str, payload: &[u8], source: &str) -> Result<()>;
}

pub trait RefRuntime {
    fn call_ref(&self, id: ScriptRef, payload: &[u8]) -> Result<Vec<u8>>;
    fn duplicate_ref(&self, id: ScriptRef) -> Result<ScriptRef>;
    fn remove_ref(&self, id: ScriptRef) -> Result<()>;
}

pub trait MemInfoRuntime {
    /// Run a full collection so the next reading is exact.
    fn request_memory_usage(&self) -> Result<()>;
    fn memory_usage(&self) -> Result<usize>;
}

pub trait StackWalkingRuntime {
    /// Submit frames `start..end` of the running stack, innermost first.
    fn walk_stack(&self, start: usize, end: usize, visitor: &mut dyn StackWalkVisitor)
    -> Result<()>;
}

pub trait DebugRuntime {
    fn set_debug_event_listener(&self, listener: Option<Rc<dyn DebugEventListener>>);
}

pub trait Profiler {
    /// Begin or end a profiling session. Returns whether the requested state holds.
    fn profiler_tick(&self, begin: bool) -> bool;
}

pub trait WarningRuntime {
    fn emit_warning(&self, channel: &str, message: &str);
}
