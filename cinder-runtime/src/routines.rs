//! Callback routines wired into a runtime exactly once.
//!
//! Each routine can be set a single time per runtime, either by the host or by
//! a script through the `set-*-routine` natives. Later registrations are
//! ignored so that idempotent initialisation code cannot replace a live
//! routine.

use std::{cell::OnceCell, rc::Rc};

use cinder_lang::runtime::{
    RuntimeError,
    vm::{FrameInfo, Machine, Value},
};

/// Runs one bookmark token. The flag tells whether the profiler is active.
pub type TickRoutine = Rc<dyn Fn(&mut Machine, u64, bool) -> Result<(), RuntimeError>>;
/// `(event name, packed payload, source)`.
pub type EventRoutine = Rc<dyn Fn(&mut Machine, &str, &[u8], &str) -> Result<(), RuntimeError>>;
pub type CallRefRoutine = Rc<dyn Fn(&mut Machine, i32, &[u8]) -> Result<Vec<u8>, RuntimeError>>;
pub type DuplicateRefRoutine = Rc<dyn Fn(&mut Machine, i32) -> Result<i32, RuntimeError>>;
pub type DeleteRefRoutine = Rc<dyn Fn(&mut Machine, i32) -> Result<(), RuntimeError>>;
/// Frames `start..end` of the running stack, innermost first.
pub type StackTraceRoutine =
    Rc<dyn Fn(&mut Machine, usize, usize) -> Result<Vec<FrameInfo>, RuntimeError>>;
pub type ResultAsObjectRoutine = Rc<dyn Fn(&mut Machine, &[u8]) -> Result<Value, RuntimeError>>;

#[derive(Default)]
pub struct Routines {
    tick: OnceCell<TickRoutine>,
    event: OnceCell<EventRoutine>,
    call_ref: OnceCell<CallRefRoutine>,
    duplicate_ref: OnceCell<DuplicateRefRoutine>,
    delete_ref: OnceCell<DeleteRefRoutine>,
    stack_trace: OnceCell<StackTraceRoutine>,
    result_as_object: OnceCell<ResultAsObjectRoutine>,
}

fn set_once<T>(cell: &OnceCell<T>, routine: T, what: &str) -> bool {
    match cell.set(routine) {
        Ok(()) => true,
        Err(_) => {
            log::debug!("{what} routine is already set; ignoring");
            false
        }
    }
}

impl Routines {
    pub fn set_tick(&self, r: TickRoutine) -> bool {
        set_once(&self.tick, r, "tick")
    }
    pub fn set_event(&self, r: EventRoutine) -> bool {
        set_once(&self.event, r, "event")
    }
    pub fn set_call_ref(&self, r: CallRefRoutine) -> bool {
        set_once(&self.call_ref, r, "call-ref")
    }
    pub fn set_duplicate_ref(&self, r: DuplicateRefRoutine) -> bool {
        set_once(&self.duplicate_ref, r, "duplicate-ref")
    }
    pub fn set_delete_ref(&self, r: DeleteRefRoutine) -> bool {
        set_once(&self.delete_ref, r, "delete-ref")
    }
    pub fn set_stack_trace(&self, r: StackTraceRoutine) -> bool {
        set_once(&self.stack_trace, r, "stack-trace")
    }
    pub fn set_result_as_object(&self, r: ResultAsObjectRoutine) -> bool {
        set_once(&self.result_as_object, r, "result-as-object")
    }

    pub fn tick(&self) -> Option<TickRoutine> {
        self.tick.get().cloned()
    }
    pub fn event(&self) -> Option<EventRoutine> {
        self.event.get().cloned()
    }
    pub fn call_ref(&self) -> Option<CallRefRoutine> {
        self.call_ref.get().cloned()
    }
    pub fn duplicate_ref(&self) -> Option<DuplicateRefRoutine> {
        self.duplicate_ref.get().cloned()
    }
    pub fn delete_ref(&self) -> Option<DeleteRefRoutine> {
        self.delete_ref.get().cloned()
    }
    pub fn stack_trace(&self) -> Option<StackTraceRoutine> {
        self.stack_trace.get().cloned()
    }
    pub fn result_as_object(&self) -> Option<ResultAsObjectRoutine> {
        self.result_as_object.get().cloned()
    }
}
