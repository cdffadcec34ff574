//! The stack of runtimes currently executing on this thread.
//!
//! Every operation that enters a machine pushes its runtime through a
//! [`RuntimeScope`], so natives invoked deep inside the machine can find the
//! runtime (and its host) that is driving them. The scope pops on every exit
//! path, including unwinding.

use std::{cell::RefCell, marker::PhantomData, rc::Rc};

use crate::runtime::RuntimeInner;

thread_local! {
    static CURRENT: RefCell<Vec<Rc<RuntimeInner>>> = const { RefCell::new(Vec::new()) };
}

/// Marks a runtime as current until dropped.
#[must_use = "the runtime is only current while the scope is alive"]
pub struct RuntimeScope {
    depth: usize,
    _not_send: PhantomData<Rc<()>>,
}

impl RuntimeScope {
    pub(crate) fn enter(inner: &Rc<RuntimeInner>) -> Self {
        let depth = CURRENT.with_borrow_mut(|stack| {
            stack.push(inner.clone());
            stack.len()
        });
        Self {
            depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for RuntimeScope {
    fn drop(&mut self) {
        CURRENT.with_borrow_mut(|stack| {
            if stack.len() != self.depth {
                log::error!(
                    "runtime scopes unbalanced: expected depth {}, found {}",
                    self.depth,
                    stack.len()
                );
            }
            stack.truncate(self.depth - 1);
        });
    }
}

pub(crate) fn current() -> Option<Rc<RuntimeInner>> {
    CURRENT.with_borrow(|stack| stack.last().cloned())
}

/// Number of runtime scopes active on this thread.
pub fn depth() -> usize {
    CURRENT.with_borrow(|stack| stack.len())
}
