//! Allocator contexts used for the machine's memory accounting.
//!
//! The machine reports every collectable allocation and free to its context.
//! A context outlives the machine's teardown: the owner must call
//! [`AllocatorContext::release`] only after [`Machine::close`](super::vm::Machine::close)
//! returned, since closing reports the frees of everything still alive.

use std::{cell::RefCell, rc::Rc};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("allocation of {requested} bytes exceeds the limit of {limit} bytes ({in_use} in use)")]
pub struct AllocError {
    pub requested: usize,
    pub in_use: usize,
    pub limit: usize,
}

pub trait AllocatorContext {
    fn allocate(&mut self, bytes: usize) -> Result<(), AllocError>;
    fn deallocate(&mut self, bytes: usize);
    fn in_use(&self) -> usize;
    fn peak(&self) -> usize;
    /// Dispose the context. Called once, after the owning machine was closed.
    fn release(&mut self);
    fn is_released(&self) -> bool;
}

/// Selects the allocator context created for a new machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    /// Unlimited, accounting only.
    #[default]
    System,
    /// Fails allocations once the given number of bytes is in use.
    Budget(usize),
}

impl AllocatorKind {
    /// The context is shared between the machine and its owner, which releases it.
    pub fn create(self) -> Rc<RefCell<dyn AllocatorContext>> {
        match self {
            AllocatorKind::System => Rc::new(RefCell::new(SystemAllocator::default())),
            AllocatorKind::Budget(limit) => Rc::new(RefCell::new(BudgetAllocator::new(limit))),
        }
    }
}

#[derive(Debug, Default)]
pub struct SystemAllocator {
    in_use: usize,
    peak: usize,
    released: bool,
}

impl AllocatorContext for SystemAllocator {
    fn allocate(&mut self, bytes: usize) -> Result<(), AllocError> {
        self.in_use += bytes;
        self.peak = self.peak.max(self.in_use);
        Ok(())
    }
    fn deallocate(&mut self, bytes: usize) {
        self.in_use = self.in_use.saturating_sub(bytes);
    }
    fn in_use(&self) -> usize {
        self.in_use
    }
    fn peak(&self) -> usize {
        self.peak
    }
    fn release(&mut self) {
        if self.in_use != 0 {
            log::warn!("allocator released with {} bytes still accounted", self.in_use);
        }
        self.released = true;
    }
    fn is_released(&self) -> bool {
        self.released
    }
}

#[derive(Debug)]
pub struct BudgetAllocator {
    inner: SystemAllocator,
    limit: usize,
}

impl BudgetAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: SystemAllocator::default(),
            limit,
        }
    }
}

impl AllocatorContext for BudgetAllocator {
    fn allocate(&mut self, bytes: usize) -> Result<(), AllocError> {
        if self.inner.in_use + bytes > self.limit {
            return Err(AllocError {
                requested: bytes,
                in_use: self.inner.in_use,
                limit: self.limit,
            });
        }
        self.inner.allocate(bytes)
    }
    fn deallocate(&mut self, bytes: usize) {
        self.inner.deallocate(bytes)
    }
    fn in_use(&self) -> usize {
        self.inner.in_use()
    }
    fn peak(&self) -> usize {
        self.inner.peak()
    }
    fn release(&mut self) {
        self.inner.release()
    }
    fn is_released(&self) -> bool {
        self.inner.is_released()
    }
}
