//! Exclusive owner of one machine and its allocator context.

use std::{cell::RefCell, rc::Rc};

use cinder_lang::runtime::{
    alloc::AllocatorContext,
    vm::{GcMode, Machine, VmConfig},
};

use crate::error::{Error, Result};

pub struct VmStateHolder {
    machine: Option<Machine>,
    allocator: Rc<RefCell<dyn AllocatorContext>>,
    mode: GcMode,
}

impl VmStateHolder {
    /// The collection mode in `config` is fixed for the life of the machine.
    pub fn new(config: VmConfig) -> Result<Self> {
        let allocator = config.allocator.create();
        let machine = Machine::new(config, allocator.clone()).map_err(|e| {
            allocator.borrow_mut().release();
            Error::Fatal(format!("could not create the machine: {e}"))
        })?;
        log::debug!("machine created ({:?} collection)", config.gc.mode);
        Ok(Self {
            machine: Some(machine),
            allocator,
            mode: config.gc.mode,
        })
    }

    pub fn machine(&mut self) -> Option<&mut Machine> {
        self.machine.as_mut()
    }

    pub fn machine_ref(&self) -> Option<&Machine> {
        self.machine.as_ref()
    }

    pub fn gc_mode(&self) -> GcMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.machine.is_none()
    }

    pub fn allocator_in_use(&self) -> usize {
        self.allocator.borrow().in_use()
    }

    pub fn allocator_released(&self) -> bool {
        self.allocator.borrow().is_released()
    }

    /// Close the machine, then release the allocator. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(mut machine) = self.machine.take() else {
            return;
        };
        machine.close();
        drop(machine);
        self.allocator.borrow_mut().release();
        log::debug!("machine state closed");
    }
}

impl Drop for VmStateHolder {
    fn drop(&mut self) {
        self.close();
    }
}
