//! Embeddable script engine for **cinder**.
//!
//! The crate is deliberately small: a reader written with `chumsky`, a lowering
//! pass that checks special forms, and the tree-walking [`Machine`](runtime::vm::Machine)
//! with its collector, registry and execution threads. Hosts normally do not use
//! the machine directly but go through `cinder-runtime`, which owns one machine
//! per script runtime.

pub mod ast;
pub mod compiler;
pub mod runtime;
pub mod utils;

pub use log;

/// Configuration for the compiler and runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub vm: runtime::vm::VmConfig,
}
