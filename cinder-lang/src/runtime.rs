use crate::utils::{error::ReportableError, metadata::Location};
use thiserror::Error;

pub mod alloc;
pub mod vm;

use vm::FrameInfo;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("attempt to use undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),
    #[error("{name} expects {expected} argument(s) but got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("{name}: expected {expected}, got {got}")]
    Type {
        name: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{0}")]
    User(String),
    #[error("native error: {0}")]
    Native(String),
    #[error("stack overflow (depth {0})")]
    StackOverflow(usize),
    #[error("not enough memory: {0}")]
    OutOfMemory(String),
    #[error("corrupted machine state: {0}")]
    Corrupted(String),
    #[error("the machine has been closed")]
    Closed,
}

/// Error raised while executing script code, together with the traceback of the
/// thread it was raised on.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub location: Location,
    pub traceback: Vec<FrameInfo>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: Location::internal(),
            traceback: vec![],
        }
    }
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User(message.into()))
    }
    pub fn native(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Native(message.into()))
    }
    /// Errors after which the machine must not be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::OutOfMemory(_) | ErrorKind::Corrupted(_) | ErrorKind::Closed
        )
    }
}

impl ReportableError for RuntimeError {
    fn get_labels(&self) -> Vec<(Location, String)> {
        vec![(self.location.clone(), self.kind.to_string())]
    }
}
