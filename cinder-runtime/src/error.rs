use cinder_lang::{runtime::RuntimeError, utils::fileloader};
use thiserror::Error;

/// Everything a runtime operation can fail with.
///
/// Only [`Error::Fatal`] tears the runtime down; every other variant leaves
/// the machine usable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load {name}:\n{message}")]
    Load { name: String, message: String },
    #[error("failed to read {name}: {source}")]
    Io {
        name: String,
        source: fileloader::Error,
    },
    #[error("invalid script reference {0}")]
    RefInvalid(i32),
    #[error("bookmark token {0} is reserved for script timeouts")]
    TokenReserved(u64),
    #[error("native {0:#018x} is not registered")]
    NativeMissing(u64),
    #[error("profiler transition failed: {0}")]
    Profiler(String),
    #[error("error in {script}: {source}")]
    Script {
        script: String,
        source: RuntimeError,
    },
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("fatal machine error: {0}")]
    Fatal(String),
    #[error("the machine is already in use")]
    Busy,
    #[error("the runtime has not been created or was destroyed")]
    NotActive,
    #[error("the runtime was already created")]
    AlreadyCreated,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Payload(e.to_string())
    }
}

/// Errors raised inside natives travel through the machine as runtime errors.
impl From<Error> for RuntimeError {
    fn from(e: Error) -> Self {
        match e {
            Error::Script { source, .. } => source,
            other => RuntimeError::native(other.to_string()),
        }
    }
}
