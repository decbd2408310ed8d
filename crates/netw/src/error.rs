use std::io;
use thiserror::Error;

/// A failed system call on a descriptor.
///
/// "Would block" never shows up here: non-blocking reads and writes report it
/// as a zero byte transfer instead.
#[derive(Debug, Error)]
#[error("{message}: {source}")]
pub struct FdError {
    message: &'static str,
    #[source]
    source: io::Error,
}

impl FdError {
    pub fn new(message: &'static str, source: io::Error) -> Self {
        Self { message, source }
    }

    /// Captures `errno` of the call that just failed.
    pub fn last_os_error(message: &'static str) -> Self {
        Self::new(message, io::Error::last_os_error())
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

#[derive(Debug, Error)]
pub enum NetwError {
    #[error(transparent)]
    Fd(#[from] FdError),

    #[error("network server has been stopped")]
    Stopped,

    #[error("network server is already running")]
    AlreadyRunning,

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("failed to spawn reactor task: {source}")]
    Spawn {
        #[from]
        source: futures::task::SpawnError,
    },
}

impl NetwError {
    pub fn config<S: ToString>(str: S) -> Self {
        Self::Config { reason: str.to_string() }
    }
}
