use std::io;

use micro_netw::NetwError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid message head: {reason}")]
    InvalidHead { reason: String },

    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn invalid_head<S: ToString>(str: S) -> Self {
        Self::InvalidHead { reason: str.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(str: S) -> Self {
        Self::InvalidChunk { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {host}")]
    NoAddress { host: String },

    #[error(transparent)]
    Netw(#[from] NetwError),
}

impl ClientError {
    pub fn resolve<S: ToString>(host: S, source: io::Error) -> Self {
        Self::Resolve { host: host.to_string(), source }
    }

    pub fn no_address<S: ToString>(host: S) -> Self {
        Self::NoAddress { host: host.to_string() }
    }
}
