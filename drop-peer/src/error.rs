//! Transfer error taxonomy shared by sharer, receiver and the rendezvous client.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use drop_core::{
    ChecksumMismatch, MetadataDecodeError, MetadataEncodeError, PathError, ResponseParseError,
};

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Dial, listen or accept failed.
    #[error("connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        after: Duration,
        waiting_for: &'static str,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("peer {peer} rejected metadata (ack {ack:?})")]
    AckRejected { peer: SocketAddr, ack: String },

    #[error("integrity error for {path}: {source}")]
    Integrity {
        path: PathBuf,
        #[source]
        source: ChecksumMismatch,
    },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("rendezvous server error: {0}")]
    Rendezvous(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    pub fn connection(addr: impl ToString, source: io::Error) -> Self {
        TransferError::Connection {
            addr: addr.to_string(),
            source,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl From<MetadataDecodeError> for TransferError {
    fn from(err: MetadataDecodeError) -> Self {
        TransferError::Protocol(format!("malformed metadata: {}", err))
    }
}

impl From<MetadataEncodeError> for TransferError {
    fn from(err: MetadataEncodeError) -> Self {
        TransferError::Protocol(format!("cannot encode metadata: {}", err))
    }
}

impl From<PathError> for TransferError {
    fn from(err: PathError) -> Self {
        TransferError::Protocol(err.to_string())
    }
}

impl From<ResponseParseError> for TransferError {
    fn from(err: ResponseParseError) -> Self {
        TransferError::Protocol(err.to_string())
    }
}
