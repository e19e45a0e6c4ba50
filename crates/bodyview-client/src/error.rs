//! Client error types.

use std::{process::ExitStatus, time::Duration};

use bodyview_core::{CodecError, ProtocolError};
use thiserror::Error;

/// Client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to viewer at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out connecting to viewer at {addr}")]
    ConnectTimeout { addr: String },
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("Transport error: {0}")]
    Transport(#[source] CodecError),
    #[error("Connection to viewer is closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Message cannot be encoded: {0}")]
    Encode(#[source] CodecError),
}

/// A spawned viewer never became ready.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Viewer exited before listening ({0})")]
    Exited(ExitStatus),
    #[error("Viewer did not start listening within {0:?}")]
    Timeout(Duration),
    #[error("Failed to poll viewer process: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to launch a viewer process.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Viewer command cannot be parsed: {0}")]
    InvalidCommand(String),
    #[error("Viewer command is empty")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
