//! Server-side error types.

use bodyview_core::{MessageType, ProtocolError};
use thiserror::Error;

use crate::SceneError;

/// Server lifecycle error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while processing one message.
///
/// Never fatal to the viewer: the message is dropped and logged.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),
    #[error("No handler for user message {0}")]
    Unhandled(MessageType),
    #[error("Handler failed: {0}")]
    Handler(String),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Build a handler failure from any displayable error.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        Self::Handler(err.to_string())
    }
}
