//! Error types shared by clients and viewers.

use thiserror::Error;

use crate::{ClientId, MessageType, RemoteUid};

/// Protocol error.
///
/// On the viewer side these are never fatal: the offending message is
/// dropped and the connection keeps being served.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Array shape {shape:?} does not match {len} elements")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
    #[error("Unknown remote uid {uid} for client {client}")]
    UnknownRemoteUid { uid: RemoteUid, client: ClientId },
    #[error("Remote uid {uid} already exists for client {client}")]
    DuplicateCreation { uid: RemoteUid, client: ClientId },
    #[error("Message type {0} is reserved for built-in messages")]
    ReservedMessageType(MessageType),
    #[error("Message type {0} is not a known built-in message")]
    UnknownMessageType(MessageType),
    #[error("Message type {0} requires a target node")]
    MissingTarget(MessageType),
    #[error("Missing or invalid argument: {0}")]
    InvalidArgument(String),
}

/// Framing error.
///
/// When decoding, any of these leaves the byte stream in an unknown state
/// and the connection must be treated as broken. Encoding fails before
/// anything is buffered (`Encode`, or `Io` of kind `InvalidInput` for an
/// oversized frame).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
