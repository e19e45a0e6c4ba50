//! Protocol message and identity types.

use std::{collections::BTreeMap, fmt, net::SocketAddr};

use serde::{Deserialize, Serialize};

use crate::{Args, MessageType, ProtocolError, Value};

/// Client-assigned identifier of a remote node.
///
/// Unique within one client session and meaningless without the
/// [`ClientId`] of that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteUid(u64);

impl RemoteUid {
    /// First uid handed out by a fresh client session.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw uid.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RemoteUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport-level identity of a connected client (peer address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(SocketAddr);

impl ClientId {
    /// Identity for a peer address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Peer address.
    #[must_use]
    pub const fn addr(self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One protocol message.
///
/// The sender's [`ClientId`] is not part of the payload; the server attaches
/// it on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Catalog identifier.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Target node, `None` for session-level messages.
    #[serde(rename = "uid", default)]
    pub target: Option<RemoteUid>,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl Message {
    /// Build a message from a type, an optional target and arguments.
    #[must_use]
    pub fn new(message_type: MessageType, target: Option<RemoteUid>, args: Args) -> Self {
        Self {
            message_type,
            target,
            args: args.positional,
            kwargs: args.keyword,
        }
    }

    /// Session-level message without a target node.
    #[must_use]
    pub fn session(message_type: MessageType, args: Args) -> Self {
        Self::new(message_type, None, args)
    }

    /// Keyword argument by name.
    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Required integer keyword argument.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if missing or not an integer.
    pub fn kwarg_i64(&self, name: &str) -> Result<i64, ProtocolError> {
        self.kwarg(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::InvalidArgument(name.to_string()))
    }

    /// Optional string keyword argument.
    #[must_use]
    pub fn kwarg_str(&self, name: &str) -> Option<&str> {
        self.kwarg(name).and_then(Value::as_str)
    }

    /// Copy the arguments back out as [`Args`].
    #[must_use]
    pub fn to_args(&self) -> Args {
        Args {
            positional: self.args.clone(),
            keyword: self.kwargs.clone(),
        }
    }

    /// Serialize the frame body.
    ///
    /// # Errors
    /// Returns error if a value cannot be represented.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize and validate a frame body.
    ///
    /// # Errors
    /// Returns `Malformed` for undecodable bodies and `ShapeMismatch` for
    /// inconsistent arrays.
    pub fn from_bytes(body: &[u8]) -> Result<Self, ProtocolError> {
        let message: Self =
            serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        self.args
            .iter()
            .chain(self.kwargs.values())
            .try_for_each(Value::validate)
    }
}
