//! Core vocabulary for the bodyview remote protocol.
//!
//! This crate provides the pieces shared by viewers and producers:
//! - `MessageType` - The message catalog (built-in and user ranges)
//! - `Value` / `Args` - Positional and keyword argument model
//! - `Message` - One protocol message
//! - `MessageCodec` - Length-prefixed JSON framing
//! - `ViewerConfig` / `ClientConfig` - Explicit configuration structs

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod value;

pub use catalog::{Builtin, FrameOp, MessageType, NodeKind};
pub use codec::MessageCodec;
pub use config::{ClientConfig, ViewerConfig};
pub use error::{CodecError, ConfigError, ProtocolError};
pub use message::{ClientId, Message, RemoteUid};
pub use value::{Args, Element, NdArray, Value};
