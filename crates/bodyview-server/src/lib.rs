//! Remote-control server side of the bodyview viewer.
//!
//! Provides:
//! - `Server` - TCP accept loop feeding received messages to one consumer
//! - `IdentityMap` - (remote uid, client) to local node reconciliation
//! - `Dispatcher` - Built-in message handling plus user hooks
//! - `SceneGraph` - Scene collaborator trait (`MemoryScene` in-memory impl)
//! - `Viewer` - Processing loop tying the pieces together

pub mod dispatch;
pub mod error;
pub mod identity;
pub mod scene;
pub mod server;
pub mod viewer;

pub use dispatch::{Context, Dispatcher, Handler, HandlerResult};
pub use error::{DispatchError, ServerError};
pub use identity::IdentityMap;
pub use scene::{LocalId, MemoryScene, SceneError, SceneGraph, SceneNode};
pub use server::{Inbound, Inbox, Server, ServerHandle};
pub use viewer::Viewer;
