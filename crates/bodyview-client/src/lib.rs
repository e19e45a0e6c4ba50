//! Client side of the bodyview remote protocol.
//!
//! Provides:
//! - `RemoteViewer` - Session with a running (or freshly spawned) viewer
//! - `RemoteNode` - Handle to a node the session created in the viewer
//! - Renderables (`RemoteMeshes`, `RemoteSmplSequence`, ...) describing new nodes
//! - `LaunchCommand` / `ViewerProcess` - Launching a viewer subprocess

pub mod error;
pub mod node;
pub mod process;
pub mod renderables;
pub mod viewer;

pub use error::{ClientError, SpawnError, StartupError};
pub use node::RemoteNode;
pub use process::{LaunchCommand, SERVER_FLAG, ViewerProcess};
pub use renderables::{
    BodyModel, Gender, LineMode, NodeOptions, RemoteArrows, RemoteGroup, RemoteLines,
    RemoteMeshes, RemoteRigidBodies, RemoteSmplSequence, RemoteSpheres, Renderable,
};
pub use viewer::RemoteViewer;
