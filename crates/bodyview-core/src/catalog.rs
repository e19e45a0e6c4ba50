//! Message catalog shared by clients and viewers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Protocol message identifier.
///
/// Values below [`MessageType::USER_MESSAGE`] belong to the viewer. Values at
/// or above it are free for application-defined messages and never collide
/// with built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(u32);

impl MessageType {
    pub const NODE: Self = Self(1);
    pub const MESHES: Self = Self(2);
    pub const SPHERES: Self = Self(3);
    pub const LINES: Self = Self(4);
    pub const ARROWS: Self = Self(5);
    pub const RIGID_BODIES: Self = Self(6);
    pub const SMPL: Self = Self(7);

    pub const DELETE: Self = Self(100);
    pub const ADD_FRAMES: Self = Self(101);
    pub const UPDATE_FRAMES: Self = Self(102);
    pub const REMOVE_FRAMES: Self = Self(103);

    pub const NEXT_FRAME: Self = Self(150);
    pub const SET_FRAME: Self = Self(151);
    pub const SELECT: Self = Self(152);

    /// First identifier of the user range.
    pub const USER_MESSAGE: Self = Self(10_000);

    /// Raw identifier.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// The `offset`-th user message identifier.
    #[must_use]
    pub const fn user(offset: u32) -> Self {
        Self(Self::USER_MESSAGE.0.saturating_add(offset))
    }

    /// Raw integer value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this identifier is in the user range.
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 >= Self::USER_MESSAGE.0
    }

    /// Check that this identifier may be used for an application message.
    ///
    /// # Errors
    /// Returns `ReservedMessageType` for identifiers below `USER_MESSAGE`.
    pub fn ensure_user(self) -> Result<Self, ProtocolError> {
        if self.is_user() {
            Ok(self)
        } else {
            Err(ProtocolError::ReservedMessageType(self))
        }
    }

    /// Classify a built-in identifier.
    ///
    /// Returns `None` for user messages and for reserved values that have no
    /// built-in meaning.
    #[must_use]
    pub const fn builtin(self) -> Option<Builtin> {
        let builtin = match self.0 {
            1 => Builtin::Create(NodeKind::Node),
            2 => Builtin::Create(NodeKind::Meshes),
            3 => Builtin::Create(NodeKind::Spheres),
            4 => Builtin::Create(NodeKind::Lines),
            5 => Builtin::Create(NodeKind::Arrows),
            6 => Builtin::Create(NodeKind::RigidBodies),
            7 => Builtin::Create(NodeKind::Smpl),
            100 => Builtin::Delete,
            101 => Builtin::Frames(FrameOp::Add),
            102 => Builtin::Frames(FrameOp::Update),
            103 => Builtin::Frames(FrameOp::Remove),
            150 => Builtin::NextFrame,
            151 => Builtin::SetFrame,
            152 => Builtin::Select,
            _ => return None,
        };
        Some(builtin)
    }

    /// Whether this identifier creates a new remote node.
    #[must_use]
    pub const fn is_creation(self) -> bool {
        matches!(self.builtin(), Some(Builtin::Create(_)))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.builtin() {
            Some(builtin) => write!(f, "{}({})", builtin.name(), self.0),
            None if self.is_user() => write!(f, "USER_MESSAGE+{}", self.0 - Self::USER_MESSAGE.0),
            None => write!(f, "RESERVED({})", self.0),
        }
    }
}

/// Kind of node created by a creation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Node,
    Meshes,
    Spheres,
    Lines,
    Arrows,
    RigidBodies,
    Smpl,
}

impl NodeKind {
    /// Creation message for this kind.
    #[must_use]
    pub const fn message_type(self) -> MessageType {
        match self {
            Self::Node => MessageType::NODE,
            Self::Meshes => MessageType::MESHES,
            Self::Spheres => MessageType::SPHERES,
            Self::Lines => MessageType::LINES,
            Self::Arrows => MessageType::ARROWS,
            Self::RigidBodies => MessageType::RIGID_BODIES,
            Self::Smpl => MessageType::SMPL,
        }
    }
}

/// Frame-level mutation applied to an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOp {
    Add,
    Update,
    Remove,
}

/// Built-in protocol operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Create(NodeKind),
    Delete,
    Frames(FrameOp),
    NextFrame,
    SetFrame,
    Select,
}

impl Builtin {
    const fn name(self) -> &'static str {
        match self {
            Self::Create(NodeKind::Node) => "NODE",
            Self::Create(NodeKind::Meshes) => "MESHES",
            Self::Create(NodeKind::Spheres) => "SPHERES",
            Self::Create(NodeKind::Lines) => "LINES",
            Self::Create(NodeKind::Arrows) => "ARROWS",
            Self::Create(NodeKind::RigidBodies) => "RIGID_BODIES",
            Self::Create(NodeKind::Smpl) => "SMPL",
            Self::Delete => "DELETE",
            Self::Frames(FrameOp::Add) => "ADD_FRAMES",
            Self::Frames(FrameOp::Update) => "UPDATE_FRAMES",
            Self::Frames(FrameOp::Remove) => "REMOVE_FRAMES",
            Self::NextFrame => "NEXT_FRAME",
            Self::SetFrame => "SET_FRAME",
            Self::Select => "SELECT",
        }
    }

    /// Whether this operation addresses an existing node.
    #[must_use]
    pub const fn needs_target(self) -> bool {
        matches!(self, Self::Delete | Self::Frames(_) | Self::Select)
    }
}
