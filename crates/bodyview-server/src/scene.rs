//! Scene-graph collaborator.
//!
//! The dispatcher only needs these operations from the scene. A renderer
//! implements [`SceneGraph`] on top of its own node structures;
//! [`MemoryScene`] is a complete in-memory implementation used by the
//! headless viewer and the tests.

use std::{collections::BTreeMap, fmt};

use bodyview_core::{Args, FrameOp, NodeKind, Value};
use thiserror::Error;

/// Scene-assigned node identity, opaque to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(u64);

impl LocalId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scene error.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Node not found: {0}")]
    NodeNotFound(LocalId),
    #[error("Invalid node parameters: {0}")]
    InvalidParams(String),
}

/// Operations the remote protocol needs from a scene graph.
pub trait SceneGraph: Send {
    /// Build a node from creation arguments.
    fn add_node(&mut self, kind: NodeKind, params: Args) -> Result<LocalId, SceneError>;

    /// Remove a node.
    fn remove_node(&mut self, id: LocalId) -> Result<(), SceneError>;

    /// Apply a frame-level update to a node.
    fn update_node(&mut self, id: LocalId, op: FrameOp, params: Args) -> Result<(), SceneError>;

    /// Select a node and centre the view on it.
    fn select(&mut self, id: LocalId) -> Result<(), SceneError>;

    /// Advance playback one frame.
    fn next_frame(&mut self);

    /// Jump playback to `frame`.
    fn set_frame(&mut self, frame: usize);
}

/// Node stored by [`MemoryScene`].
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub kind: NodeKind,
    pub name: String,
    pub n_frames: usize,
    /// Number of frame updates applied since creation.
    pub revisions: usize,
    pub params: Args,
}

/// In-memory scene graph.
#[derive(Debug, Default)]
pub struct MemoryScene {
    nodes: BTreeMap<LocalId, SceneNode>,
    next_id: u64,
    selected: Option<LocalId>,
    current_frame: usize,
}

impl MemoryScene {
    /// Create an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Node by id.
    #[must_use]
    pub fn node(&self, id: LocalId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    /// Iterate nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (LocalId, &SceneNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// First node with the given name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<LocalId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| *id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the scene has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Currently selected node.
    #[must_use]
    pub const fn selected(&self) -> Option<LocalId> {
        self.selected
    }

    /// Current playback frame.
    #[must_use]
    pub const fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Longest sequence in the scene.
    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.nodes.values().map(|n| n.n_frames).max().unwrap_or(0)
    }

    fn node_mut(&mut self, id: LocalId) -> Result<&mut SceneNode, SceneError> {
        self.nodes.get_mut(&id).ok_or(SceneError::NodeNotFound(id))
    }
}

/// Frames carried by a message: the leading dimension of its first array.
fn frames_in(params: &Args) -> usize {
    params
        .positional
        .iter()
        .find_map(|v| match v {
            Value::FloatArray(a) => Some(a.len()),
            Value::IntArray(a) => Some(a.len()),
            _ => None,
        })
        .unwrap_or(0)
}

/// Frame indices named by the `frames` keyword.
fn frame_indices(params: &Args) -> Result<Vec<usize>, SceneError> {
    let invalid = || SceneError::InvalidParams("`frames` must be frame indices".into());
    let raw: Vec<i64> = match params.keyword.get("frames") {
        Some(Value::Int(i)) => vec![*i],
        Some(Value::IntArray(a)) => a.data().to_vec(),
        _ => return Err(invalid()),
    };
    raw.into_iter()
        .map(|i| usize::try_from(i).map_err(|_| invalid()))
        .collect()
}

fn check_in_range(indices: &[usize], n_frames: usize) -> Result<(), SceneError> {
    match indices.iter().find(|&&i| i >= n_frames) {
        Some(i) => Err(SceneError::InvalidParams(format!(
            "frame {i} out of range for {n_frames} frames"
        ))),
        None => Ok(()),
    }
}

impl SceneGraph for MemoryScene {
    fn add_node(&mut self, kind: NodeKind, params: Args) -> Result<LocalId, SceneError> {
        if kind == NodeKind::Meshes && params.positional.len() < 2 {
            return Err(SceneError::InvalidParams(
                "meshes need vertices and faces".into(),
            ));
        }
        self.next_id += 1;
        let id = LocalId::new(self.next_id);
        let name = params
            .keyword
            .get("name")
            .and_then(Value::as_str)
            .map_or_else(|| format!("{kind:?} {}", self.next_id), str::to_string);
        let node = SceneNode {
            kind,
            name,
            n_frames: frames_in(&params).max(1),
            revisions: 0,
            params,
        };
        tracing::debug!(id = %id, name = %node.name, frames = node.n_frames, "Added node");
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn remove_node(&mut self, id: LocalId) -> Result<(), SceneError> {
        self.nodes.remove(&id).ok_or(SceneError::NodeNotFound(id))?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        Ok(())
    }

    fn update_node(&mut self, id: LocalId, op: FrameOp, params: Args) -> Result<(), SceneError> {
        let node = self.node_mut(id)?;
        match op {
            FrameOp::Add => node.n_frames += frames_in(&params),
            FrameOp::Update => check_in_range(&frame_indices(&params)?, node.n_frames)?,
            FrameOp::Remove => {
                let mut indices = frame_indices(&params)?;
                check_in_range(&indices, node.n_frames)?;
                indices.sort_unstable();
                indices.dedup();
                node.n_frames -= indices.len();
            }
        }
        node.revisions += 1;
        let frames = self.n_frames();
        if frames > 0 && self.current_frame >= frames {
            self.current_frame = frames - 1;
        }
        Ok(())
    }

    fn select(&mut self, id: LocalId) -> Result<(), SceneError> {
        self.node_mut(id)?;
        self.selected = Some(id);
        Ok(())
    }

    fn next_frame(&mut self) {
        let frames = self.n_frames();
        self.current_frame = if frames == 0 {
            0
        } else {
            (self.current_frame + 1) % frames
        };
    }

    fn set_frame(&mut self, frame: usize) {
        self.current_frame = frame.min(self.n_frames().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use bodyview_core::NdArray;

    use super::*;

    fn positions(frames: usize) -> Value {
        NdArray::new(vec![frames, 2, 3], vec![0.0f32; frames * 6])
            .unwrap()
            .into()
    }

    #[test]
    fn test_add_counts_frames_and_names() {
        let mut scene = MemoryScene::new();
        let id = scene
            .add_node(
                NodeKind::Spheres,
                Args::new().arg(positions(4)).kwarg("name", "Joints"),
            )
            .unwrap();
        let node = scene.node(id).unwrap();
        assert_eq!(node.n_frames, 4);
        assert_eq!(node.name, "Joints");
        assert_eq!(scene.find_by_name("Joints"), Some(id));
    }

    #[test]
    fn test_meshes_require_faces() {
        let mut scene = MemoryScene::new();
        let err = scene
            .add_node(NodeKind::Meshes, Args::new().arg(positions(1)))
            .unwrap_err();
        assert!(matches!(err, SceneError::InvalidParams(_)));
        assert!(scene.is_empty());
    }

    #[test]
    fn test_frame_ops() {
        let mut scene = MemoryScene::new();
        let id = scene
            .add_node(NodeKind::Lines, Args::new().arg(positions(3)))
            .unwrap();

        scene
            .update_node(id, FrameOp::Add, Args::new().arg(positions(2)))
            .unwrap();
        assert_eq!(scene.node(id).unwrap().n_frames, 5);

        scene
            .update_node(id, FrameOp::Update, Args::new().kwarg("frames", 4))
            .unwrap();
        assert!(
            scene
                .update_node(id, FrameOp::Update, Args::new().kwarg("frames", 5))
                .is_err()
        );

        let drop = NdArray::from_vec(vec![0i64, 1, 1]);
        scene
            .update_node(id, FrameOp::Remove, Args::new().kwarg("frames", drop))
            .unwrap();
        assert_eq!(scene.node(id).unwrap().n_frames, 3);
        assert_eq!(scene.node(id).unwrap().revisions, 3);
    }

    #[test]
    fn test_playback_wraps_and_clamps() {
        let mut scene = MemoryScene::new();
        scene
            .add_node(NodeKind::Smpl, Args::new().arg(positions(3)))
            .unwrap();

        scene.set_frame(10);
        assert_eq!(scene.current_frame(), 2);
        scene.next_frame();
        assert_eq!(scene.current_frame(), 0);
    }

    #[test]
    fn test_remove_clears_selection() {
        let mut scene = MemoryScene::new();
        let id = scene.add_node(NodeKind::Node, Args::new()).unwrap();
        scene.select(id).unwrap();
        assert_eq!(scene.selected(), Some(id));

        scene.remove_node(id).unwrap();
        assert_eq!(scene.selected(), None);
        assert!(matches!(
            scene.remove_node(id),
            Err(SceneError::NodeNotFound(_))
        ));
    }
}
