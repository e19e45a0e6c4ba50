//! Renderables that can be created in a remote viewer.
//!
//! Per-frame data always travels with a leading frame axis; a single frame
//! given without one is sent as a sequence of length one.

use std::collections::BTreeMap;

use bodyview_core::{Args, NdArray, NodeKind, ProtocolError, Value};

/// Something a [`RemoteNode`](crate::RemoteNode) can be created from.
pub trait Renderable {
    /// Kind of node created in the viewer.
    const KIND: NodeKind;

    /// Creation arguments.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the data has the wrong shape.
    fn into_args(self) -> Result<Args, ProtocolError>;
}

/// Options shared by every renderable.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub name: Option<String>,
    pub position: Option<[f32; 3]>,
    pub scale: Option<f32>,
    pub color: Option<[f32; 4]>,
    /// Any other keyword the viewer understands.
    pub extra: BTreeMap<String, Value>,
}

impl NodeOptions {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn position(mut self, position: [f32; 3]) -> Self {
        self.position = Some(position);
        self
    }

    #[must_use]
    pub const fn scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    #[must_use]
    pub const fn color(mut self, rgba: [f32; 4]) -> Self {
        self.color = Some(rgba);
        self
    }

    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    fn apply(self, mut args: Args) -> Args {
        if let Some(name) = self.name {
            args = args.kwarg("name", name);
        }
        if let Some(position) = self.position {
            args = args.kwarg("position", position);
        }
        if let Some(scale) = self.scale {
            args = args.kwarg("scale", scale);
        }
        if let Some(color) = self.color {
            args = args.kwarg("color", NdArray::from_vec(color.to_vec()));
        }
        args.extend_kwargs(self.extra)
    }
}

/// Check the trailing dimensions of `array` and add a frame axis if missing.
fn framed<T>(
    what: &str,
    array: NdArray<T>,
    per_frame: &[Option<usize>],
) -> Result<NdArray<T>, ProtocolError> {
    let (mut shape, data) = array.into_parts();
    if shape.len() == per_frame.len() {
        shape.insert(0, 1);
    }
    let trailing_ok = shape.len() == per_frame.len() + 1
        && shape[1..]
            .iter()
            .zip(per_frame)
            .all(|(dim, want)| want.is_none_or(|w| *dim == w));
    if !trailing_ok {
        return Err(ProtocolError::InvalidArgument(format!(
            "{what} has shape {shape:?}, expected [frames, {}]",
            per_frame
                .iter()
                .map(|d| d.map_or_else(|| "_".to_string(), |d| d.to_string()))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    NdArray::new(shape, data)
}

fn shape_of<T>(
    what: &str,
    array: &NdArray<T>,
    want: &[Option<usize>],
) -> Result<(), ProtocolError> {
    let shape = array.shape();
    let ok = shape.len() == want.len()
        && shape
            .iter()
            .zip(want)
            .all(|(dim, want)| want.is_none_or(|w| *dim == w));
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidArgument(format!(
            "{what} has unexpected shape {shape:?}"
        )))
    }
}

/// Empty node grouping others.
#[derive(Debug, Clone, Default)]
pub struct RemoteGroup {
    pub options: NodeOptions,
}

impl RemoteGroup {
    #[must_use]
    pub fn new(options: NodeOptions) -> Self {
        Self { options }
    }
}

impl Renderable for RemoteGroup {
    const KIND: NodeKind = NodeKind::Node;

    fn into_args(self) -> Result<Args, ProtocolError> {
        Ok(self.options.apply(Args::new()))
    }
}

/// Triangle meshes sharing one face list.
#[derive(Debug, Clone)]
pub struct RemoteMeshes {
    /// `[frames, vertices, 3]` or `[vertices, 3]`.
    pub vertices: NdArray<f32>,
    /// `[faces, 3]` vertex indices.
    pub faces: NdArray<i64>,
    pub options: NodeOptions,
}

impl RemoteMeshes {
    #[must_use]
    pub fn new(vertices: NdArray<f32>, faces: NdArray<i64>) -> Self {
        Self {
            vertices,
            faces,
            options: NodeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl Renderable for RemoteMeshes {
    const KIND: NodeKind = NodeKind::Meshes;

    fn into_args(self) -> Result<Args, ProtocolError> {
        let vertices = framed("vertices", self.vertices, &[None, Some(3)])?;
        shape_of("faces", &self.faces, &[None, Some(3)])?;
        Ok(self
            .options
            .apply(Args::new().arg(vertices).arg(self.faces)))
    }
}

/// Spheres of one radius.
#[derive(Debug, Clone)]
pub struct RemoteSpheres {
    /// `[frames, spheres, 3]` or `[spheres, 3]` centres.
    pub positions: NdArray<f32>,
    pub radius: f32,
    pub options: NodeOptions,
}

impl RemoteSpheres {
    #[must_use]
    pub fn new(positions: NdArray<f32>, radius: f32) -> Self {
        Self {
            positions,
            radius,
            options: NodeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl Renderable for RemoteSpheres {
    const KIND: NodeKind = NodeKind::Spheres;

    fn into_args(self) -> Result<Args, ProtocolError> {
        let positions = framed("positions", self.positions, &[None, Some(3)])?;
        Ok(self
            .options
            .apply(Args::new().arg(positions).kwarg("radius", self.radius)))
    }
}

/// How line points are connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineMode {
    /// Consecutive pairs of points form separate segments.
    #[default]
    Lines,
    /// Every point connects to the next.
    LineStrip,
}

impl LineMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lines => "lines",
            Self::LineStrip => "line_strip",
        }
    }
}

/// Line segments or strips.
#[derive(Debug, Clone)]
pub struct RemoteLines {
    /// `[frames, points, 3]` or `[points, 3]`.
    pub lines: NdArray<f32>,
    pub mode: LineMode,
    pub options: NodeOptions,
}

impl RemoteLines {
    #[must_use]
    pub fn new(lines: NdArray<f32>, mode: LineMode) -> Self {
        Self {
            lines,
            mode,
            options: NodeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl Renderable for RemoteLines {
    const KIND: NodeKind = NodeKind::Lines;

    fn into_args(self) -> Result<Args, ProtocolError> {
        let lines = framed("lines", self.lines, &[None, Some(3)])?;
        if self.mode == LineMode::Lines && lines.shape()[1] % 2 != 0 {
            return Err(ProtocolError::InvalidArgument(
                "line segments need an even number of points".into(),
            ));
        }
        Ok(self
            .options
            .apply(Args::new().arg(lines).kwarg("mode", self.mode.as_str())))
    }
}

/// Arrows from origins to tips.
#[derive(Debug, Clone)]
pub struct RemoteArrows {
    /// `[frames, arrows, 3]` or `[arrows, 3]`.
    pub origins: NdArray<f32>,
    /// Same shape as `origins`.
    pub tips: NdArray<f32>,
    pub options: NodeOptions,
}

impl RemoteArrows {
    #[must_use]
    pub fn new(origins: NdArray<f32>, tips: NdArray<f32>) -> Self {
        Self {
            origins,
            tips,
            options: NodeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl Renderable for RemoteArrows {
    const KIND: NodeKind = NodeKind::Arrows;

    fn into_args(self) -> Result<Args, ProtocolError> {
        let origins = framed("origins", self.origins, &[None, Some(3)])?;
        let tips = framed("tips", self.tips, &[None, Some(3)])?;
        if origins.shape() != tips.shape() {
            return Err(ProtocolError::InvalidArgument(format!(
                "origins {:?} and tips {:?} differ in shape",
                origins.shape(),
                tips.shape()
            )));
        }
        Ok(self.options.apply(Args::new().arg(origins).arg(tips)))
    }
}

/// Rigid bodies drawn as oriented frames.
#[derive(Debug, Clone)]
pub struct RemoteRigidBodies {
    /// `[frames, bodies, 3]` or `[bodies, 3]`.
    pub positions: NdArray<f32>,
    /// `[frames, bodies, 3, 3]` or `[bodies, 3, 3]` rotation matrices.
    pub rotations: NdArray<f32>,
    pub options: NodeOptions,
}

impl RemoteRigidBodies {
    #[must_use]
    pub fn new(positions: NdArray<f32>, rotations: NdArray<f32>) -> Self {
        Self {
            positions,
            rotations,
            options: NodeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl Renderable for RemoteRigidBodies {
    const KIND: NodeKind = NodeKind::RigidBodies;

    fn into_args(self) -> Result<Args, ProtocolError> {
        let positions = framed("positions", self.positions, &[None, Some(3)])?;
        let rotations = framed("rotations", self.rotations, &[None, Some(3), Some(3)])?;
        if positions.shape()[..2] != rotations.shape()[..2] {
            return Err(ProtocolError::InvalidArgument(
                "positions and rotations disagree on frames or bodies".into(),
            ));
        }
        Ok(self
            .options
            .apply(Args::new().arg(positions).arg(rotations)))
    }
}

/// Parametric body model family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyModel {
    #[default]
    Smpl,
    Supr,
    Skel,
}

impl BodyModel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Smpl => "smpl",
            Self::Supr => "supr",
            Self::Skel => "skel",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Gender {
    #[default]
    Neutral,
    Female,
    Male,
}

impl Gender {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Female => "female",
            Self::Male => "male",
        }
    }
}

/// Body model sequence driven by pose parameters.
#[derive(Debug, Clone)]
pub struct RemoteSmplSequence {
    pub model: BodyModel,
    pub gender: Gender,
    /// `[frames, body_params]` body pose, one row per frame.
    pub poses_body: NdArray<f32>,
    /// `[frames, 3]` root orientation.
    pub poses_root: Option<NdArray<f32>>,
    /// `[shape_params]` or `[frames, shape_params]`.
    pub betas: Option<NdArray<f32>>,
    /// `[frames, 3]` root translation.
    pub trans: Option<NdArray<f32>>,
    pub options: NodeOptions,
}

impl RemoteSmplSequence {
    #[must_use]
    pub fn new(model: BodyModel, poses_body: NdArray<f32>) -> Self {
        Self {
            model,
            gender: Gender::default(),
            poses_body,
            poses_root: None,
            betas: None,
            trans: None,
            options: NodeOptions::default(),
        }
    }

    #[must_use]
    pub const fn gender(mut self, gender: Gender) -> Self {
        self.gender = gender;
        self
    }

    #[must_use]
    pub fn poses_root(mut self, poses_root: NdArray<f32>) -> Self {
        self.poses_root = Some(poses_root);
        self
    }

    #[must_use]
    pub fn betas(mut self, betas: NdArray<f32>) -> Self {
        self.betas = Some(betas);
        self
    }

    #[must_use]
    pub fn trans(mut self, trans: NdArray<f32>) -> Self {
        self.trans = Some(trans);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl Renderable for RemoteSmplSequence {
    const KIND: NodeKind = NodeKind::Smpl;

    fn into_args(self) -> Result<Args, ProtocolError> {
        shape_of("poses_body", &self.poses_body, &[None, None])?;
        let frames = self.poses_body.len();
        let per_frame = |what: &str, a: &NdArray<f32>| -> Result<(), ProtocolError> {
            shape_of(what, a, &[Some(frames), Some(3)])
        };

        let mut args = Args::new()
            .arg(self.poses_body)
            .kwarg("model_type", self.model.as_str())
            .kwarg("gender", self.gender.as_str());
        if let Some(poses_root) = self.poses_root {
            per_frame("poses_root", &poses_root)?;
            args = args.kwarg("poses_root", poses_root);
        }
        if let Some(trans) = self.trans {
            per_frame("trans", &trans)?;
            args = args.kwarg("trans", trans);
        }
        if let Some(betas) = self.betas {
            args = args.kwarg("betas", betas);
        }
        Ok(self.options.apply(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> (NdArray<f32>, NdArray<i64>) {
        let vertices = NdArray::new(vec![8, 3], vec![0.0; 24]).unwrap();
        let faces = NdArray::new(vec![12, 3], (0..36).map(|i| i % 8).collect()).unwrap();
        (vertices, faces)
    }

    #[test]
    fn test_single_frame_gets_frame_axis() {
        let (vertices, faces) = cube();
        let args = RemoteMeshes::new(vertices, faces)
            .with_options(NodeOptions::named("cube").position([1.0, 0.0, 0.0]))
            .into_args()
            .unwrap();

        let vertices = args.positional[0].as_float_array().unwrap();
        assert_eq!(vertices.shape(), [1, 8, 3]);
        assert_eq!(args.positional[1].as_int_array().unwrap().shape(), [12, 3]);
        assert_eq!(args.keyword["name"].as_str(), Some("cube"));
        assert!(args.keyword.contains_key("position"));
    }

    #[test]
    fn test_bad_shapes_rejected() {
        let flat = NdArray::from_vec(vec![0.0f32; 9]);
        let (_, faces) = cube();
        assert!(matches!(
            RemoteMeshes::new(flat, faces).into_args(),
            Err(ProtocolError::InvalidArgument(_))
        ));

        let origins = NdArray::new(vec![2, 3], vec![0.0; 6]).unwrap();
        let tips = NdArray::new(vec![3, 3], vec![1.0; 9]).unwrap();
        assert!(RemoteArrows::new(origins, tips).into_args().is_err());

        let odd = NdArray::new(vec![3, 3], vec![0.0; 9]).unwrap();
        assert!(RemoteLines::new(odd.clone(), LineMode::Lines).into_args().is_err());
        assert!(RemoteLines::new(odd, LineMode::LineStrip).into_args().is_ok());
    }

    #[test]
    fn test_spheres_and_rigid_bodies() {
        let positions = NdArray::new(vec![4, 2, 3], vec![0.0; 24]).unwrap();
        let args = RemoteSpheres::new(positions.clone(), 0.05).into_args().unwrap();
        assert_eq!(args.positional[0].as_float_array().unwrap().len(), 4);
        assert!(args.keyword["radius"].as_f64().is_some());

        let rotations = NdArray::new(vec![4, 2, 3, 3], vec![0.0; 72]).unwrap();
        assert!(RemoteRigidBodies::new(positions.clone(), rotations).into_args().is_ok());
        let wrong = NdArray::new(vec![4, 1, 3, 3], vec![0.0; 36]).unwrap();
        assert!(RemoteRigidBodies::new(positions, wrong).into_args().is_err());
    }

    #[test]
    fn test_smpl_sequence_kwargs() {
        let poses = NdArray::new(vec![10, 63], vec![0.0; 630]).unwrap();
        let trans = NdArray::new(vec![10, 3], vec![0.0; 30]).unwrap();
        let args = RemoteSmplSequence::new(BodyModel::Supr, poses.clone())
            .gender(Gender::Female)
            .trans(trans)
            .into_args()
            .unwrap();
        assert_eq!(args.keyword["model_type"].as_str(), Some("supr"));
        assert_eq!(args.keyword["gender"].as_str(), Some("female"));
        assert_eq!(args.positional[0].as_float_array().unwrap().len(), 10);

        let short_trans = NdArray::new(vec![9, 3], vec![0.0; 27]).unwrap();
        assert!(RemoteSmplSequence::new(BodyModel::Smpl, poses)
            .trans(short_trans)
            .into_args()
            .is_err());
    }

    #[test]
    fn test_extra_kwargs_override() {
        let args = RemoteGroup::new(
            NodeOptions::named("root")
                .scale(2.0)
                .kwarg("name", "renamed")
                .kwarg("visible", false),
        )
        .into_args()
        .unwrap();
        assert_eq!(args.keyword["name"].as_str(), Some("renamed"));
        assert_eq!(args.keyword["visible"].as_bool(), Some(false));
        assert!(args.positional.is_empty());
    }
}
