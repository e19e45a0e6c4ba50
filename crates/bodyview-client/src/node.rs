//! Handles to nodes living in a remote viewer.

use std::fmt;

use bodyview_core::{Args, FrameOp, Message, MessageType, NdArray, NodeKind, RemoteUid, Value};

use crate::{ClientError, RemoteViewer, renderables::Renderable};

/// Node this session created in the viewer.
///
/// The uid is assigned locally when the node is created; the viewer maps it
/// to its own node on receipt. Nothing waits for an acknowledgment: messages
/// on one session arrive in order, so the creation is always processed
/// before anything sent through this handle.
#[derive(Debug)]
pub struct RemoteNode {
    viewer: RemoteViewer,
    uid: RemoteUid,
    kind: NodeKind,
    name: String,
}

impl RemoteNode {
    /// Create a node from a renderable.
    ///
    /// # Errors
    /// Returns `Protocol` if the renderable is invalid (no uid is consumed),
    /// or the send error if the creation message cannot be written.
    pub async fn create<R: Renderable>(
        viewer: &RemoteViewer,
        renderable: R,
    ) -> Result<Self, ClientError> {
        let args = renderable.into_args()?;
        Self::create_raw(viewer, R::KIND, args).await
    }

    /// Create a node of `kind` from raw creation arguments.
    ///
    /// # Errors
    /// Returns the send error if the creation message cannot be written. The
    /// allocated uid is not reused.
    pub async fn create_raw(
        viewer: &RemoteViewer,
        kind: NodeKind,
        args: Args,
    ) -> Result<Self, ClientError> {
        let uid = viewer.next_uid();
        let name = args
            .keyword
            .get("name")
            .and_then(Value::as_str)
            .map_or_else(|| format!("{kind:?} {uid}"), str::to_string);
        viewer
            .send(Message::new(kind.message_type(), Some(uid), args))
            .await?;
        tracing::debug!(uid = %uid, name = %name, "Created remote node");
        Ok(Self {
            viewer: viewer.clone(),
            uid,
            kind,
            name,
        })
    }

    #[must_use]
    pub const fn uid(&self) -> RemoteUid {
        self.uid
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session this node belongs to.
    #[must_use]
    pub const fn viewer(&self) -> &RemoteViewer {
        &self.viewer
    }

    /// Send a custom message targeting this node.
    ///
    /// # Errors
    /// Returns `Protocol` for a reserved `message_type`, before anything is
    /// written.
    pub async fn send(&self, message_type: MessageType, args: Args) -> Result<(), ClientError> {
        let message_type = message_type.ensure_user()?;
        self.send_targeted(message_type, args).await
    }

    /// Append frames. Arguments have the same layout as at creation.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn add_frames(&self, args: Args) -> Result<(), ClientError> {
        self.send_frames(FrameOp::Add, args).await
    }

    /// Replace the data of existing `frames`.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn update_frames(&self, frames: &[i64], args: Args) -> Result<(), ClientError> {
        self.send_frames(FrameOp::Update, args.kwarg("frames", frame_list(frames)))
            .await
    }

    /// Delete `frames`.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn remove_frames(&self, frames: &[i64]) -> Result<(), ClientError> {
        self.send_frames(FrameOp::Remove, Args::new().kwarg("frames", frame_list(frames)))
            .await
    }

    /// Select this node in the viewer.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn select(&self) -> Result<(), ClientError> {
        self.send_targeted(MessageType::SELECT, Args::new()).await
    }

    /// Delete the node from the viewer. The handle is consumed.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn remove(self) -> Result<(), ClientError> {
        self.send_targeted(MessageType::DELETE, Args::new()).await?;
        tracing::debug!(uid = %self.uid, name = %self.name, "Removed remote node");
        Ok(())
    }

    async fn send_frames(&self, op: FrameOp, args: Args) -> Result<(), ClientError> {
        let message_type = match op {
            FrameOp::Add => MessageType::ADD_FRAMES,
            FrameOp::Update => MessageType::UPDATE_FRAMES,
            FrameOp::Remove => MessageType::REMOVE_FRAMES,
        };
        self.send_targeted(message_type, args).await
    }

    async fn send_targeted(
        &self,
        message_type: MessageType,
        args: Args,
    ) -> Result<(), ClientError> {
        self.viewer
            .send(Message::new(message_type, Some(self.uid), args))
            .await
    }
}

impl fmt::Display for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (uid {})", self.name, self.uid)
    }
}

fn frame_list(frames: &[i64]) -> NdArray<i64> {
    NdArray::from_vec(frames.to_vec())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bodyview_core::{MessageCodec, ProtocolError};
    use futures::StreamExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::{NodeOptions, RemoteGroup, RemoteSpheres};

    async fn pair() -> (RemoteViewer, FramedRead<TcpStream, MessageCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (viewer, accepted) = tokio::join!(
            RemoteViewer::connect_to(&addr, Duration::from_secs(5)),
            listener.accept()
        );
        (
            viewer.unwrap(),
            FramedRead::new(accepted.unwrap().0, MessageCodec::default()),
        )
    }

    async fn recv(reader: &mut FramedRead<TcpStream, MessageCodec>) -> Message {
        reader.next().await.unwrap().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_messages() {
        let (viewer, mut reader) = pair().await;
        let positions = NdArray::new(vec![2, 3], vec![0.0; 6]).unwrap();
        let node = viewer
            .add(RemoteSpheres::new(positions, 0.1).with_options(NodeOptions::named("joints")))
            .await
            .unwrap();
        assert_eq!(node.uid(), RemoteUid::FIRST);
        assert_eq!(node.name(), "joints");
        assert_eq!(node.kind(), NodeKind::Spheres);

        node.update_frames(&[0], Args::new()).await.unwrap();
        node.remove_frames(&[0]).await.unwrap();
        node.select().await.unwrap();
        node.remove().await.unwrap();

        let expected = [
            MessageType::SPHERES,
            MessageType::UPDATE_FRAMES,
            MessageType::REMOVE_FRAMES,
            MessageType::SELECT,
            MessageType::DELETE,
        ];
        for ty in expected {
            let message = recv(&mut reader).await;
            assert_eq!(message.message_type, ty);
            assert_eq!(message.target, Some(RemoteUid::FIRST));
        }
    }

    #[tokio::test]
    async fn test_uids_never_reused() {
        let (viewer, mut reader) = pair().await;
        let a = viewer.add(RemoteGroup::default()).await.unwrap();
        a.remove().await.unwrap();
        let b = viewer.add(RemoteGroup::default()).await.unwrap();
        assert_eq!(b.uid().get(), 2);
        assert_eq!(b.name(), "Node 2");

        let uids: Vec<_> = [
            recv(&mut reader).await,
            recv(&mut reader).await,
            recv(&mut reader).await,
        ]
        .into_iter()
        .map(|m| m.target.map(RemoteUid::get))
        .collect();
        assert_eq!(uids, [Some(1), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_invalid_renderable_consumes_no_uid() {
        let (viewer, _reader) = pair().await;
        let bad = RemoteSpheres::new(NdArray::from_vec(vec![0.0; 4]), 1.0);
        assert!(matches!(
            viewer.add(bad).await,
            Err(ClientError::Protocol(ProtocolError::InvalidArgument(_)))
        ));
        let node = viewer.add(RemoteGroup::default()).await.unwrap();
        assert_eq!(node.uid(), RemoteUid::FIRST);
    }

    #[tokio::test]
    async fn test_node_custom_message() {
        let (viewer, mut reader) = pair().await;
        let node = viewer.add(RemoteGroup::default()).await.unwrap();
        assert!(node.send(MessageType::SELECT, Args::new()).await.is_err());
        node.send(MessageType::user(3), Args::new().arg("hello"))
            .await
            .unwrap();

        recv(&mut reader).await;
        let custom = recv(&mut reader).await;
        assert_eq!(custom.message_type, MessageType::user(3));
        assert_eq!(custom.target, Some(node.uid()));
        assert_eq!(custom.args[0].as_str(), Some("hello"));
    }
}
