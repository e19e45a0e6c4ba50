//! Client session with a remote viewer.

use std::{
    net::SocketAddr,
    process::ExitStatus,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bodyview_core::{Args, ClientConfig, CodecError, Message, MessageCodec, MessageType, RemoteUid};
use futures::SinkExt;
use tokio::{net::TcpStream, sync::Mutex, time::timeout};
use tokio_util::codec::FramedWrite;

use crate::{ClientError, LaunchCommand, RemoteNode, ViewerProcess, renderables::Renderable};

type Writer = FramedWrite<TcpStream, MessageCodec>;

/// Session with a viewer.
///
/// Cheap to clone; clones share the transport and the uid counter. Sends
/// from concurrent tasks are serialized, each message is written whole.
#[derive(Clone)]
pub struct RemoteViewer {
    inner: Arc<Inner>,
}

struct Inner {
    writer: Mutex<Option<Writer>>,
    broken: AtomicBool,
    next_uid: AtomicU64,
    peer: SocketAddr,
    local: SocketAddr,
    process: StdMutex<Option<ViewerProcess>>,
    terminate_on_close: bool,
}

impl RemoteViewer {
    /// Connect to the viewer configured in `config`.
    ///
    /// # Errors
    /// Returns `Connection` or `ConnectTimeout` if nothing accepts in time.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = connect_stream(&config.addr(), config.connect_timeout()).await?;
        Self::from_stream(stream, config, None)
    }

    /// Connect to an already listening viewer at `addr`.
    ///
    /// # Errors
    /// Returns `Connection` or `ConnectTimeout` if nothing accepts in time.
    pub async fn connect_to(addr: &str, connect_timeout: Duration) -> Result<Self, ClientError> {
        let stream = connect_stream(addr, connect_timeout).await?;
        let config = ClientConfig::default();
        Self::from_stream(stream, &config, None)
    }

    /// Launch a viewer with `args` and connect once it listens.
    ///
    /// Returns only after the viewer accepted the connection, so the first
    /// message can be sent right away. If the viewer exits or does not listen
    /// within `startup_timeout`, its process group is killed.
    ///
    /// # Errors
    /// Returns `Spawn` if the viewer cannot be launched, `Startup` if it never
    /// became ready.
    pub async fn create_new_process<I>(args: I, config: &ClientConfig) -> Result<Self, ClientError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let command = LaunchCommand::build(&config.viewer_command, args)?;
        let mut process = ViewerProcess::spawn(&command).await?;
        let addr = config.addr();
        tracing::debug!(addr = %addr, pid = ?process.id(), "Waiting for viewer to listen");

        let stream = match process
            .wait_until_listening(&addr, config.startup_timeout(), config.poll_interval())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(addr = %addr, "Viewer failed to start: {e}");
                if let Err(kill_err) = process.kill().await {
                    tracing::warn!("Failed to kill viewer process: {kill_err}");
                }
                return Err(e.into());
            }
        };
        process.set_kill_on_drop(config.terminate_on_close);
        Self::from_stream(stream, config, Some(process))
    }

    fn from_stream(
        stream: TcpStream,
        config: &ClientConfig,
        process: Option<ViewerProcess>,
    ) -> Result<Self, ClientError> {
        let addrs = stream.peer_addr().and_then(|peer| Ok((peer, stream.local_addr()?)));
        let (peer, local) = addrs.map_err(|source| ClientError::Connection {
            addr: config.addr(),
            source,
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {e}");
        }
        tracing::info!(peer = %peer, spawned = process.is_some(), "Connected to viewer");
        let writer = FramedWrite::new(stream, MessageCodec::new(config.max_frame_length));
        Ok(Self {
            inner: Arc::new(Inner {
                writer: Mutex::new(Some(writer)),
                broken: AtomicBool::new(false),
                next_uid: AtomicU64::new(RemoteUid::FIRST.get()),
                peer,
                local,
                process: StdMutex::new(process),
                terminate_on_close: config.terminate_on_close,
            }),
        })
    }

    /// Address of the viewer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Local address of the connection; the viewer knows this session by it.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local
    }

    /// Whether the session was closed or broke on a failed write.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.broken.load(Ordering::Acquire)
    }

    /// Whether this session launched its viewer.
    #[must_use]
    pub fn has_process(&self) -> bool {
        self.lock_process().is_some()
    }

    /// Create a node in the viewer.
    ///
    /// # Errors
    /// Returns error if the renderable is invalid or the message cannot be sent.
    pub async fn add<R: Renderable>(&self, renderable: R) -> Result<RemoteNode, ClientError> {
        RemoteNode::create(self, renderable).await
    }

    /// Send a custom message to the viewer's hook or handlers.
    ///
    /// # Errors
    /// Returns `Protocol` for a reserved `message_type`, before anything is
    /// written.
    pub async fn send_message(
        &self,
        message_type: MessageType,
        args: Args,
    ) -> Result<(), ClientError> {
        let message_type = message_type.ensure_user()?;
        self.send(Message::session(message_type, args)).await
    }

    /// Advance every sequence in the viewer by one frame.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn next_frame(&self) -> Result<(), ClientError> {
        self.send(Message::session(MessageType::NEXT_FRAME, Args::new()))
            .await
    }

    /// Jump every sequence in the viewer to `frame`.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub async fn set_frame(&self, frame: usize) -> Result<(), ClientError> {
        let frame = i64::try_from(frame).map_err(|_| {
            ClientError::Protocol(bodyview_core::ProtocolError::InvalidArgument(format!(
                "frame index {frame} out of range"
            )))
        })?;
        self.send(Message::session(
            MessageType::SET_FRAME,
            Args::new().kwarg("frame", frame),
        ))
        .await
    }

    /// Allocate the next remote uid. Never returns the same uid twice.
    pub(crate) fn next_uid(&self) -> RemoteUid {
        RemoteUid::new(self.inner.next_uid.fetch_add(1, Ordering::Relaxed))
    }

    /// Write one message.
    ///
    /// An encoding failure leaves the session usable; a write failure marks
    /// it broken.
    pub(crate) async fn send(&self, message: Message) -> Result<(), ClientError> {
        let mut guard = self.inner.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ClientError::Closed);
        };
        tracing::debug!(
            message_type = %message.message_type,
            uid = ?message.target.map(RemoteUid::get),
            "Sending message"
        );
        match writer.send(&message).await {
            Ok(()) => Ok(()),
            Err(e) if is_encode_error(&e) => Err(ClientError::Encode(e)),
            Err(e) => {
                tracing::warn!(peer = %self.inner.peer, "Connection to viewer broken: {e}");
                *guard = None;
                self.inner.broken.store(true, Ordering::Release);
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Flush and shut down the transport, then kill the viewer if it was
    /// launched with `terminate_on_close`. Idempotent.
    ///
    /// # Errors
    /// Returns `Transport` if the final flush fails.
    pub async fn close(&self) -> Result<(), ClientError> {
        let writer = self.inner.writer.lock().await.take();
        self.inner.broken.store(true, Ordering::Release);
        let result = match writer {
            Some(mut writer) => {
                tracing::info!(peer = %self.inner.peer, "Closing viewer session");
                SinkExt::<&Message>::close(&mut writer)
                    .await
                    .map_err(ClientError::Transport)
            }
            None => Ok(()),
        };

        if self.inner.terminate_on_close {
            let process = self.lock_process().take();
            if let Some(mut process) = process {
                if let Err(e) = process.kill().await {
                    tracing::warn!("Failed to kill viewer process: {e}");
                }
            }
        }
        result
    }

    /// Wait for a launched viewer to exit, e.g. after its window was closed.
    ///
    /// Returns `None` if this session did not launch the viewer.
    ///
    /// # Errors
    /// Returns `Startup` if waiting on the process fails.
    pub async fn wait_process(&self) -> Result<Option<ExitStatus>, ClientError> {
        let process = self.lock_process().take();
        let Some(mut process) = process else {
            return Ok(None);
        };
        let status = process
            .wait()
            .await
            .map_err(|e| ClientError::Startup(e.into()))?;
        tracing::info!(%status, "Viewer process exited");
        Ok(Some(status))
    }

    fn lock_process(&self) -> std::sync::MutexGuard<'_, Option<ViewerProcess>> {
        self.inner
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RemoteViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteViewer")
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Dropping the writer closes the socket. The process kills its own
        // group on drop when `terminate_on_close` was set.
        if self.writer.get_mut().is_some() {
            tracing::debug!(peer = %self.peer, "Viewer session dropped");
        }
    }
}

async fn connect_stream(addr: &str, connect_timeout: Duration) -> Result<TcpStream, ClientError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ClientError::Connection {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(ClientError::ConnectTimeout {
            addr: addr.to_string(),
        }),
    }
}

/// Encoding fails before any byte reaches the socket.
fn is_encode_error(e: &CodecError) -> bool {
    match e {
        CodecError::Encode(_) => true,
        CodecError::Io(io) => io.kind() == std::io::ErrorKind::InvalidInput,
    }
}

#[cfg(test)]
mod tests {
    use bodyview_core::{NdArray, ProtocolError};
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;

    use super::*;

    async fn pair() -> (RemoteViewer, FramedRead<TcpStream, MessageCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (viewer, accepted) = tokio::join!(
            RemoteViewer::connect_to(&addr, Duration::from_secs(5)),
            listener.accept()
        );
        let (stream, _) = accepted.unwrap();
        (viewer.unwrap(), FramedRead::new(stream, MessageCodec::default()))
    }

    async fn recv(reader: &mut FramedRead<TcpStream, MessageCodec>) -> Message {
        reader.next().await.unwrap().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = RemoteViewer::connect_to(&addr, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_connect_over_ipv6() {
        // Hosts without an IPv6 loopback have nothing to test.
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return;
        };
        let config = ClientConfig::for_addr(listener.local_addr().unwrap());
        let (viewer, accepted) = tokio::join!(RemoteViewer::connect(&config), listener.accept());
        let viewer = viewer.unwrap();
        assert!(viewer.peer_addr().is_ipv6());
        assert_eq!(viewer.peer_addr(), listener.local_addr().unwrap());
        drop(accepted.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_spawn_kills_viewer() {
        let marker = std::env::temp_dir().join(format!(
            "bodyview-cancelled-spawn-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&marker);
        let script = format!(
            "sleep 1; touch {}",
            shlex::try_quote(&marker.to_string_lossy()).unwrap()
        );
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = ClientConfig {
            viewer_command: format!("sh -c {}", shlex::try_quote(&script).unwrap()),
            startup_timeout_ms: 10_000,
            poll_interval_ms: 20,
            ..ClientConfig::for_addr(([127, 0, 0, 1], port).into())
        };

        let pending = RemoteViewer::create_new_process(Vec::<String>::new(), &config);
        assert!(timeout(Duration::from_millis(200), pending).await.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "viewer kept running after the spawn was abandoned");
    }

    #[tokio::test]
    async fn test_uids_are_monotonic_across_clones() {
        let (viewer, _reader) = pair().await;
        let other = viewer.clone();
        assert_eq!(viewer.next_uid(), RemoteUid::FIRST);
        assert_eq!(other.next_uid().get(), 2);
        assert_eq!(viewer.next_uid().get(), 3);
    }

    #[tokio::test]
    async fn test_reserved_custom_message_is_not_sent() {
        let (viewer, mut reader) = pair().await;
        let err = viewer
            .send_message(MessageType::DELETE, Args::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ReservedMessageType(t)) if t == MessageType::DELETE
        ));

        viewer
            .send_message(MessageType::user(1), Args::new().kwarg("index", 2))
            .await
            .unwrap();
        let got = recv(&mut reader).await;
        assert_eq!(got.message_type, MessageType::user(1));
        assert_eq!(got.kwarg_i64("index").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_frame_controls() {
        let (viewer, mut reader) = pair().await;
        viewer.next_frame().await.unwrap();
        viewer.set_frame(12).await.unwrap();

        let next = recv(&mut reader).await;
        assert_eq!(next.message_type, MessageType::NEXT_FRAME);
        assert!(next.target.is_none());
        let set = recv(&mut reader).await;
        assert_eq!(set.message_type, MessageType::SET_FRAME);
        assert_eq!(set.kwarg_i64("frame").unwrap(), 12);
    }

    #[tokio::test]
    async fn test_oversized_message_keeps_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            max_frame_length: 256,
            ..ClientConfig::for_addr(listener.local_addr().unwrap())
        };
        let (viewer, accepted) = tokio::join!(RemoteViewer::connect(&config), listener.accept());
        let viewer = viewer.unwrap();
        let mut reader = FramedRead::new(accepted.unwrap().0, MessageCodec::default());

        let big = NdArray::from_vec(vec![0.5f32; 1024]);
        let err = viewer
            .send_message(MessageType::user(0), Args::new().arg(big))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Encode(_)));
        assert!(!viewer.is_closed());

        viewer.next_frame().await.unwrap();
        assert_eq!(recv(&mut reader).await.message_type, MessageType::NEXT_FRAME);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (viewer, mut reader) = pair().await;
        viewer.close().await.unwrap();
        viewer.close().await.unwrap();
        assert!(viewer.is_closed());
        assert!(reader.next().await.is_none());
        assert!(matches!(viewer.next_frame().await, Err(ClientError::Closed)));
        assert!(viewer.wait_process().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peer_gone_marks_session_broken() {
        let (viewer, reader) = pair().await;
        drop(reader);

        let mut failed = false;
        for _ in 0..50 {
            if viewer.next_frame().await.is_err() {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(failed);
        assert!(viewer.is_closed());
        assert!(matches!(viewer.next_frame().await, Err(ClientError::Closed)));
    }
}
