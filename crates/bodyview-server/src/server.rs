//! TCP server accepting remote clients.
//!
//! Each connection is read on its own task. Fully decoded messages are
//! handed to a single consumer (the [`Viewer`](crate::Viewer)) through the
//! [`Inbox`]; no partial frame ever leaves a connection task.

use std::{
    collections::BTreeSet,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use bodyview_core::{ClientId, Message, MessageCodec, ViewerConfig};
use futures::StreamExt;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use crate::ServerError;

/// Capacity of the connection-to-viewer queue. When the viewer falls behind,
/// connection tasks stop reading and TCP backpressure reaches the clients.
const INBOX_CAPACITY: usize = 1024;

/// Event delivered to the processing side.
#[derive(Debug)]
pub enum Inbound {
    /// A client connected.
    Connected(ClientId),
    /// A complete message arrived.
    Message { client: ClientId, message: Message },
    /// A client's transport closed, cleanly or not.
    Disconnected(ClientId),
}

/// Receiving end of the server queue.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Inbound>,
}

impl Inbox {
    /// Wait for the next event. Returns `None` once the server stopped and
    /// every connection task finished.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Next event if one is ready.
    ///
    /// # Errors
    /// Returns `Empty` when nothing is queued, `Disconnected` once the
    /// server stopped and the queue is drained.
    pub fn try_recv(&mut self) -> Result<Inbound, TryRecvError> {
        self.rx.try_recv()
    }
}

type ClientSet = Arc<RwLock<BTreeSet<ClientId>>>;

/// Handle controlling a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    clients: ClientSet,
    accept_task: Arc<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is listening on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Currently connected clients.
    #[must_use]
    pub fn clients(&self) -> BTreeSet<ClientId> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop accepting and close every connection. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(addr = %self.local_addr, "Stopping remote server");
        }
        self.shutdown.cancel();
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Whether the accept loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.accept_task.is_finished()
    }
}

/// Remote-control server.
pub struct Server;

impl Server {
    /// Bind the listening socket and start accepting clients.
    ///
    /// # Errors
    /// Returns `Bind` if the address cannot be bound.
    pub async fn bind(config: &ViewerConfig) -> Result<(ServerHandle, Inbox), ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Remote server listening");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let shutdown = CancellationToken::new();
        let clients = ClientSet::default();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            tx,
            shutdown.clone(),
            Arc::clone(&clients),
            config.max_frame_length,
        ));

        let handle = ServerHandle {
            local_addr,
            shutdown,
            clients,
            accept_task: Arc::new(accept_task),
        };
        Ok((handle, Inbox { rx }))
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
    clients: ClientSet,
    max_frame_length: usize,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::info!(client = %addr, "Accepted remote client");
                    tokio::spawn(serve_client(
                        stream,
                        ClientId::from(addr),
                        tx.clone(),
                        shutdown.child_token(),
                        Arc::clone(&clients),
                        max_frame_length,
                    ));
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {e}");
                }
            }
        }
    }
    tracing::debug!("Accept loop finished");
}

async fn serve_client(
    stream: TcpStream,
    client: ClientId,
    tx: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
    clients: ClientSet,
    max_frame_length: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(client = %client, "Failed to set TCP_NODELAY: {e}");
    }
    clients
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(client);

    let mut frames = FramedRead::new(stream, MessageCodec::new(max_frame_length));

    if tx.send(Inbound::Connected(client)).await.is_ok() {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = frames.next() => match next {
                    Some(Ok(Ok(message))) => {
                        if tx.send(Inbound::Message { client, message }).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Err(e))) => {
                        tracing::warn!(client = %client, "Dropping malformed message: {e}");
                    }
                    Some(Err(e)) => {
                        tracing::warn!(client = %client, "Connection broken: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    drop(frames);
    clients
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&client);
    tracing::info!(client = %client, "Remote client disconnected");
    let _ = tx.send(Inbound::Disconnected(client)).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bodyview_core::{Args, MessageType};
    use futures::SinkExt;
    use tokio::{io::AsyncWriteExt, time::timeout};
    use tokio_util::codec::FramedWrite;

    use super::*;

    fn local_config() -> ViewerConfig {
        ViewerConfig {
            server_enabled: true,
            port: 0,
            ..ViewerConfig::default()
        }
    }

    async fn next(inbox: &mut Inbox) -> Inbound {
        timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("timed out waiting for event")
            .expect("inbox closed")
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let (handle, mut inbox) = Server::bind(&local_config()).await.unwrap();
        let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let me = ClientId::from(stream.local_addr().unwrap());
        let mut writer = FramedWrite::new(stream, MessageCodec::default());

        let message = Message::session(MessageType::NEXT_FRAME, Args::new());
        writer.send(&message).await.unwrap();
        drop(writer);

        assert!(matches!(next(&mut inbox).await, Inbound::Connected(c) if c == me));
        match next(&mut inbox).await {
            Inbound::Message { client, message: got } => {
                assert_eq!(client, me);
                assert_eq!(got, message);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(next(&mut inbox).await, Inbound::Disconnected(c) if c == me));
        handle.stop();
    }

    #[tokio::test]
    async fn test_garbage_frame_is_skipped() {
        let (handle, mut inbox) = Server::bind(&local_config()).await.unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

        stream.write_all(&4u32.to_be_bytes()).await.unwrap();
        stream.write_all(b"nope").await.unwrap();
        let mut writer = FramedWrite::new(stream, MessageCodec::default());
        let message = Message::session(MessageType::SET_FRAME, Args::new().kwarg("frame", 3));
        writer.send(&message).await.unwrap();

        assert!(matches!(next(&mut inbox).await, Inbound::Connected(_)));
        assert!(matches!(
            next(&mut inbox).await,
            Inbound::Message { message: got, .. } if got == message
        ));
        handle.stop();
    }

    #[tokio::test]
    async fn test_truncated_frame_disconnects() {
        let (handle, mut inbox) = Server::bind(&local_config()).await.unwrap();
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();

        stream.write_all(&100u32.to_be_bytes()).await.unwrap();
        stream.write_all(b"{\"type\":").await.unwrap();
        drop(stream);

        assert!(matches!(next(&mut inbox).await, Inbound::Connected(_)));
        assert!(matches!(next(&mut inbox).await, Inbound::Disconnected(_)));
        handle.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_inbox() {
        let (handle, mut inbox) = Server::bind(&local_config()).await.unwrap();
        let _stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        assert!(matches!(next(&mut inbox).await, Inbound::Connected(_)));
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Empty)));

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());

        assert!(matches!(next(&mut inbox).await, Inbound::Disconnected(_)));
        let closed = timeout(Duration::from_secs(5), inbox.recv()).await.unwrap();
        assert!(closed.is_none());
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(handle.clients().is_empty());
    }
}
