//! Viewer processing loop.

use std::{net::SocketAddr, time::Duration};

use bodyview_core::{ClientId, RemoteUid, ViewerConfig};
use tokio::sync::mpsc::error::TryRecvError;

use crate::{Dispatcher, Inbound, Inbox, LocalId, SceneGraph, Server, ServerError, ServerHandle};

/// Viewer owning the scene, the dispatcher and, when enabled, the remote
/// server.
///
/// All scene and identity-map mutation happens on whatever task drives
/// [`poll`](Self::poll) or [`run`](Self::run).
pub struct Viewer<S> {
    dispatcher: Dispatcher<S>,
    server: Option<(ServerHandle, Inbox)>,
    config: ViewerConfig,
}

impl<S: SceneGraph> Viewer<S> {
    /// Create a viewer, binding the remote server if
    /// `config.server_enabled` is set.
    ///
    /// # Errors
    /// Returns error if the server socket cannot be bound.
    pub async fn new(scene: S, config: ViewerConfig) -> Result<Self, ServerError> {
        let server = if config.server_enabled {
            Some(Server::bind(&config).await?)
        } else {
            None
        };
        Ok(Self {
            dispatcher: Dispatcher::new(scene),
            server,
            config,
        })
    }

    /// The dispatcher, for registering handlers and hooks.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<S> {
        &mut self.dispatcher
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// The scene.
    #[must_use]
    pub const fn scene(&self) -> &S {
        self.dispatcher.scene()
    }

    /// The scene, mutably.
    pub fn scene_mut(&mut self) -> &mut S {
        self.dispatcher.scene_mut()
    }

    /// Local node a client created under `uid`.
    #[must_use]
    pub fn node_by_remote_uid(&self, uid: RemoteUid, client: ClientId) -> Option<LocalId> {
        self.dispatcher.identity().resolve(uid, client).ok()
    }

    /// Address of the remote server, if enabled.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|(handle, _)| handle.local_addr())
    }

    /// Handle to the remote server, if enabled.
    #[must_use]
    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref().map(|(handle, _)| handle)
    }

    /// Stop the remote server. Idempotent.
    pub fn stop(&self) {
        if let Some((handle, _)) = &self.server {
            handle.stop();
        }
    }

    /// Process pending events without waiting, at most
    /// `messages_per_frame` of them.
    ///
    /// Returns `false` once the server is gone and its queue drained.
    pub fn poll(&mut self) -> bool {
        let Some((_, inbox)) = self.server.as_mut() else {
            return false;
        };
        let mut events = Vec::new();
        let mut open = true;
        while events.len() < self.config.messages_per_frame {
            match inbox.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    open = false;
                    break;
                }
            }
        }
        for event in events {
            self.handle(event);
        }
        open
    }

    /// Wait for one event and process it.
    ///
    /// Returns `false` once the server is gone and its queue drained.
    pub async fn next_event(&mut self) -> bool {
        let Some((_, inbox)) = self.server.as_mut() else {
            return false;
        };
        match inbox.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    /// Process events as they arrive until the server stops.
    pub async fn run(&mut self) {
        while self.next_event().await {}
    }

    /// Frame loop: every `period`, process pending events then call
    /// `on_frame`. Ends when the server stops.
    pub async fn run_frames<F>(&mut self, period: Duration, mut on_frame: F)
    where
        F: FnMut(&mut S),
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let open = self.poll();
            on_frame(self.dispatcher.scene_mut());
            if !open {
                break;
            }
        }
    }

    fn handle(&mut self, event: Inbound) {
        match event {
            Inbound::Connected(client) => {
                tracing::debug!(client = %client, "Client session started");
            }
            Inbound::Message { client, message } => {
                // Failures are logged by the dispatcher and never stop the loop.
                let _ = self.dispatcher.process(client, &message);
            }
            Inbound::Disconnected(client) => {
                self.dispatcher.disconnect(client);
            }
        }
    }
}

impl<S> Drop for Viewer<S> {
    fn drop(&mut self) {
        if let Some((handle, _)) = &self.server {
            handle.stop();
        }
    }
}
