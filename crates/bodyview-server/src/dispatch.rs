//! Message dispatch and extension hooks.
//!
//! Every received message goes through [`Dispatcher::process`]. Resolution
//! order is: a handler registered for the message type, then the catch-all
//! hook, then built-in handling. Handlers get a [`Context`] whose
//! [`Context::builtin`] runs the default behaviour explicitly, so custom
//! logic can wrap built-ins instead of replacing them.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
};

use bodyview_core::{Builtin, ClientId, Message, MessageType, ProtocolError, RemoteUid};

use crate::{DispatchError, IdentityMap, LocalId, SceneGraph};

/// Result of handling one message.
pub type HandlerResult = Result<(), DispatchError>;

/// Message handler.
///
/// Implemented for any `FnMut(&mut Context<'_, S>, &Message) -> HandlerResult`.
pub trait Handler<S>: Send {
    /// Handle one message.
    fn handle(&mut self, ctx: &mut Context<'_, S>, message: &Message) -> HandlerResult;
}

impl<S, F> Handler<S> for F
where
    F: FnMut(&mut Context<'_, S>, &Message) -> HandlerResult + Send,
{
    fn handle(&mut self, ctx: &mut Context<'_, S>, message: &Message) -> HandlerResult {
        self(ctx, message)
    }
}

/// View of the viewer state handed to handlers.
pub struct Context<'a, S> {
    scene: &'a mut S,
    identity: &'a mut IdentityMap,
    client: ClientId,
}

impl<S: SceneGraph> Context<'_, S> {
    /// Client that sent the message.
    #[must_use]
    pub const fn client(&self) -> ClientId {
        self.client
    }

    /// The scene.
    #[must_use]
    pub fn scene(&self) -> &S {
        self.scene
    }

    /// The scene, mutably.
    pub fn scene_mut(&mut self) -> &mut S {
        self.scene
    }

    /// The identity map.
    #[must_use]
    pub fn identity(&self) -> &IdentityMap {
        self.identity
    }

    /// Local node created by this client under `uid`.
    ///
    /// # Errors
    /// Returns `UnknownRemoteUid` if the client never created `uid`.
    pub fn resolve(&self, uid: RemoteUid) -> Result<LocalId, ProtocolError> {
        self.identity.resolve(uid, self.client)
    }

    /// Run the built-in handling for `message`.
    ///
    /// # Errors
    /// Returns protocol or scene errors from the built-in handler.
    pub fn builtin(&mut self, message: &Message) -> HandlerResult {
        apply_builtin(self.scene, self.identity, self.client, message)
    }
}

fn target(message: &Message) -> Result<RemoteUid, ProtocolError> {
    message
        .target
        .ok_or(ProtocolError::MissingTarget(message.message_type))
}

fn frame_argument(message: &Message) -> Result<usize, ProtocolError> {
    let raw = match message.kwarg_i64("frame") {
        Ok(frame) => frame,
        Err(err) => message
            .args
            .first()
            .and_then(bodyview_core::Value::as_i64)
            .ok_or(err)?,
    };
    usize::try_from(raw).map_err(|_| ProtocolError::InvalidArgument("frame".to_string()))
}

fn apply_builtin<S: SceneGraph>(
    scene: &mut S,
    identity: &mut IdentityMap,
    client: ClientId,
    message: &Message,
) -> HandlerResult {
    let message_type = message.message_type;
    let Some(builtin) = message_type.builtin() else {
        return Err(if message_type.is_user() {
            DispatchError::Unhandled(message_type)
        } else {
            ProtocolError::UnknownMessageType(message_type).into()
        });
    };

    match builtin {
        Builtin::Create(kind) => {
            let uid = target(message)?;
            let local = identity
                .resolve_or_create(uid, client, || scene.add_node(kind, message.to_args()))?;
            tracing::debug!(
                client = %client,
                uid = %uid,
                local = %local,
                ?kind,
                "Created remote node"
            );
        }
        Builtin::Delete => {
            let uid = target(message)?;
            let local = identity.resolve(uid, client)?;
            identity.remove(uid, client);
            scene.remove_node(local)?;
            tracing::debug!(client = %client, uid = %uid, local = %local, "Removed remote node");
        }
        Builtin::Frames(op) => {
            let local = identity.resolve(target(message)?, client)?;
            scene.update_node(local, op, message.to_args())?;
        }
        Builtin::Select => {
            let local = identity.resolve(target(message)?, client)?;
            scene.select(local)?;
        }
        Builtin::NextFrame => scene.next_frame(),
        Builtin::SetFrame => scene.set_frame(frame_argument(message)?),
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Per-message processing pipeline.
///
/// Owns the scene and the identity map; both are only touched from the
/// thread that calls [`Dispatcher::process`].
pub struct Dispatcher<S> {
    scene: S,
    identity: IdentityMap,
    handlers: HashMap<MessageType, Box<dyn Handler<S>>>,
    hook: Option<Box<dyn Handler<S>>>,
}

impl<S: SceneGraph> Dispatcher<S> {
    /// Dispatcher with built-in handling only.
    #[must_use]
    pub fn new(scene: S) -> Self {
        Self {
            scene,
            identity: IdentityMap::new(),
            handlers: HashMap::new(),
            hook: None,
        }
    }

    /// Register a handler for one message type, replacing any previous one.
    pub fn register(&mut self, message_type: MessageType, handler: impl Handler<S> + 'static) {
        self.handlers.insert(message_type, Box::new(handler));
    }

    /// Register a closure for one message type.
    pub fn register_fn<F>(&mut self, message_type: MessageType, handler: F)
    where
        F: FnMut(&mut Context<'_, S>, &Message) -> HandlerResult + Send + 'static,
    {
        self.register(message_type, handler);
    }

    /// Install a hook that sees every message without a type handler.
    ///
    /// The hook replaces built-in handling for those messages; call
    /// [`Context::builtin`] to keep it.
    pub fn set_hook(&mut self, hook: impl Handler<S> + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Install a closure as the catch-all hook.
    pub fn set_hook_fn<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Context<'_, S>, &Message) -> HandlerResult + Send + 'static,
    {
        self.set_hook(hook);
    }

    /// The scene.
    #[must_use]
    pub const fn scene(&self) -> &S {
        &self.scene
    }

    /// The scene, mutably.
    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    /// The identity map.
    #[must_use]
    pub const fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    /// Process one message from `client`.
    ///
    /// Errors and handler panics are logged and returned; they never
    /// propagate as panics.
    pub fn process(&mut self, client: ClientId, message: &Message) -> HandlerResult {
        let result = match catch_unwind(AssertUnwindSafe(|| self.dispatch(client, message))) {
            Ok(result) => result,
            Err(payload) => Err(DispatchError::Panicked(panic_message(payload.as_ref()))),
        };

        let message_type = message.message_type;
        match &result {
            Ok(()) => {
                tracing::debug!(
                    client = %client,
                    message_type = %message_type,
                    "Processed message"
                );
            }
            Err(DispatchError::Protocol(e)) => {
                tracing::warn!(
                    client = %client,
                    message_type = %message_type,
                    "Dropping message: {e}"
                );
            }
            Err(DispatchError::Unhandled(_)) => {
                tracing::warn!(
                    client = %client,
                    message_type = %message_type,
                    "No handler for user message"
                );
            }
            Err(e) => {
                tracing::error!(
                    client = %client,
                    message_type = %message_type,
                    "Message handling failed: {e}"
                );
            }
        }
        result
    }

    /// Forget every node mapping owned by `client`.
    ///
    /// Scene nodes stay in place; only their remote identities go away.
    pub fn disconnect(&mut self, client: ClientId) -> usize {
        let purged = self.identity.purge_client(client);
        if !purged.is_empty() {
            tracing::info!(
                client = %client,
                count = purged.len(),
                "Purged remote nodes of disconnected client"
            );
        }
        purged.len()
    }

    fn dispatch(&mut self, client: ClientId, message: &Message) -> HandlerResult {
        let mut ctx = Context {
            scene: &mut self.scene,
            identity: &mut self.identity,
            client,
        };
        if let Some(handler) = self.handlers.get_mut(&message.message_type) {
            return handler.handle(&mut ctx, message);
        }
        if let Some(hook) = self.hook.as_mut() {
            return hook.handle(&mut ctx, message);
        }
        ctx.builtin(message)
    }
}
