//! The top-level actor system (§6 "Runtime-exposed operations").
//!
//! Obtain a [`ActorSystemHandle`] before calling [`ActorSystem::run`] so the
//! host application can register actors, issue calls, and trigger shutdown
//! while the event loop runs inside a spawned task.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    config::BleuConfig,
    dispatcher::Dispatcher,
    envelope::{CallOutcome, EnvelopeCodec, JsonEnvelopeCodec},
    error::{BleuError, BleuResult},
    identity::ActorId,
    link::{Link, LinkEvent, PeerId},
    proxy::{ActorProxy, StaticPeerTable},
    registry::{InstanceRegistry, MethodTable},
};

enum Command {
    RegisterActor {
        actor_id: ActorId,
        methods: MethodTable,
    },
    UnregisterActor {
        actor_id: ActorId,
    },
    BindPeer {
        actor_id: ActorId,
        peer_id: PeerId,
        char_id: crate::link::CharacteristicId,
    },
    Disconnect(PeerId),
    Shutdown,
}

/// Cheap-to-clone handle to the running [`ActorSystem`].
#[derive(Clone)]
pub struct ActorSystemHandle {
    cmd_tx: mpsc::Sender<Command>,
    dispatcher: Arc<Dispatcher>,
}

impl ActorSystemHandle {
    /// Registers a local actor, binding `actor_id` to `methods` in the
    /// instance registry (§4.2).
    pub async fn register_actor(&self, actor_id: ActorId, methods: MethodTable) -> BleuResult<()> {
        self.cmd_tx
            .send(Command::RegisterActor { actor_id, methods })
            .await
            .map_err(|_| BleuError::Cancelled)
    }

    /// Removes `actor_id` and drains the §3 cleanup cascade: its own
    /// outstanding outbound calls complete with `disconnected`, and any
    /// inbound invocation addressed to it that arrives afterward sees
    /// `actor_not_found`.
    pub async fn unregister_actor(&self, actor_id: ActorId) -> BleuResult<()> {
        self.cmd_tx
            .send(Command::UnregisterActor { actor_id })
            .await
            .map_err(|_| BleuError::Cancelled)
    }

    /// Declares that `actor_id` is hosted by `peer_id`, reachable on
    /// `char_id`, for the purposes of cross-process dispatch (§9). Embedding
    /// applications call this once they've resolved a proxy out of band
    /// (e.g. via GATT service discovery).
    pub async fn bind_peer(
        &self,
        actor_id: ActorId,
        peer_id: PeerId,
        char_id: crate::link::CharacteristicId,
    ) -> BleuResult<()> {
        self.cmd_tx
            .send(Command::BindPeer {
                actor_id,
                peer_id,
                char_id,
            })
            .await
            .map_err(|_| BleuError::Cancelled)
    }

    /// Builds a proxy for `actor_id`, local or remote, resolved
    /// transparently at call time (§4.3).
    pub fn proxy_for(&self, actor_id: ActorId) -> ActorProxy {
        ActorProxy::new(actor_id, Arc::clone(&self.dispatcher))
    }

    /// §4.3 entry point, exposed directly for callers that don't want to
    /// hold a long-lived [`ActorProxy`].
    pub async fn remote_call(
        &self,
        recipient_id: &ActorId,
        sender_id: Option<ActorId>,
        target: impl Into<String>,
        arguments: Vec<u8>,
    ) -> BleuResult<CallOutcome> {
        self.dispatcher
            .remote_call(recipient_id, sender_id, target, arguments)
            .await
    }

    /// Triggers bulk cancellation of every pending call to `peer_id` (§5).
    pub async fn disconnect(&self, peer_id: PeerId) {
        let _ = self.cmd_tx.send(Command::Disconnect(peer_id)).await;
    }

    /// Cancels every pending call and stops the event loop (§5, §6).
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

/// The distributed-actor runtime instance (§2). Every `ActorSystem` is
/// fully isolated: its registry, RPC state machine, and reassembler are
/// owned exclusively by this instance — there is no global/process-wide
/// state anywhere in this crate (§3 invariant).
pub struct ActorSystem {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<InstanceRegistry>,
    peers: Arc<StaticPeerTable>,
    link: Arc<dyn Link>,
    config: BleuConfig,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl ActorSystem {
    /// Creates a new, fully isolated actor system instance bound to `link`,
    /// with the default [`JsonEnvelopeCodec`] (§6 "Create actor system").
    pub fn new(link: Arc<dyn Link>, config: BleuConfig) -> Self {
        Self::with_codec(link, Arc::new(JsonEnvelopeCodec), config)
    }

    pub fn with_codec(link: Arc<dyn Link>, codec: Arc<dyn EnvelopeCodec>, config: BleuConfig) -> Self {
        let registry = Arc::new(InstanceRegistry::new());
        let peers = Arc::new(StaticPeerTable::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&link),
            codec,
            Arc::clone(&peers) as Arc<dyn crate::dispatcher::PeerResolver>,
            config.clone(),
        ));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Self {
            dispatcher,
            registry,
            peers,
            link,
            config,
            cmd_tx,
            cmd_rx,
        }
    }

    pub fn handle(&self) -> ActorSystemHandle {
        ActorSystemHandle {
            cmd_tx: self.cmd_tx.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    /// Runs the event loop until [`ActorSystemHandle::shutdown`] is called
    /// or Ctrl-C is received. Drives three concerns per §4/§5: inbound link
    /// events, commands from handles, and the periodic reassembly sweep.
    pub async fn run(mut self) -> BleuResult<()> {
        let registry = Arc::clone(&self.registry);
        let mut link_events = self.link.events();
        let reassembler = self.dispatcher.reassembler();
        let rpc_state = self.dispatcher.rpc_state();

        let mut sweep = tokio::time::interval(self.config.cleanup_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = link_events.recv() => {
                    match event {
                        Ok(event) => self.on_link_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "link event receiver lagged, some events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    if self.on_command(cmd, &registry, &rpc_state).await {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let dropped = reassembler.lock().await.sweep_expired(self.config.reassembly_timeout);
                    if dropped > 0 {
                        tracing::debug!(dropped, "swept expired reassembly buffers");
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        rpc_state.cancel_all(BleuError::Cancelled).await;
        Ok(())
    }

    async fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::BytesReceived { peer_id, char_id, bytes } => {
                self.spawn_inbound_packet(peer_id, char_id, bytes);
            }
            LinkEvent::WriteRequestReceived { peer_id, char_id, bytes, .. } => {
                self.spawn_inbound_packet(peer_id, char_id, bytes);
            }
            LinkEvent::PeerDisconnected { peer_id, reason } => {
                tracing::info!(peer = %peer_id, reason, "peer disconnected");
                self.dispatcher
                    .rpc_state()
                    .cancel_all_for(&peer_id, BleuError::Disconnected)
                    .await;
            }
        }
    }

    /// Hands one inbound packet off to its own task rather than awaiting it
    /// inline. A handler invoked from this packet may itself issue a
    /// `remote_call` back through this very runtime (§8 concurrent-safety
    /// property); awaiting that inline would block this event loop from
    /// ever delivering the nested call's response, deadlocking it against
    /// itself. Spawning keeps the loop free to keep draining `link_events`
    /// while any number of inbound invocations are mid-flight.
    fn spawn_inbound_packet(
        &self,
        peer_id: PeerId,
        char_id: crate::link::CharacteristicId,
        bytes: Vec<u8>,
    ) {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            dispatcher.handle_inbound_packet(&peer_id, &char_id, &bytes).await;
        });
    }

    async fn on_command(
        &self,
        cmd: Command,
        registry: &Arc<InstanceRegistry>,
        rpc_state: &Arc<crate::rpc_state::RpcStateMachine>,
    ) -> bool {
        match cmd {
            Command::RegisterActor { actor_id, methods } => {
                registry.register(actor_id, methods).await;
                false
            }
            Command::UnregisterActor { actor_id } => {
                self.dispatcher.unregister_actor(&actor_id).await;
                false
            }
            Command::BindPeer { actor_id, peer_id, char_id } => {
                self.peers.bind(actor_id, peer_id, char_id);
                false
            }
            Command::Disconnect(peer_id) => {
                rpc_state.cancel_all_for(&peer_id, BleuError::Disconnected).await;
                false
            }
            Command::Shutdown => true,
        }
    }
}
