//! Call dispatch (§4.3): routes a `remote_call` either straight into the
//! local [`InstanceRegistry`] or across a [`Link`], transparently to the
//! caller.
//!
//! The locality check — is `recipient_id` hosted by this runtime instance? —
//! is the only branch point. Same-process calls never touch fragmentation,
//! the RPC state machine, or the wire codec; cross-process calls use all
//! three.

use std::{sync::Arc, time::Duration};

use crate::{
    config::BleuConfig,
    envelope::{CallOutcome, EnvelopeCodec, InvocationEnvelope, ResponseEnvelope},
    error::{BleuError, BleuResult},
    fragmentation::{fragment, pack, unpack, Reassembler},
    identity::{new_call_id, ActorId},
    link::{CharacteristicId, Link, PeerId},
    reliability::ResponseSender,
    registry::InstanceRegistry,
    rpc_state::RpcStateMachine,
};

/// Resolves which peer (if any) hosts a given actor. Cross-process calls
/// need this to pick a destination `Link`/`CharacteristicId`; same-process
/// calls never consult it. Grounded on the proxy/routing split in §9 —
/// actor placement is explicitly not this crate's concern, so the mapping
/// is handed in rather than computed.
pub trait PeerResolver: Send + Sync {
    fn peer_for(&self, actor_id: &ActorId) -> Option<(PeerId, CharacteristicId)>;
}

/// Routes invocations to a local actor or over the wire to a remote one.
pub struct Dispatcher {
    registry: Arc<InstanceRegistry>,
    rpc_state: Arc<RpcStateMachine>,
    reassembler: Arc<tokio::sync::Mutex<Reassembler>>,
    link: Arc<dyn Link>,
    codec: Arc<dyn EnvelopeCodec>,
    peers: Arc<dyn PeerResolver>,
    config: BleuConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        link: Arc<dyn Link>,
        codec: Arc<dyn EnvelopeCodec>,
        peers: Arc<dyn PeerResolver>,
        config: BleuConfig,
    ) -> Self {
        let reassembler = Arc::new(tokio::sync::Mutex::new(Reassembler::new()));
        let rpc_state = RpcStateMachine::new(Arc::clone(&reassembler), config.rpc_timeout);
        Self {
            registry,
            rpc_state,
            reassembler,
            link,
            codec,
            peers,
            config,
        }
    }

    pub(crate) fn reassembler(&self) -> Arc<tokio::sync::Mutex<Reassembler>> {
        Arc::clone(&self.reassembler)
    }

    pub(crate) fn rpc_state(&self) -> Arc<RpcStateMachine> {
        Arc::clone(&self.rpc_state)
    }

    /// §4.3 entry point. `recipient_id` is parsed, checked against the local
    /// registry, and the call is either executed in-process or sent over the
    /// wire — the caller never knows which.
    pub async fn remote_call(
        &self,
        recipient_id: &ActorId,
        sender_id: Option<ActorId>,
        target: impl Into<String>,
        arguments: Vec<u8>,
    ) -> BleuResult<CallOutcome> {
        let call_id = new_call_id();
        let target = target.into();

        if self.registry.contains(recipient_id).await {
            return Ok(self.dispatch_local(recipient_id, &call_id, target, arguments).await);
        }

        self.dispatch_remote(recipient_id, sender_id, &call_id, target, arguments)
            .await
    }

    /// Same-process path (§9): the handler runs as a direct continuation,
    /// with no envelope encoding, fragmentation, or wire round trip at all.
    async fn dispatch_local(
        &self,
        recipient_id: &ActorId,
        call_id: &str,
        target: String,
        arguments: Vec<u8>,
    ) -> CallOutcome {
        let Some(handler) = self.registry.handler_for(recipient_id, &target).await else {
            return CallOutcome::failure(BleuError::MethodNotFound(target));
        };
        let envelope = InvocationEnvelope::new(call_id, recipient_id.to_string(), target, arguments);
        handler.invoke(&envelope).await
    }

    /// Cross-process path (§4.3, §4.5): encode, fragment, register the call
    /// with the RPC state machine, send every packet with retry, and await
    /// either the real response or the timeout.
    async fn dispatch_remote(
        &self,
        recipient_id: &ActorId,
        sender_id: Option<ActorId>,
        call_id: &str,
        target: String,
        arguments: Vec<u8>,
    ) -> BleuResult<CallOutcome> {
        let Some((peer_id, char_id)) = self.peers.peer_for(recipient_id) else {
            return Err(BleuError::ActorNotFound(recipient_id.to_string()));
        };

        let mut envelope =
            InvocationEnvelope::new(call_id, recipient_id.to_string(), target, arguments);
        envelope.sender_id = sender_id.map(|id| id.to_string());

        let bytes = self.codec.encode_invocation(&envelope)?;
        let mtu = self.negotiated_mtu(&peer_id);
        let packets = fragment(&bytes, mtu)?;

        let receiver = self
            .rpc_state
            .register(call_id.to_string(), peer_id.clone(), sender_id)
            .await;

        for packet in packets {
            if let Err(e) = self.link.send(&peer_id, &char_id, pack(&packet)).await {
                let error = BleuError::TransportFailed(e.to_string());
                self.rpc_state.fail_call(call_id, error.clone()).await;
                return Err(error);
            }
            if self.config.inter_packet_delay > Duration::ZERO {
                tokio::time::sleep(self.config.inter_packet_delay).await;
            }
        }

        match receiver.await {
            Ok(Ok(response)) => Ok(response.result),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BleuError::Cancelled),
        }
    }

    /// Feeds one inbound link packet through reassembly, and on completion
    /// either resolves a pending call (it's a response) or executes a local
    /// handler and sends the response back (it's an invocation), per §4.6.
    pub async fn handle_inbound_packet(
        &self,
        peer_id: &PeerId,
        char_id: &CharacteristicId,
        bytes: &[u8],
    ) {
        let packet = match unpack(bytes) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(peer = %peer_id, "dropping malformed inbound packet: {e}");
                return;
            }
        };

        let blob = {
            let mut reassembler = self.reassembler.lock().await;
            reassembler.ingest(peer_id, packet)
        };
        let Some(blob) = blob else {
            return;
        };

        if let Ok(response) = self.codec.decode_response(&blob) {
            self.rpc_state.complete(response).await;
            return;
        }

        match self.codec.decode_invocation(&blob) {
            Ok(invocation) => self.handle_inbound_invocation(peer_id, char_id, invocation).await,
            Err(e) => {
                tracing::warn!(peer = %peer_id, "dropped blob that is neither a valid invocation nor response: {e}");
            }
        }
    }

    /// §4.6: resolve the recipient locally, invoke its handler, and send the
    /// outcome back via the reliability layer. Never panics on an unknown
    /// actor or method — those become encoded `Failure` responses instead.
    async fn handle_inbound_invocation(
        &self,
        peer_id: &PeerId,
        char_id: &CharacteristicId,
        invocation: InvocationEnvelope,
    ) {
        let call_id = invocation.call_id.clone();
        let outcome = match invocation.recipient_id.parse::<ActorId>() {
            Ok(actor_id) if self.registry.contains(&actor_id).await => {
                match self.registry.handler_for(&actor_id, &invocation.target).await {
                    Some(handler) => handler.invoke(&invocation).await,
                    None => CallOutcome::failure(BleuError::MethodNotFound(invocation.target.clone())),
                }
            }
            Ok(_) => CallOutcome::failure(BleuError::ActorNotFound(invocation.recipient_id.clone())),
            Err(_) => CallOutcome::failure(BleuError::InvalidEnvelope(format!(
                "recipient_id is not a valid actor id: {}",
                invocation.recipient_id
            ))),
        };

        let response = ResponseEnvelope::new(call_id, outcome);
        let sender = ResponseSender::new(Arc::clone(&self.link), Arc::clone(&self.codec), self.config.clone());
        sender.send_response(peer_id, char_id, response).await;
    }

    /// Removes `actor_id` from the instance registry and drains the cleanup
    /// cascade named in §3: every outbound call this actor initiated is
    /// completed with `disconnected`. Inbound invocations addressed to it
    /// that arrive after this point see [`BleuError::ActorNotFound`]
    /// naturally, since [`InstanceRegistry::contains`] will miss.
    pub async fn unregister_actor(&self, actor_id: &ActorId) -> bool {
        let removed = self.registry.unregister(actor_id).await;
        self.rpc_state
            .cancel_all_for_actor(actor_id, BleuError::Disconnected)
            .await;
        removed
    }

    fn negotiated_mtu(&self, peer_id: &PeerId) -> usize {
        let mtu = self.link.mtu(peer_id);
        let mtu = if mtu == 0 { self.config.default_write_length } else { mtu };
        mtu.min(self.config.max_fragment_size)
    }
}
