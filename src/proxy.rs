//! Actor proxies (§9 "Cyclic graphs of actor proxies").
//!
//! A proxy is a value holding an actor id and a reference to the
//! [`Dispatcher`] — never a back-edge into the instance registry. Cycles
//! built out of proxies at the application layer are harmless because the
//! core holds no owning edges between them; dropping every proxy that
//! points at an actor has no effect on whether that actor stays registered.

use std::sync::Arc;

use crate::{
    dispatcher::{Dispatcher, PeerResolver},
    envelope::CallOutcome,
    error::BleuResult,
    identity::ActorId,
    link::{CharacteristicId, PeerId},
};

/// A callable handle to an actor, local or remote. Cheap to clone; cloning
/// copies the actor id and the `Arc<Dispatcher>`, never actor state.
#[derive(Clone)]
pub struct ActorProxy {
    actor_id: ActorId,
    dispatcher: Arc<Dispatcher>,
}

impl ActorProxy {
    pub(crate) fn new(actor_id: ActorId, dispatcher: Arc<Dispatcher>) -> Self {
        Self { actor_id, dispatcher }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Invokes `target` on the proxied actor, routing locally or remotely
    /// transparently (§4.3). `sender_id` identifies the calling actor, if
    /// any, for the callee's `InvocationEnvelope::sender_id`.
    pub async fn call(
        &self,
        sender_id: Option<ActorId>,
        target: impl Into<String>,
        arguments: Vec<u8>,
    ) -> BleuResult<CallOutcome> {
        self.dispatcher
            .remote_call(&self.actor_id, sender_id, target, arguments)
            .await
    }
}

/// A static `actor_id -> (peer_id, characteristic_id)` table, the simplest
/// [`PeerResolver`]. Suited to embedding applications that resolve actor
/// placement out of band (e.g. a single known peripheral) and hand the
/// mapping in directly rather than discovering it dynamically.
#[derive(Default)]
pub struct StaticPeerTable {
    entries: std::sync::RwLock<std::collections::HashMap<ActorId, (PeerId, CharacteristicId)>>,
}

impl StaticPeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, actor_id: ActorId, peer_id: PeerId, char_id: CharacteristicId) {
        self.entries
            .write()
            .unwrap()
            .insert(actor_id, (peer_id, char_id));
    }

    pub fn unbind(&self, actor_id: &ActorId) {
        self.entries.write().unwrap().remove(actor_id);
    }
}

impl PeerResolver for StaticPeerTable {
    fn peer_for(&self, actor_id: &ActorId) -> Option<(PeerId, CharacteristicId)> {
        self.entries.read().unwrap().get(actor_id).cloned()
    }
}
