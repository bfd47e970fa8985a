//! The instance registry and method table (§4.2).
//!
//! Resolves an inbound invocation's `recipient_id` to a locally hosted actor
//! and the handler for its `target`. The method table is the only portable
//! mechanism for invoking a distributed method purely by its (possibly
//! mangled, always opaque) identifier — this crate never parses it.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{envelope::CallOutcome, envelope::InvocationEnvelope, identity::{ActorId, MethodId}};

/// A single distributed method, bound to its owning actor at registration
/// time. Implementations decode arguments with the envelope's argument
/// codec, invoke the method, and encode the result — none of which this
/// crate inspects.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn invoke(&self, envelope: &InvocationEnvelope) -> CallOutcome;
}

/// Blanket impl so a plain async closure can be registered directly without
/// a bespoke struct — the common case for tests and simple actors.
#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(InvocationEnvelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = CallOutcome> + Send,
{
    async fn invoke(&self, envelope: &InvocationEnvelope) -> CallOutcome {
        (self)(envelope.clone()).await
    }
}

/// `method_identifier -> handler` for one actor.
pub type MethodTable = HashMap<MethodId, Arc<dyn MethodHandler>>;

struct Entry {
    methods: MethodTable,
}

/// `actor_id -> (actor, method_table)`, the single source of truth for which
/// actors this runtime instance hosts locally.
///
/// Read-mostly: dispatch does a `find` on every inbound and same-process
/// call, while `register`/`unregister` are comparatively rare. A single
/// `RwLock` is sufficient — there is no cross-actor invariant that needs a
/// coarser lock.
#[derive(Default)]
pub struct InstanceRegistry {
    entries: RwLock<HashMap<ActorId, Entry>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-registering `actor_id` replaces the prior entry.
    pub async fn register(&self, actor_id: ActorId, methods: MethodTable) {
        self.entries
            .write()
            .await
            .insert(actor_id, Entry { methods });
    }

    /// Removes the entry, if any. Callers are responsible for the cleanup
    /// cascade described in §3 (draining pending calls, etc.) — the registry
    /// itself only owns the actor_id -> method_table mapping.
    pub async fn unregister(&self, actor_id: &ActorId) -> bool {
        self.entries.write().await.remove(actor_id).is_some()
    }

    pub async fn contains(&self, actor_id: &ActorId) -> bool {
        self.entries.read().await.contains_key(actor_id)
    }

    /// Returns the handler for `target` on `actor_id`, if both exist.
    pub async fn handler_for(
        &self,
        actor_id: &ActorId,
        target: &MethodId,
    ) -> Option<Arc<dyn MethodHandler>> {
        self.entries
            .read()
            .await
            .get(actor_id)
            .and_then(|e| e.methods.get(target))
            .cloned()
    }

    /// All method identifiers registered for `actor_id` (diagnostics/tests).
    pub async fn handlers_for(&self, actor_id: &ActorId) -> Option<Vec<MethodId>> {
        self.entries
            .read()
            .await
            .get(actor_id)
            .map(|e| e.methods.keys().cloned().collect())
    }
}
