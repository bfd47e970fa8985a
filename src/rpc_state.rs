//! The RPC state machine (§4.4): correlates responses to outstanding
//! requests, enforces timeouts, and handles bulk cancellation on peer loss.
//!
//! Three structures need synchronization here — the pending-call registry,
//! its per-peer index, and (indirectly, via [`crate::fragmentation::Reassembler`])
//! the reassembly-buffer map — and each is owned by a single `Mutex`-guarded
//! context, per the concurrency model in §5.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{oneshot, Mutex};

use crate::{
    envelope::ResponseEnvelope,
    error::BleuError,
    fragmentation::Reassembler,
    identity::ActorId,
    link::PeerId,
};

type ReplyTx = oneshot::Sender<Result<ResponseEnvelope, BleuError>>;

struct PendingCall {
    peer_id: PeerId,
    /// The local actor that issued this call, if any. Tracked so that
    /// removing that actor can drain its own outstanding outbound calls
    /// (§3 invariant: "all in-flight outbound calls targeted at peers
    /// associated with that actor's remote proxies are drained").
    initiator: Option<ActorId>,
    reply_tx: ReplyTx,
}

struct Inner {
    /// `call_id -> pending-call record`. Exactly one record per `call_id`
    /// may exist at a time (§3 invariant).
    calls: HashMap<String, PendingCall>,
    /// `peer_id -> set<call_id>`, the inverse index used for bulk
    /// cancellation on disconnect/shutdown.
    by_peer: HashMap<PeerId, HashSet<String>>,
    /// `actor_id -> set<call_id>`, the inverse index used to drain a
    /// removed actor's own outstanding outbound calls.
    by_actor: HashMap<ActorId, HashSet<String>>,
}

/// Per-instance registry of in-flight outbound calls.
///
/// `register` arms a timeout task that races the real response on a
/// single-consumer `remove` — whichever side removes the record first wins;
/// the loser observes an empty slot and does nothing (§4.4, §5).
pub struct RpcStateMachine {
    inner: Mutex<Inner>,
    reassembler: Arc<Mutex<Reassembler>>,
    rpc_timeout: Duration,
}

impl RpcStateMachine {
    pub fn new(reassembler: Arc<Mutex<Reassembler>>, rpc_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                calls: HashMap::new(),
                by_peer: HashMap::new(),
                by_actor: HashMap::new(),
            }),
            reassembler,
            rpc_timeout,
        })
    }

    /// Registers a pending call and arms its timeout. Returns the receiver
    /// half that resolves exactly once: on a matching [`Self::complete`], on
    /// timeout, or on [`Self::cancel_all_for`].
    pub async fn register(
        self: &Arc<Self>,
        call_id: String,
        peer_id: PeerId,
        initiator: Option<ActorId>,
    ) -> oneshot::Receiver<Result<ResponseEnvelope, BleuError>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut inner = self.inner.lock().await;
            inner.calls.insert(
                call_id.clone(),
                PendingCall {
                    peer_id: peer_id.clone(),
                    initiator,
                    reply_tx,
                },
            );
            inner.by_peer.entry(peer_id).or_default().insert(call_id.clone());
            if let Some(actor_id) = initiator {
                inner.by_actor.entry(actor_id).or_default().insert(call_id.clone());
            }
        }

        let this = Arc::clone(self);
        let timeout_call_id = call_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.rpc_timeout).await;
            this.fire_timeout(&timeout_call_id).await;
        });

        reply_rx
    }

    /// Delivers `response` to the matching pending call, if still present.
    /// A late or duplicate response (no matching record) is dropped
    /// silently, per §7 propagation policy.
    pub async fn complete(&self, response: ResponseEnvelope) {
        let record = {
            let mut inner = self.inner.lock().await;
            let record = inner.calls.remove(&response.call_id);
            if let Some(rec) = &record {
                Self::unindex(&mut inner.by_peer, &rec.peer_id, &response.call_id);
                if let Some(actor_id) = rec.initiator {
                    Self::unindex_actor(&mut inner.by_actor, &actor_id, &response.call_id);
                }
            }
            record
        };
        if let Some(record) = record {
            let _ = record.reply_tx.send(Ok(response));
        }
    }

    /// Completes exactly the `call_id` record with `error`, leaving every
    /// other pending call for its peer untouched. Used when a single
    /// packet's link-send fails — that failure isolates to the one call
    /// that owned the packet, not every call in flight to the same peer.
    pub async fn fail_call(&self, call_id: &str, error: BleuError) {
        let record = {
            let mut inner = self.inner.lock().await;
            let record = inner.calls.remove(call_id);
            if let Some(rec) = &record {
                Self::unindex(&mut inner.by_peer, &rec.peer_id, call_id);
                if let Some(actor_id) = rec.initiator {
                    Self::unindex_actor(&mut inner.by_actor, &actor_id, call_id);
                }
            }
            record
        };
        if let Some(record) = record {
            let _ = record.reply_tx.send(Err(error));
        }
    }

    /// Completes every pending call for `peer_id` with `error` and clears
    /// their records. Used for peer disconnect and runtime shutdown (§5).
    pub async fn cancel_all_for(&self, peer_id: &PeerId, error: BleuError) {
        let records = {
            let mut inner = self.inner.lock().await;
            let call_ids = inner.by_peer.remove(peer_id).unwrap_or_default();
            call_ids
                .into_iter()
                .filter_map(|id| {
                    let record = inner.calls.remove(&id)?;
                    if let Some(actor_id) = record.initiator {
                        Self::unindex_actor(&mut inner.by_actor, &actor_id, &id);
                    }
                    Some(record)
                })
                .collect::<Vec<_>>()
        };
        for record in records {
            let _ = record.reply_tx.send(Err(error.clone()));
        }
        self.reassembler.lock().await.discard_all_for(peer_id);
    }

    /// Completes every pending call issued by `actor_id` with `error`. Used
    /// when that actor is removed from the instance registry (§3 invariant).
    pub async fn cancel_all_for_actor(&self, actor_id: &ActorId, error: BleuError) {
        let records = {
            let mut inner = self.inner.lock().await;
            let call_ids = inner.by_actor.remove(actor_id).unwrap_or_default();
            call_ids
                .into_iter()
                .filter_map(|id| {
                    let record = inner.calls.remove(&id)?;
                    Self::unindex(&mut inner.by_peer, &record.peer_id, &id);
                    Some(record)
                })
                .collect::<Vec<_>>()
        };
        for record in records {
            let _ = record.reply_tx.send(Err(error.clone()));
        }
    }

    /// Completes every pending call, regardless of peer, with `error`.
    /// Used for runtime shutdown (§5 "Runtime shutdown").
    pub async fn cancel_all(&self, error: BleuError) {
        let records = {
            let mut inner = self.inner.lock().await;
            inner.by_peer.clear();
            inner.by_actor.clear();
            inner.calls.drain().map(|(_, rec)| rec).collect::<Vec<_>>()
        };
        for record in records {
            let _ = record.reply_tx.send(Err(error.clone()));
        }
    }

    async fn fire_timeout(&self, call_id: &str) {
        let (record, peer_now_idle) = {
            let mut inner = self.inner.lock().await;
            let record = inner.calls.remove(call_id);
            let peer_now_idle = match &record {
                Some(rec) => {
                    Self::unindex(&mut inner.by_peer, &rec.peer_id, call_id);
                    if let Some(actor_id) = rec.initiator {
                        Self::unindex_actor(&mut inner.by_actor, &actor_id, call_id);
                    }
                    inner
                        .by_peer
                        .get(&rec.peer_id)
                        .is_none_or(|ids| ids.is_empty())
                }
                None => false,
            };
            (record, peer_now_idle)
        };

        let Some(record) = record else {
            // Already completed or cancelled — the real response (or a
            // cancellation) won the race; this timeout is a no-op.
            return;
        };

        let _ = record.reply_tx.send(Err(BleuError::Timeout));

        // No other call is waiting on this peer: any leftover partial
        // response stream cannot be awaited by anyone, so it is safe to
        // drop eagerly rather than wait for the age-based sweep (§4.1, §9).
        if peer_now_idle {
            self.reassembler.lock().await.discard_all_for(&record.peer_id);
        }
    }

    fn unindex(by_peer: &mut HashMap<PeerId, HashSet<String>>, peer_id: &PeerId, call_id: &str) {
        if let Some(set) = by_peer.get_mut(peer_id) {
            set.remove(call_id);
            if set.is_empty() {
                by_peer.remove(peer_id);
            }
        }
    }

    fn unindex_actor(by_actor: &mut HashMap<ActorId, HashSet<String>>, actor_id: &ActorId, call_id: &str) {
        if let Some(set) = by_actor.get_mut(actor_id) {
            set.remove(call_id);
            if set.is_empty() {
                by_actor.remove(actor_id);
            }
        }
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CallOutcome;

    fn machine() -> Arc<RpcStateMachine> {
        let reassembler = Arc::new(Mutex::new(Reassembler::new()));
        RpcStateMachine::new(reassembler, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn complete_resolves_the_matching_receiver_exactly_once() {
        let rpc = machine();
        let receiver = rpc
            .register("call-1".into(), PeerId::from("p1"), None)
            .await;
        assert_eq!(rpc.pending_count().await, 1);

        rpc.complete(ResponseEnvelope::new("call-1", CallOutcome::Void)).await;
        let result = receiver.await.unwrap();
        assert!(matches!(result, Ok(ResponseEnvelope { result: CallOutcome::Void, .. })));
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn a_response_to_an_unknown_call_id_is_dropped_silently() {
        let rpc = machine();
        // No register() call at all — this must not panic.
        rpc.complete(ResponseEnvelope::new("ghost", CallOutcome::Void)).await;
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_all_for_peer_only_touches_that_peers_calls() {
        let rpc = machine();
        let r1 = rpc.register("a".into(), PeerId::from("p1"), None).await;
        let r2 = rpc.register("b".into(), PeerId::from("p2"), None).await;

        rpc.cancel_all_for(&PeerId::from("p1"), BleuError::Disconnected).await;

        assert!(matches!(r1.await.unwrap(), Err(BleuError::Disconnected)));
        assert_eq!(rpc.pending_count().await, 1);

        rpc.cancel_all_for(&PeerId::from("p2"), BleuError::Disconnected).await;
        assert!(matches!(r2.await.unwrap(), Err(BleuError::Disconnected)));
    }

    #[tokio::test]
    async fn cancel_all_for_actor_drains_only_that_actors_outbound_calls() {
        let rpc = machine();
        let alice = ActorId::new();
        let bob = ActorId::new();

        let r_alice = rpc
            .register("a".into(), PeerId::from("p1"), Some(alice))
            .await;
        let r_bob = rpc
            .register("b".into(), PeerId::from("p1"), Some(bob))
            .await;

        rpc.cancel_all_for_actor(&alice, BleuError::Disconnected).await;

        assert!(matches!(r_alice.await.unwrap(), Err(BleuError::Disconnected)));
        assert_eq!(rpc.pending_count().await, 1);

        // Bob's call is untouched and still resolvable normally.
        rpc.complete(ResponseEnvelope::new("b", CallOutcome::Void)).await;
        assert!(matches!(r_bob.await.unwrap(), Ok(_)));
    }

    #[tokio::test]
    async fn cancel_all_drains_every_pending_call_regardless_of_peer_or_actor() {
        let rpc = machine();
        let r1 = rpc.register("a".into(), PeerId::from("p1"), Some(ActorId::new())).await;
        let r2 = rpc.register("b".into(), PeerId::from("p2"), None).await;

        rpc.cancel_all(BleuError::Cancelled).await;

        assert!(matches!(r1.await.unwrap(), Err(BleuError::Cancelled)));
        assert!(matches!(r2.await.unwrap(), Err(BleuError::Cancelled)));
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn a_call_with_no_response_times_out() {
        let reassembler = Arc::new(Mutex::new(Reassembler::new()));
        let rpc = RpcStateMachine::new(reassembler, Duration::from_millis(50));
        let receiver = rpc.register("a".into(), PeerId::from("p1"), None).await;

        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(matches!(receiver.await.unwrap(), Err(BleuError::Timeout)));
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_loses_the_race_to_a_response_that_arrives_first() {
        let reassembler = Arc::new(Mutex::new(Reassembler::new()));
        let rpc = RpcStateMachine::new(reassembler, Duration::from_millis(50));
        let receiver = rpc.register("a".into(), PeerId::from("p1"), None).await;

        rpc.complete(ResponseEnvelope::new("a", CallOutcome::Void)).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(matches!(receiver.await.unwrap(), Ok(_)));
    }
}
