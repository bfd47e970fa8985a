//! Response-path reliability (§4.5): peripheral -> central responses get
//! application-level retry with classified error handling, and a
//! failure-response fallback when a multi-packet send can't be completed.
//!
//! BLE peripheral notifications are unacknowledged; without this layer a
//! partial multi-packet transmission leaves the central waiting out its
//! full `rpc_timeout` for fragments that are never coming.

use std::{sync::Arc, time::Duration};

use crate::{
    config::BleuConfig,
    envelope::{CallOutcome, EnvelopeCodec, ResponseEnvelope},
    error::BleuError,
    fragmentation::{fragment, pack},
    link::{CharacteristicId, Link, LinkError, PeerId},
};

/// Classification of a link-level send error (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    /// Abort immediately; no amount of retrying will help.
    Permanent,
    /// Local quota/backpressure/congestion — worth retrying.
    Transient,
    /// Unrecognized failure — conservatively treated as transient.
    Unknown,
}

fn classify(error: &LinkError) -> ErrorClass {
    match error {
        LinkError::Disconnected
        | LinkError::CharacteristicNotFound(_)
        | LinkError::BluetoothPoweredOff => ErrorClass::Permanent,
        LinkError::QuotaExceeded | LinkError::BluetoothUnavailable | LinkError::ConnectionFailed(_) => {
            ErrorClass::Transient
        }
        LinkError::Other(_) => ErrorClass::Unknown,
    }
}

/// Sends `ResponseEnvelope`s over a [`Link`] with the retry/fallback policy
/// from §4.5.
pub struct ResponseSender {
    link: Arc<dyn Link>,
    codec: Arc<dyn EnvelopeCodec>,
    config: BleuConfig,
}

impl ResponseSender {
    pub fn new(link: Arc<dyn Link>, codec: Arc<dyn EnvelopeCodec>, config: BleuConfig) -> Self {
        Self { link, codec, config }
    }

    /// Implements the algorithm in §4.5: fragment, transmit packet-by-packet
    /// with classified retry, and fall back to a single-packet error
    /// response if the multi-packet send can't be completed.
    pub async fn send_response(
        &self,
        peer_id: &PeerId,
        char_id: &CharacteristicId,
        envelope: ResponseEnvelope,
    ) {
        let call_id = envelope.call_id.clone();
        let bytes = match self.codec.encode_response(&envelope) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(%call_id, "failed to encode response envelope: {e}");
                return;
            }
        };

        let mtu = self.negotiated_mtu(peer_id);
        let packets = match fragment(&bytes, mtu) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(%call_id, "failed to fragment response: {e}");
                self.send_fallback(peer_id, char_id, &call_id, e).await;
                return;
            }
        };

        let total = packets.len();
        for (i, packet) in packets.into_iter().enumerate() {
            let seq = packet.seq;
            match self.send_packet_with_retry(peer_id, char_id, &packet).await {
                Ok(()) => {
                    tracing::trace!(%call_id, seq, total, "response packet sent");
                }
                Err(reason) => {
                    tracing::warn!(%call_id, seq, total, "response send aborted: {reason}");
                    self.send_fallback(peer_id, char_id, &call_id, BleuError::TransportFailed(reason))
                        .await;
                    return;
                }
            }
            if i + 1 < total {
                tokio::time::sleep(self.config.inter_packet_delay).await;
            }
        }
    }

    /// Attempts `packet`, retrying transient/unknown errors with exponential
    /// backoff up to `max_retry_attempts`. Returns `Err(reason)` once the
    /// failure is permanent or retries are exhausted (exhaustion is treated
    /// as permanent per §4.5).
    async fn send_packet_with_retry(
        &self,
        peer_id: &PeerId,
        char_id: &CharacteristicId,
        packet: &crate::fragmentation::Packet,
    ) -> Result<(), String> {
        let bytes = pack(packet);
        let mut delay = self.config.retry_delay_base;
        let mut attempt = 0u32;

        loop {
            match self.link.send(peer_id, char_id, bytes.clone()).await {
                Ok(_accepted) => return Ok(()),
                Err(e) => {
                    let class = classify(&e);
                    if class == ErrorClass::Permanent {
                        return Err(e.to_string());
                    }
                    if attempt >= self.config.max_retry_attempts {
                        return Err(format!("retries exhausted: {e}"));
                    }
                    tracing::debug!(
                        peer = %peer_id,
                        seq = packet.seq,
                        attempt,
                        "transient send error, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Best-effort single-packet error response so the central fails fast
    /// instead of waiting out its `rpc_timeout` (§4.5 step 3).
    async fn send_fallback(
        &self,
        peer_id: &PeerId,
        char_id: &CharacteristicId,
        call_id: &str,
        reason: BleuError,
    ) {
        let error_envelope = ResponseEnvelope::new(call_id, CallOutcome::failure(reason));
        let Ok(bytes) = self.codec.encode_response(&error_envelope) else {
            return;
        };
        let mtu = self.negotiated_mtu(peer_id);
        let Ok(packets) = fragment(&bytes, mtu) else {
            return;
        };
        // Best-effort: no retries, ignore the outcome.
        if let Some(packet) = packets.into_iter().next() {
            let _ = self.link.send(peer_id, char_id, pack(&packet)).await;
        }
    }

    fn negotiated_mtu(&self, peer_id: &PeerId) -> usize {
        let mtu = self.link.mtu(peer_id);
        let mtu = if mtu == 0 { self.config.default_write_length } else { mtu };
        mtu.min(self.config.max_fragment_size)
    }
}

/// Exposed for tests that want to assert the backoff schedule directly
/// without driving a full `ResponseSender`.
pub fn backoff_schedule(base: Duration, attempts: u32) -> Vec<Duration> {
    let mut delay = base;
    let mut out = Vec::with_capacity(attempts as usize);
    for _ in 0..attempts {
        out.push(delay);
        delay *= 2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors_never_retry() {
        assert_eq!(classify(&LinkError::Disconnected), ErrorClass::Permanent);
        assert_eq!(
            classify(&LinkError::CharacteristicNotFound("c1".into())),
            ErrorClass::Permanent
        );
        assert_eq!(classify(&LinkError::BluetoothPoweredOff), ErrorClass::Permanent);
    }

    #[test]
    fn transient_errors_are_worth_retrying() {
        assert_eq!(classify(&LinkError::QuotaExceeded), ErrorClass::Transient);
        assert_eq!(classify(&LinkError::BluetoothUnavailable), ErrorClass::Transient);
        assert_eq!(
            classify(&LinkError::ConnectionFailed("reset".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn unrecognized_errors_are_conservatively_unknown_not_permanent() {
        assert_eq!(classify(&LinkError::Other("weird".into())), ErrorClass::Unknown);
    }

    #[test]
    fn backoff_schedule_doubles_each_attempt() {
        let schedule = backoff_schedule(Duration::from_millis(50), 4);
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }
}
