//! The link-layer consumed interface (§6).
//!
//! `Link` is the single seam between this crate and whatever drives the real
//! BLE attribute protocol — connection management, service/characteristic
//! discovery, and notification subscription all live on the other side of
//! this trait and are explicitly out of scope for the core (§1).
//!
//! A test or embedding application supplies a concrete `Link` (e.g. an
//! in-process loopback for same-host integration tests) and wraps it in an
//! `Arc` before handing it to [`crate::runtime::ActorSystem`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Opaque peer identity as seen by the link layer (e.g. a BLE central's
/// connection handle, serialized to text). The core treats this as an
/// opaque key, same as [`crate::identity::MethodId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// Opaque GATT characteristic identity (e.g. a UUID string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacteristicId(pub String);

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for CharacteristicId {
    fn from(s: &str) -> Self {
        CharacteristicId(s.to_string())
    }
}

/// Opaque GATT service identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        ServiceId(s.to_string())
    }
}

/// Errors the link layer can report from a `send`, per §6.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("bluetooth unavailable")]
    BluetoothUnavailable,

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(String),

    #[error("bluetooth powered off")]
    BluetoothPoweredOff,

    #[error("local transmit quota exceeded")]
    QuotaExceeded,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("link error: {0}")]
    Other(String),
}

/// Events the link layer surfaces to the runtime (§6).
#[derive(Debug, Clone)]
pub enum LinkEvent {
    BytesReceived {
        peer_id: PeerId,
        char_id: CharacteristicId,
        bytes: Vec<u8>,
    },
    PeerDisconnected {
        peer_id: PeerId,
        reason: String,
    },
    WriteRequestReceived {
        peer_id: PeerId,
        service_id: ServiceId,
        char_id: CharacteristicId,
        bytes: Vec<u8>,
    },
}

/// The consumed interface onto the BLE attribute-protocol driver.
///
/// Implementations own connection state, service/characteristic discovery,
/// and notification subscription — none of which this crate concerns itself
/// with. `events()` is a broadcast channel so the runtime's event loop and
/// any diagnostic subscriber can both observe the same stream.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Write `bytes` to `peer_id`'s `char_id`. The returned bool indicates
    /// acceptance by the local transmit stack, not delivery — BLE peripheral
    /// notifications are unacknowledged (§4.5).
    async fn send(
        &self,
        peer_id: &PeerId,
        char_id: &CharacteristicId,
        bytes: Vec<u8>,
    ) -> Result<bool, LinkError>;

    /// Negotiated MTU for `peer_id`, in bytes.
    fn mtu(&self, peer_id: &PeerId) -> usize;

    /// Subscribe to the link's event stream.
    fn events(&self) -> broadcast::Receiver<LinkEvent>;
}
