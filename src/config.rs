//! Tunables for the RPC core (§6).
//!
//! All fields have the defaults named in the specification; construct with
//! `BleuConfig::default()` and override only what the host application cares
//! about.

use std::time::Duration;

/// Runtime-wide tunables. One `BleuConfig` is owned by a single
/// [`crate::runtime::ActorSystem`] instance; values are read, never mutated,
/// once the system is running.
#[derive(Debug, Clone)]
pub struct BleuConfig {
    /// How long a cross-process `remote_call` waits for a response before
    /// failing with [`crate::error::BleuError::Timeout`].
    pub rpc_timeout: Duration,

    /// Maximum age of an incomplete reassembly buffer before the periodic
    /// sweep discards it.
    pub reassembly_timeout: Duration,

    /// Interval between sweeps of expired reassembly buffers.
    pub cleanup_interval: Duration,

    /// Hard ceiling on packet payload size, applied on top of whatever MTU
    /// `Link::mtu` reports — caps the negotiated value rather than standing
    /// in for it, so a peer that reports an oversized MTU can't push the
    /// fragmentation codec past what this runtime is willing to send.
    pub max_fragment_size: usize,

    /// Default negotiated write length used when `Link::mtu` is unavailable.
    pub default_write_length: usize,

    /// Maximum retry attempts per packet on the response-path reliability
    /// layer (§4.5).
    pub max_retry_attempts: u32,

    /// Base delay for the exponential backoff schedule; doubles each attempt.
    pub retry_delay_base: Duration,

    /// Fixed pacing delay between consecutive packets of a multi-packet
    /// response, to avoid bursting the link.
    pub inter_packet_delay: Duration,
}

impl Default for BleuConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(10),
            reassembly_timeout: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(5),
            max_fragment_size: 512,
            default_write_length: 512,
            max_retry_attempts: 3,
            retry_delay_base: Duration::from_millis(50),
            inter_packet_delay: Duration::from_millis(10),
        }
    }
}

impl BleuConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
