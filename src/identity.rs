//! Identity types from §3: actor identity, the opaque method identifier, and
//! call-id generation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 128-bit opaque actor identity, unique within a runtime instance.
///
/// Carried on the wire as text (`recipient_id` / `sender_id`), so `ActorId`
/// round-trips through `Display`/`FromStr` rather than a binary encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(Uuid);

impl ActorId {
    pub fn new() -> Self {
        ActorId(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        ActorId(id)
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for ActorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ActorId)
    }
}

/// An opaque, platform-supplied string naming a distributed method.
///
/// The core never parses or canonicalizes this value — it is used purely as
/// a map key in the method table (§4.2, §9).
pub type MethodId = String;

/// Generates a fresh `call_id`: a 128-bit random value encoded as text.
///
/// Unique under a single runtime instance is all the contract requires; a
/// v4 UUID clears that bar with room to spare.
pub fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a fresh `stream_id` for the fragmentation codec.
pub fn new_stream_id() -> u128 {
    Uuid::new_v4().as_u128()
}
