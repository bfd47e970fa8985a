//! The invocation/response envelopes (§3) and their pluggable wire codec.
//!
//! The core does not mandate a byte encoding for envelopes (§9 "Envelope
//! codec pluggability") — both endpoints just need to agree. [`JsonEnvelopeCodec`]
//! is the default; a more compact encoding (CBOR, bincode, …) is a drop-in
//! optimization behind the same [`EnvelopeCodec`] trait.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::BleuError;

/// Sent from one endpoint to another to invoke a distributed method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    /// Unique per invocation; echoed back on the matching `ResponseEnvelope`.
    pub call_id: String,
    /// Text form of the target actor's [`crate::identity::ActorId`].
    pub recipient_id: String,
    /// Text form of the calling actor's identity, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_id: Option<String>,
    /// Opaque method identifier, round-tripped bit-exact.
    pub target: String,
    /// Product of a pluggable argument codec — opaque to this crate.
    #[serde(with = "bytes_as_base64")]
    pub arguments: Vec<u8>,
    /// Small string map reserved for future use.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InvocationEnvelope {
    pub fn new(
        call_id: impl Into<String>,
        recipient_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<u8>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            recipient_id: recipient_id.into(),
            sender_id: None,
            target: target.into(),
            arguments,
            metadata: HashMap::new(),
        }
    }
}

/// Outcome of executing a handler, in either the same-process or
/// cross-process path. Mirrors `ResponseEnvelope::result` exactly so the
/// conversion between the two is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The encoded return value, as produced by a pluggable result codec.
    Success {
        #[serde(with = "bytes_as_base64")]
        bytes: Vec<u8>,
    },
    /// The method has no return value.
    Void,
    /// The handler raised, or the transport could not deliver the call.
    Failure { error: BleuError },
}

impl CallOutcome {
    pub fn success(bytes: Vec<u8>) -> Self {
        CallOutcome::Success { bytes }
    }

    pub fn failure(error: BleuError) -> Self {
        CallOutcome::Failure { error }
    }
}

/// Sent back in reply to an `InvocationEnvelope`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Must equal the request's `call_id`.
    pub call_id: String,
    pub result: CallOutcome,
}

impl ResponseEnvelope {
    pub fn new(call_id: impl Into<String>, result: CallOutcome) -> Self {
        Self {
            call_id: call_id.into(),
            result,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: BleuError) -> Self {
        Self::new(call_id, CallOutcome::failure(error))
    }
}

/// Canonical byte encoding for envelopes. Both endpoints must agree on the
/// concrete implementation; the core is generic over it.
pub trait EnvelopeCodec: Send + Sync + 'static {
    fn encode_invocation(&self, envelope: &InvocationEnvelope) -> Result<Vec<u8>, BleuError>;
    fn decode_invocation(&self, bytes: &[u8]) -> Result<InvocationEnvelope, BleuError>;
    fn encode_response(&self, envelope: &ResponseEnvelope) -> Result<Vec<u8>, BleuError>;
    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, BleuError>;
}

/// JSON envelope codec — the interoperable default named in §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelopeCodec;

impl EnvelopeCodec for JsonEnvelopeCodec {
    fn encode_invocation(&self, envelope: &InvocationEnvelope) -> Result<Vec<u8>, BleuError> {
        serde_json::to_vec(envelope).map_err(|e| BleuError::InvalidEnvelope(e.to_string()))
    }

    fn decode_invocation(&self, bytes: &[u8]) -> Result<InvocationEnvelope, BleuError> {
        serde_json::from_slice(bytes).map_err(|e| BleuError::InvalidEnvelope(e.to_string()))
    }

    fn encode_response(&self, envelope: &ResponseEnvelope) -> Result<Vec<u8>, BleuError> {
        serde_json::to_vec(envelope).map_err(|e| BleuError::InvalidEnvelope(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, BleuError> {
        serde_json::from_slice(bytes).map_err(|e| BleuError::InvalidEnvelope(e.to_string()))
    }
}

/// Serializes opaque byte blobs as base64 strings so the JSON encoding stays
/// human-inspectable instead of turning into a number array.
mod bytes_as_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_envelope_round_trips_through_json() {
        let codec = JsonEnvelopeCodec;
        let mut envelope = InvocationEnvelope::new("call-1", "actor-a", "ping", vec![0, 1, 2, 255]);
        envelope.sender_id = Some("actor-b".into());

        let bytes = codec.encode_invocation(&envelope).unwrap();
        let decoded = codec.decode_invocation(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn response_envelope_carries_a_failure_kind_through_json() {
        let codec = JsonEnvelopeCodec;
        let response = ResponseEnvelope::failure("call-1", BleuError::ActorNotFound("actor-a".into()));

        let bytes = codec.encode_response(&response).unwrap();
        let decoded = codec.decode_response(&bytes).unwrap();
        assert_eq!(decoded, response);
        match decoded.result {
            CallOutcome::Failure { error } => assert_eq!(error.kind(), "actor_not_found"),
            other => panic!("expected a failure outcome, got {other:?}"),
        }
    }

    #[test]
    fn opaque_bytes_are_base64_encoded_not_a_raw_json_array() {
        let codec = JsonEnvelopeCodec;
        let envelope = InvocationEnvelope::new("call-1", "actor-a", "ping", vec![1, 2, 3]);
        let bytes = codec.encode_invocation(&envelope).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"arguments\":\""), "arguments must serialize as a base64 string: {text}");
    }
}
