pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod fragmentation;
pub mod identity;
pub mod link;
pub mod log_layer;
pub mod proxy;
pub mod registry;
pub mod reliability;
pub mod rpc_state;
pub mod runtime;

pub use config::BleuConfig;
pub use dispatcher::{Dispatcher, PeerResolver};
pub use envelope::{CallOutcome, EnvelopeCodec, InvocationEnvelope, JsonEnvelopeCodec, ResponseEnvelope};
pub use error::{BleuError, BleuResult};
pub use fragmentation::{fragment, pack, unpack, Packet, Reassembler, HEADER_SIZE};
pub use identity::{new_call_id, new_stream_id, ActorId, MethodId};
pub use link::{CharacteristicId, Link, LinkError, LinkEvent, PeerId, ServiceId};
pub use proxy::{ActorProxy, StaticPeerTable};
pub use registry::{InstanceRegistry, MethodHandler, MethodTable};
pub use runtime::{ActorSystem, ActorSystemHandle};
