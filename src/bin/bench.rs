//! `bleu-bench` — one-shot smoke test for the dispatch core.
//!
//! Wires two `ActorSystem` instances together over an in-process loopback
//! `Link` (standing in for a real BLE central/peripheral pair), registers a
//! `ping` actor on the "peripheral" side, issues `remote_call`s from the
//! "central" side, and reports round-trip latency.
//!
//! ```sh
//! bleu-bench --calls 100 --mtu 64 --payload 900
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::broadcast;

use bleu_core::{
    config::BleuConfig,
    envelope::{CallOutcome, InvocationEnvelope},
    identity::ActorId,
    link::{CharacteristicId, Link, LinkError, LinkEvent, PeerId},
    registry::{MethodHandler, MethodTable},
    runtime::ActorSystem,
};

#[derive(Parser, Debug)]
#[command(name = "bleu-bench", about = "Loopback smoke test for the Bleu RPC core")]
struct Args {
    /// Number of round-trip calls to make.
    #[arg(long, default_value_t = 20)]
    calls: usize,

    /// Simulated link MTU in bytes (forces fragmentation when small).
    #[arg(long, default_value_t = 185)]
    mtu: usize,

    /// Size in bytes of the payload echoed back by the `ping` actor.
    #[arg(long, default_value_t = 32)]
    payload: usize,
}

/// An in-process stand-in for a BLE central/peripheral pair. `send` on one
/// side synchronously enqueues a `BytesReceived` event visible to the other
/// side's `events()` stream — no real radio involved, which is exactly the
/// seam `Link` exists to isolate (§6).
struct LoopbackLink {
    self_id: PeerId,
    peer_id: PeerId,
    char_id: CharacteristicId,
    mtu: usize,
    own_events: broadcast::Sender<LinkEvent>,
    peer_events: broadcast::Sender<LinkEvent>,
}

impl LoopbackLink {
    fn pair(mtu: usize) -> (Arc<LoopbackLink>, Arc<LoopbackLink>) {
        let (tx_central, _) = broadcast::channel(256);
        let (tx_peripheral, _) = broadcast::channel(256);
        let char_id = CharacteristicId::from("rpc-characteristic");
        let central_id = PeerId::from("central");
        let peripheral_id = PeerId::from("peripheral");

        let central = Arc::new(LoopbackLink {
            self_id: central_id.clone(),
            peer_id: peripheral_id.clone(),
            char_id: char_id.clone(),
            mtu,
            own_events: tx_central.clone(),
            peer_events: tx_peripheral.clone(),
        });
        let peripheral = Arc::new(LoopbackLink {
            self_id: peripheral_id,
            peer_id: central_id,
            char_id,
            mtu,
            own_events: tx_peripheral,
            peer_events: tx_central,
        });
        (central, peripheral)
    }
}

#[async_trait]
impl Link for LoopbackLink {
    async fn send(
        &self,
        _peer_id: &PeerId,
        char_id: &CharacteristicId,
        bytes: Vec<u8>,
    ) -> Result<bool, LinkError> {
        let _ = self.peer_events.send(LinkEvent::BytesReceived {
            peer_id: self.self_id.clone(),
            char_id: char_id.clone(),
            bytes,
        });
        Ok(true)
    }

    fn mtu(&self, _peer_id: &PeerId) -> usize {
        self.mtu
    }

    fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.own_events.subscribe()
    }
}

struct PingHandler {
    reply_len: usize,
}

#[async_trait]
impl MethodHandler for PingHandler {
    async fn invoke(&self, envelope: &InvocationEnvelope) -> CallOutcome {
        tracing::debug!(call_id = %envelope.call_id, args = envelope.arguments.len(), "ping invoked");
        CallOutcome::success(vec![b'p'; self.reply_len])
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let (central_link, peripheral_link) = LoopbackLink::pair(args.mtu);

    let config = BleuConfig::new();
    let peripheral_system = ActorSystem::new(peripheral_link, config.clone());
    let peripheral_handle = peripheral_system.handle();

    let central_system = ActorSystem::new(central_link, config);
    let central_handle = central_system.handle();

    let actor_id = ActorId::new();
    let mut methods: MethodTable = MethodTable::new();
    methods.insert(
        "ping".to_string(),
        Arc::new(PingHandler { reply_len: args.payload }) as Arc<dyn MethodHandler>,
    );
    peripheral_handle.register_actor(actor_id, methods).await?;

    central_handle
        .bind_peer(
            actor_id,
            PeerId::from("peripheral"),
            CharacteristicId::from("rpc-characteristic"),
        )
        .await?;

    tokio::spawn(async move {
        if let Err(e) = peripheral_system.run().await {
            eprintln!("peripheral system error: {e}");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = central_system.run().await {
            eprintln!("central system error: {e}");
        }
    });

    let proxy = central_handle.proxy_for(actor_id);
    let start = tokio::time::Instant::now();
    let mut failures = 0usize;

    for i in 0..args.calls {
        let call_start = tokio::time::Instant::now();
        match proxy.call(None, "ping", vec![0u8; 16]).await {
            Ok(CallOutcome::Success { bytes }) => {
                println!("call {i}: ok, {} bytes, {:?}", bytes.len(), call_start.elapsed());
            }
            Ok(other) => {
                println!("call {i}: unexpected outcome {other:?}");
                failures += 1;
            }
            Err(e) => {
                println!("call {i}: error {e}");
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    println!(
        "\n{} calls in {:?} ({} failed), {:.1} calls/sec",
        args.calls,
        elapsed,
        failures,
        args.calls as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    central_handle.shutdown().await;
    peripheral_handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}
