//! skylinkd — Skylink ground-station video receive daemon.
//!
//! Sits between the radio router and the video decoder: raw radio packets
//! come in over one UDP socket, ordered repaired video goes out over
//! another, and retransmission/profile/keyframe requests flow back to the
//! radio TX path.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use skylink_core::config::StationConfig;

mod engine;
mod io;

/// Inbound queue depth. The radio RX side drops when the engine falls
/// behind; the retransmission path recovers anything that mattered.
const INBOUND_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = StationConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = StationConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        StationConfig::default()
    });

    let radio_bind: SocketAddr = config
        .network
        .radio_bind
        .parse()
        .context("invalid network.radio_bind")?;
    let radio_peer: SocketAddr = config
        .network
        .radio_peer
        .parse()
        .context("invalid network.radio_peer")?;
    let decoder_addr: SocketAddr = config
        .network
        .decoder_addr
        .parse()
        .context("invalid network.decoder_addr")?;

    let radio_socket = Arc::new(
        UdpSocket::bind(radio_bind)
            .await
            .with_context(|| format!("failed to bind radio socket on {radio_bind}"))?,
    );
    tracing::info!(
        bind = %radio_bind,
        peer = %radio_peer,
        decoder = %decoder_addr,
        controller_id = config.network.controller_id,
        "skylinkd starting"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(INBOUND_QUEUE);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    // ── Shutdown channel ─────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────

    let ingest_task = {
        let socket = radio_socket.clone();
        tokio::spawn(async move {
            if let Err(e) = io::ingest_loop(socket, inbound_tx).await {
                tracing::error!(error = %e, "radio ingest failed");
            }
        })
    };

    let outbound_task = tokio::spawn(io::outbound_loop(
        radio_socket.clone(),
        radio_peer,
        outbound_rx,
    ));

    let sink = io::UdpDecoderSink::new(decoder_addr)?;
    let outbound = io::RadioOutbound::new(config.network.controller_id, outbound_tx);
    let engine_task = tokio::spawn(
        engine::Engine::new(config, sink, outbound).run(inbound_rx, shutdown_tx.subscribe()),
    );

    // ── Wait for exit ────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = ingest_task       => tracing::error!("ingest task exited: {:?}", r),
        r = outbound_task     => tracing::error!("outbound task exited: {:?}", r),
        r = engine_task       => tracing::error!("engine task exited: {:?}", r),
    }

    Ok(())
}
