//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p kart_server -- [--addr 127.0.0.1:40000] [--tick-hz 60] [--snapshot-hz 10]
//!                              [--config kart.json] [--host]
//!
//! The server listens for client connections, runs a fixed timestep
//! simulation, and replicates kart snapshots to connected clients. With
//! `--host` it also drives a kart of its own.

use std::env;

use anyhow::Context;
use kart_server::KartServer;
use kart_shared::{config::KartConfig, input::ScriptedInput};
use tracing::info;

/// Seconds between status log lines.
const STATUS_PERIOD_SECS: u32 = 5;

struct Args {
    cfg: KartConfig,
    host: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base layer; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => KartConfig::load(&args[i + 1])?,
        _ => KartConfig::default(),
    };
    let mut host = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--snapshot-hz" if i + 1 < args.len() => {
                cfg.snapshot_hz = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            "--config" => i += 2,
            "--host" => {
                host = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, host })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, host } = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        snapshot_hz = cfg.snapshot_hz,
        validation = ?cfg.validation,
        "Starting server"
    );

    let mut server = KartServer::bind(cfg.clone())
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    if host {
        server.spawn_host_kart(ScriptedInput::new(1.0, 0.6).weaving(4.0));
    }

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(cfg.tick_dt());
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        if let Ok(Some(cid)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(client_id = ?cid, kart = ?server.kart_for(cid), "New client accepted");
        }

        server.step(tick_interval.as_secs_f32()).await?;

        if server.tick() % (cfg.tick_hz.max(1) * STATUS_PERIOD_SECS) == 0 {
            info!(
                tick = server.tick(),
                clients = server.client_count(),
                karts = server.kart_count(),
                snapshots = server.snapshots_sent(),
                "Status"
            );
        }

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
