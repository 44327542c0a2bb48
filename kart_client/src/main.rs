//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p kart_client -- [--addr 127.0.0.1:40000] [--config kart.json]
//!                              [--throttle 1.0] [--steering 0.5] [--name Player]
//!
//! The client connects to the server and drives its kart with a scripted
//! input: fixed throttle, steering weaving left and right. Remote karts
//! are interpolated from the snapshots the server sends.

use std::env;
use std::time::Duration;

use anyhow::Context;
use kart_client::KartClient;
use kart_shared::{
    config::KartConfig,
    input::{ControlInput, ScriptedInput},
};
use tracing::info;

/// Period of the scripted steering weave (s).
const WEAVE_PERIOD: f32 = 4.0;

fn parse_args() -> anyhow::Result<(KartConfig, ScriptedInput)> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => KartConfig::load(&args[i + 1])?,
        _ => KartConfig::default(),
    };
    let mut throttle = 1.0;
    let mut steering = 0.5;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--throttle" if i + 1 < args.len() => {
                throttle = args[i + 1].parse().unwrap_or(1.0);
                i += 2;
            }
            "--steering" if i + 1 < args.len() => {
                steering = args[i + 1].parse().unwrap_or(0.5);
                i += 2;
            }
            "--config" => i += 2,
            _ => i += 1,
        }
    }
    Ok((cfg, ScriptedInput::new(throttle, steering).weaving(WEAVE_PERIOD)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (cfg, mut driver) = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let mut client = KartClient::connect(&cfg).await.context("connect")?;
    info!(client_id = ?client.client_id, kart = ?client.kart, "Connected to server");

    let tick_interval = Duration::from_secs_f32(cfg.tick_dt());
    let mut next_tick = tokio::time::Instant::now();

    loop {
        let input = driver.sample(cfg.tick_dt());
        client.tick(input).await?;

        if !client.is_connected() {
            info!("Disconnected from server");
            break;
        }

        if client.tick_count() % cfg.tick_hz.max(1) == 0 {
            let state = client.vehicle_state();
            let correction = client.predictor().map_or(0.0, |p| p.last_correction());
            info!(
                tick = client.tick_count(),
                position = ?state.position,
                speed = state.velocity.len(),
                pending = client.pending_moves(),
                correction,
                remotes = client.remote_karts().count(),
                "Status"
            );
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    Ok(())
}
