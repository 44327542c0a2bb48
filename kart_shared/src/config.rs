//! Configuration system.
//!
//! Loads kart configuration from JSON strings/files. Every field has a
//! default so partial files are accepted.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    movement::{MovementConstants, MovementSimulator},
    physics::Arena,
    replication::ValidationPolicy,
};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KartConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// How often the server replicates snapshots. Independent of `tick_hz`.
    #[serde(default = "default_snapshot_hz")]
    pub snapshot_hz: u32,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    #[serde(default)]
    pub validation: ValidationPolicy,
    #[serde(default)]
    pub movement: MovementConstants,
    /// Walled arena; `None` means open ground.
    #[serde(default)]
    pub arena: Option<Arena>,
    /// Upper bound on unacknowledged moves held by a predicting client.
    #[serde(default = "default_max_pending_moves")]
    pub max_pending_moves: usize,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    60
}

fn default_snapshot_hz() -> u32 {
    10
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_max_pending_moves() -> usize {
    1024
}

impl Default for KartConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            snapshot_hz: default_snapshot_hz(),
            player_name: default_player_name(),
            validation: ValidationPolicy::default(),
            movement: MovementConstants::default(),
            arena: None,
            max_pending_moves: default_max_pending_moves(),
        }
    }
}

impl KartConfig {
    /// Parses and validates config from JSON.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("parse json")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the simulation cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(arena) = &self.arena {
            anyhow::ensure!(
                arena.is_ordered(),
                "arena min {:?} exceeds max {:?}",
                arena.min,
                arena.max
            );
        }
        Ok(())
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Seconds per simulation tick.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }

    /// Seconds between snapshot broadcasts.
    pub fn snapshot_interval(&self) -> f32 {
        1.0 / self.snapshot_hz.max(1) as f32
    }

    /// Movement model for these constants and level geometry.
    pub fn simulator(&self) -> MovementSimulator {
        match self.arena {
            Some(arena) => {
                MovementSimulator::with_collision(self.movement, Arc::new(arena.normalized()))
            }
            None => MovementSimulator::new(self.movement),
        }
    }
}
