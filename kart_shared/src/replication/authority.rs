//! Authoritative role.
//!
//! Exactly one peer holds the [`Authority`] for a kart. It folds moves into
//! the canonical state in arrival order (the move channel is reliable and
//! ordered per sender, so nothing is re-sorted here) and flags the
//! resulting [`ServerState`] for replication. When to actually send it is
//! the caller's decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

use crate::{
    clock::SessionClock,
    input::InputState,
    movement::{Move, MovementSimulator, VehicleState},
};

use super::state::ServerState;

/// What the authority checks before applying a move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Reject out-of-range axes, non-positive time steps and non-finite values.
    #[default]
    Strict,
    /// Apply every move as sent and rely on the controller to be honest.
    Trusting,
}

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MoveRejected {
    #[error("move contains non-finite values")]
    NonFinite,
    #[error("throttle {0} outside [-1, 1]")]
    ThrottleOutOfRange(f32),
    #[error("steering throw {0} outside [-1, 1]")]
    SteeringOutOfRange(f32),
    #[error("delta time {0} is not positive")]
    NonPositiveDeltaTime(f32),
}

impl ValidationPolicy {
    pub fn check(self, mv: &Move) -> Result<(), MoveRejected> {
        if self == ValidationPolicy::Trusting {
            return Ok(());
        }
        let finite = mv.throttle.is_finite()
            && mv.steering_throw.is_finite()
            && mv.delta_time.is_finite()
            && mv.start_time.is_finite();
        if !finite {
            return Err(MoveRejected::NonFinite);
        }
        if mv.throttle.abs() > 1.0 {
            return Err(MoveRejected::ThrottleOutOfRange(mv.throttle));
        }
        if mv.steering_throw.abs() > 1.0 {
            return Err(MoveRejected::SteeringOutOfRange(mv.steering_throw));
        }
        if mv.delta_time <= 0.0 {
            return Err(MoveRejected::NonPositiveDeltaTime(mv.delta_time));
        }
        Ok(())
    }
}

/// Owner of a kart's canonical state.
#[derive(Debug, Clone)]
pub struct Authority {
    sim: MovementSimulator,
    state: VehicleState,
    server_state: ServerState,
    policy: ValidationPolicy,
    dirty: bool,
    local_control: bool,
    moves_applied: u64,
    moves_rejected: u64,
}

impl Authority {
    /// New authority for a kart spawned at `spawn`. The spawn state is
    /// flagged for replication so observers learn about the kart.
    pub fn new(sim: MovementSimulator, spawn: VehicleState, policy: ValidationPolicy) -> Self {
        Self {
            sim,
            state: spawn,
            server_state: ServerState::spawn(&spawn),
            policy,
            dirty: true,
            local_control: false,
            moves_applied: 0,
            moves_rejected: 0,
        }
    }

    /// The authority's own peer drives this kart (listen-server host).
    pub fn with_local_control(mut self) -> Self {
        self.local_control = true;
        self
    }

    pub fn is_locally_controlled(&self) -> bool {
        self.local_control
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Validates and applies one move.
    pub fn submit_move(&mut self, mv: Move) -> Result<&ServerState, MoveRejected> {
        if let Err(err) = self.policy.check(&mv) {
            self.moves_rejected += 1;
            return Err(err);
        }

        self.state = self.sim.step(&self.state, &mv);
        self.server_state = ServerState::processed(mv, &self.state);
        self.dirty = true;
        self.moves_applied += 1;
        trace!(start_time = mv.start_time, position = ?self.state.position, "Move applied");
        Ok(&self.server_state)
    }

    /// Host tick: samples local input and applies it directly, no network hop.
    /// Does nothing for remotely controlled karts.
    pub fn on_tick(&mut self, dt: f32, input: InputState, clock: &dyn SessionClock) {
        if !self.local_control {
            return;
        }
        let mv = input.to_move(dt, clock.now());
        if let Err(err) = self.submit_move(mv) {
            warn!(error = %err, "Host move rejected");
        }
    }

    pub fn server_state(&self) -> &ServerState {
        &self.server_state
    }

    pub fn vehicle_state(&self) -> &VehicleState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the snapshot if it changed since the last call.
    pub fn take_snapshot(&mut self) -> Option<ServerState> {
        std::mem::take(&mut self.dirty).then_some(self.server_state)
    }

    pub fn moves_applied(&self) -> u64 {
        self.moves_applied
    }

    pub fn moves_rejected(&self) -> u64 {
        self.moves_rejected
    }
}
