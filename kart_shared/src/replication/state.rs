//! Authoritative state as replicated to clients.

use serde::{Deserialize, Serialize};

use crate::{
    math::{Quat, Vec3},
    movement::{Move, VehicleState},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

/// Canonical kart state plus the last move folded into it.
///
/// `last_processed_move` is `None` until the authority has applied a move;
/// a snapshot without one acknowledges nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub last_processed_move: Option<Move>,
    pub transform: Transform,
    pub velocity: Vec3,
}

impl ServerState {
    /// State of a kart that has not moved yet.
    pub fn spawn(state: &VehicleState) -> Self {
        Self {
            last_processed_move: None,
            transform: Transform {
                position: state.position,
                orientation: state.orientation,
            },
            velocity: state.velocity,
        }
    }

    pub fn processed(mv: Move, state: &VehicleState) -> Self {
        Self {
            last_processed_move: Some(mv),
            ..Self::spawn(state)
        }
    }

    pub fn vehicle_state(&self) -> VehicleState {
        VehicleState {
            position: self.transform.position,
            orientation: self.transform.orientation,
            velocity: self.velocity,
        }
    }

    /// Start time of the acknowledged move, if any.
    pub fn acknowledged_time(&self) -> Option<f64> {
        self.last_processed_move.map(|mv| mv.start_time)
    }
}
