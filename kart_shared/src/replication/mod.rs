//! Movement replication.
//!
//! Every kart is driven by exactly one of three roles on each peer:
//! - [`Authority`]: the canonical copy (server, or host acting as server)
//! - [`Predictor`]: the client controlling the kart
//! - [`RemoteInterpolator`]: every other client
//!
//! The role is picked once when the kart appears on a peer and wrapped in a
//! [`Replicator`]. The tick loop then calls the same three entry points on
//! every kart without branching on roles itself.

pub mod authority;
pub mod interpolation;
pub mod prediction;
pub mod queue;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clock::SessionClock,
    input::InputState,
    movement::{Move, VehicleState},
};

pub use authority::{Authority, MoveRejected, ValidationPolicy};
pub use interpolation::RemoteInterpolator;
pub use prediction::Predictor;
pub use queue::PendingMoveQueue;
pub use state::{ServerState, Transform};

/// Local role of a kart on this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetRole {
    Authority,
    AutonomousProxy,
    SimulatedProxy,
}

impl NetRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NetRole::Authority => "Authority",
            NetRole::AutonomousProxy => "AutonomousProxy",
            NetRole::SimulatedProxy => "SimulatedProxy",
        }
    }
}

impl fmt::Display for NetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kart's movement driver on one peer.
#[derive(Debug, Clone)]
pub enum Replicator {
    Authority(Authority),
    Predicting(Predictor),
    Observing(RemoteInterpolator),
}

impl Replicator {
    pub fn role(&self) -> NetRole {
        match self {
            Replicator::Authority(_) => NetRole::Authority,
            Replicator::Predicting(_) => NetRole::AutonomousProxy,
            Replicator::Observing(_) => NetRole::SimulatedProxy,
        }
    }

    /// Fixed-step update. Returns a move that must be sent to the authority.
    pub fn on_tick(&mut self, dt: f32, input: InputState, clock: &dyn SessionClock) -> Option<Move> {
        match self {
            Replicator::Authority(auth) => {
                auth.on_tick(dt, input, clock);
                None
            }
            Replicator::Predicting(pred) => pred.on_tick(dt, input, clock),
            Replicator::Observing(interp) => {
                interp.on_tick(dt);
                None
            }
        }
    }

    /// A move arrived from the controlling peer. Only the authority applies it.
    pub fn on_move_received(&mut self, mv: Move) -> Result<(), MoveRejected> {
        match self {
            Replicator::Authority(auth) => auth.submit_move(mv).map(|_| ()),
            other => {
                debug!(role = %other.role(), "Move ignored outside authority");
                Ok(())
            }
        }
    }

    /// A snapshot arrived. The authority already owns the newest state.
    pub fn on_snapshot_received(&mut self, snapshot: &ServerState) -> bool {
        match self {
            Replicator::Authority(_) => false,
            Replicator::Predicting(pred) => pred.on_snapshot_received(snapshot),
            Replicator::Observing(interp) => interp.on_snapshot_received(snapshot),
        }
    }

    pub fn vehicle_state(&self) -> &VehicleState {
        match self {
            Replicator::Authority(auth) => auth.vehicle_state(),
            Replicator::Predicting(pred) => pred.vehicle_state(),
            Replicator::Observing(interp) => interp.vehicle_state(),
        }
    }

    pub fn as_authority_mut(&mut self) -> Option<&mut Authority> {
        match self {
            Replicator::Authority(auth) => Some(auth),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, movement::MovementSimulator};

    fn spawn() -> VehicleState {
        VehicleState::default()
    }

    #[test]
    fn roles_are_named() {
        let r = Replicator::Observing(RemoteInterpolator::new(spawn()));
        assert_eq!(r.role(), NetRole::SimulatedProxy);
        assert_eq!(NetRole::AutonomousProxy.to_string(), "AutonomousProxy");
    }

    #[test]
    fn only_predictor_emits_moves() {
        let clock = ManualClock::new(1.0);
        let input = InputState::new(1.0, 0.0);
        let sim = MovementSimulator::default();

        let mut pred = Replicator::Predicting(Predictor::new(sim.clone(), spawn(), 8));
        assert!(pred.on_tick(0.1, input, &clock).is_some());

        let mut host = Replicator::Authority(
            Authority::new(sim.clone(), spawn(), ValidationPolicy::Strict).with_local_control(),
        );
        assert!(host.on_tick(0.1, input, &clock).is_none());
        assert!(host.vehicle_state().velocity.x > 0.0);

        let mut obs = Replicator::Observing(RemoteInterpolator::new(spawn()));
        assert!(obs.on_tick(0.1, input, &clock).is_none());
        assert_eq!(*obs.vehicle_state(), spawn());
    }

    #[test]
    fn moves_and_snapshots_route_by_role() {
        let sim = MovementSimulator::default();
        let mv = Move::new(1.0, 0.0, 0.1, 1.0);

        let mut auth = Replicator::Authority(Authority::new(sim, spawn(), ValidationPolicy::Strict));
        auth.on_move_received(mv).unwrap();
        let snap = *auth.as_authority_mut().unwrap().server_state();
        assert!(!auth.on_snapshot_received(&snap));
        assert_eq!(
            auth.on_move_received(Move::new(5.0, 0.0, 0.1, 2.0)),
            Err(MoveRejected::ThrottleOutOfRange(5.0))
        );

        let mut obs = Replicator::Observing(RemoteInterpolator::new(spawn()));
        assert_eq!(obs.on_move_received(mv), Ok(()));
        assert_eq!(*obs.vehicle_state(), spawn());
        assert!(obs.on_snapshot_received(&snap));
    }
}
