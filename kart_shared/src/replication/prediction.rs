//! Controlling-client role: predict locally, reconcile on snapshots.
//!
//! Reconciliation baselines on the latest snapshot only. Correction accuracy
//! is therefore bounded by the snapshot rate; moves the authority has
//! already folded in but that no snapshot has covered yet are replayed on top
//! of an older baseline until the next snapshot lands.

use tracing::{debug, warn};

use crate::{
    clock::SessionClock,
    input::InputState,
    movement::{Move, MovementSimulator, VehicleState},
};

use super::{queue::PendingMoveQueue, state::ServerState};

#[derive(Debug, Clone)]
pub struct Predictor {
    sim: MovementSimulator,
    state: VehicleState,
    pending: PendingMoveQueue,
    last_correction: f32,
}

impl Predictor {
    pub fn new(sim: MovementSimulator, spawn: VehicleState, max_pending_moves: usize) -> Self {
        Self {
            sim,
            state: spawn,
            pending: PendingMoveQueue::new(max_pending_moves),
            last_correction: 0.0,
        }
    }

    /// Builds this tick's move, applies it locally and queues it.
    ///
    /// Returns the move to send to the authority, or `None` when the clock
    /// has not advanced past the previous move (the tick is skipped).
    pub fn on_tick(&mut self, dt: f32, input: InputState, clock: &dyn SessionClock) -> Option<Move> {
        let mv = input.to_move(dt, clock.now());
        if !self.pending.accepts(&mv) {
            warn!(start_time = mv.start_time, "Session clock did not advance, skipping move");
            return None;
        }
        self.state = self.sim.step(&self.state, &mv);
        self.pending.push(mv);
        Some(mv)
    }

    /// Hard-corrects to `snapshot`, drops acknowledged moves and replays the
    /// rest. Snapshots acknowledging less than one already applied are stale
    /// (the snapshot channel may reorder) and are ignored.
    ///
    /// Returns whether the snapshot was applied.
    pub fn on_snapshot_received(&mut self, snapshot: &ServerState) -> bool {
        if let Some(seen) = self.pending.acknowledged_time() {
            if snapshot.acknowledged_time().map_or(true, |ack| ack < seen) {
                debug!(?seen, ack = ?snapshot.acknowledged_time(), "Ignoring stale snapshot");
                return false;
            }
        }

        let predicted = self.state;
        self.state = snapshot.vehicle_state();
        self.pending.prune(snapshot.last_processed_move.as_ref());
        for mv in self.pending.iter() {
            self.state = self.sim.step(&self.state, mv);
        }

        self.last_correction = predicted.position.distance(self.state.position);
        debug!(
            correction = self.last_correction,
            replayed = self.pending.len(),
            "Reconciled with server state"
        );
        true
    }

    pub fn vehicle_state(&self) -> &VehicleState {
        &self.state
    }

    pub fn pending(&self) -> &PendingMoveQueue {
        &self.pending
    }

    /// Distance the last reconciliation moved the kart (m).
    pub fn last_correction(&self) -> f32 {
        self.last_correction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, replication::authority::{Authority, ValidationPolicy}};

    const DT: f32 = 1.0 / 60.0;

    fn predictor() -> Predictor {
        Predictor::new(MovementSimulator::default(), VehicleState::default(), 64)
    }

    #[test]
    fn tick_predicts_immediately_and_queues() {
        let clock = ManualClock::new(1.0);
        let mut p = predictor();
        let mv = p.on_tick(DT, InputState::new(1.0, 0.0), &clock).unwrap();

        assert_eq!(mv.start_time, 1.0);
        assert!(p.vehicle_state().velocity.x > 0.0);
        assert_eq!(p.pending().len(), 1);
    }

    #[test]
    fn stalled_clock_skips_tick() {
        let clock = ManualClock::new(1.0);
        let mut p = predictor();
        p.on_tick(DT, InputState::new(1.0, 0.0), &clock).unwrap();
        let state = *p.vehicle_state();

        assert!(p.on_tick(DT, InputState::new(1.0, 0.0), &clock).is_none());
        assert_eq!(*p.vehicle_state(), state);
        assert_eq!(p.pending().len(), 1);
    }

    #[test]
    fn reconciles_to_authority_after_partial_acknowledgement() {
        let clock = ManualClock::new(0.0);
        let mut p = predictor();
        let mut auth = Authority::new(MovementSimulator::default(), VehicleState::default(), ValidationPolicy::Strict);

        let mut sent = Vec::new();
        for i in 0..10 {
            clock.advance(DT as f64);
            let steering = if i % 3 == 0 { 0.5 } else { -0.2 };
            sent.push(p.on_tick(DT, InputState::new(1.0, steering), &clock).unwrap());
        }
        let predicted = *p.vehicle_state();

        // Authority has only seen the first six moves.
        for mv in &sent[..6] {
            auth.submit_move(*mv).unwrap();
        }
        assert!(p.on_snapshot_received(auth.server_state()));
        assert_eq!(p.pending().len(), 4);
        assert_eq!(*p.vehicle_state(), predicted);
        assert_eq!(p.last_correction(), 0.0);

        for mv in &sent[6..] {
            auth.submit_move(*mv).unwrap();
        }
        p.on_snapshot_received(auth.server_state());
        assert!(p.pending().is_empty());
        assert_eq!(p.vehicle_state(), auth.vehicle_state());
    }

    #[test]
    fn divergent_snapshot_snaps_and_replays() {
        let clock = ManualClock::new(0.0);
        let mut p = predictor();
        let mut sent = Vec::new();
        for _ in 0..4 {
            clock.advance(DT as f64);
            sent.push(p.on_tick(DT, InputState::new(1.0, 0.0), &clock).unwrap());
        }

        // Authority started from somewhere else.
        let spawn = VehicleState::at(crate::math::Vec3::new(0.0, 5.0, 0.0));
        let mut auth = Authority::new(MovementSimulator::default(), spawn, ValidationPolicy::Strict);
        auth.submit_move(sent[0]).unwrap();

        p.on_snapshot_received(auth.server_state());
        assert!((p.vehicle_state().position.y - 5.0).abs() < 1e-6);
        assert!(p.last_correction() > 4.9);
        assert_eq!(p.pending().len(), 3);
    }

    #[test]
    fn stale_snapshot_is_ignored() {
        let clock = ManualClock::new(0.0);
        let mut p = predictor();
        let mut auth = Authority::new(MovementSimulator::default(), VehicleState::default(), ValidationPolicy::Strict);
        for _ in 0..3 {
            clock.advance(DT as f64);
            let mv = p.on_tick(DT, InputState::new(1.0, 0.0), &clock).unwrap();
            auth.submit_move(mv).unwrap();
        }
        let old = ServerState::spawn(&VehicleState::default());
        let latest = *auth.server_state();

        assert!(p.on_snapshot_received(&latest));
        assert!(!p.on_snapshot_received(&old));
        assert_eq!(p.vehicle_state(), auth.vehicle_state());
    }
}
