//! Observing-client role: replay snapshots along a Hermite curve.
//!
//! Observers never run the movement model for someone else's kart. Between
//! snapshots they move the rendered state along a cubic curve from wherever
//! the kart was drawn when the latest snapshot arrived to that snapshot's
//! state, matching velocities at both ends.
//!
//! The duration of the current interval is unknowable until the next
//! snapshot lands, so the previous interval stands in for it. The ratio is
//! not clamped: a late snapshot means the curve is extrapolated.

use tracing::trace;

use crate::{movement::VehicleState, spline::HermiteCubicSpline};

use super::state::ServerState;

/// Intervals shorter than this are treated as unknown.
const MIN_INTERVAL: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct RemoteInterpolator {
    rendered: VehicleState,
    start: VehicleState,
    target: Option<ServerState>,
    time_since_update: f32,
    time_between_updates: f32,
}

impl RemoteInterpolator {
    pub fn new(initial: VehicleState) -> Self {
        Self {
            rendered: initial,
            start: initial,
            target: None,
            time_since_update: 0.0,
            time_between_updates: 0.0,
        }
    }

    /// Starts a new interval towards `snapshot`.
    ///
    /// Duplicate or older snapshots (by acknowledged move) are dropped, and
    /// so is a spawn snapshot once any move has been acknowledged.
    /// Returns whether the snapshot was taken.
    pub fn on_snapshot_received(&mut self, snapshot: &ServerState) -> bool {
        let first = match &self.target {
            Some(target) => {
                if let Some(current) = target.acknowledged_time() {
                    // A snapshot acknowledging nothing predates any that does.
                    let incoming = snapshot.acknowledged_time();
                    if incoming.map_or(true, |ack| ack <= current) {
                        trace!(current, ?incoming, "Dropping out-of-date snapshot");
                        return false;
                    }
                }
                false
            }
            None => true,
        };

        // No previous arrival to measure from on the first snapshot.
        self.time_between_updates = if first { 0.0 } else { self.time_since_update };
        self.time_since_update = 0.0;
        self.start = self.rendered;
        self.target = Some(*snapshot);
        true
    }

    /// Advances the rendered state by `dt` seconds.
    pub fn on_tick(&mut self, dt: f32) {
        self.time_since_update += dt;

        let Some(target) = self.target else {
            return;
        };
        let Some(ratio) = self.lerp_ratio() else {
            return;
        };

        let interval = self.time_between_updates;
        let spline = self.spline_to(&target, interval);
        self.rendered = VehicleState {
            position: spline.position(ratio),
            orientation: self.start.orientation.slerp(target.transform.orientation, ratio),
            velocity: spline.derivative(ratio) / interval,
        };
    }

    /// Progress through the current interval, `None` while the interval is
    /// unknown.
    pub fn lerp_ratio(&self) -> Option<f32> {
        (self.time_between_updates >= MIN_INTERVAL && self.target.is_some())
            .then(|| self.time_since_update / self.time_between_updates)
    }

    /// Curve for the current interval, if one can be built.
    pub fn spline(&self) -> Option<HermiteCubicSpline> {
        self.lerp_ratio()?;
        let target = self.target?;
        Some(self.spline_to(&target, self.time_between_updates))
    }

    fn spline_to(&self, target: &ServerState, interval: f32) -> HermiteCubicSpline {
        HermiteCubicSpline {
            start_position: self.start.position,
            start_derivative: self.start.velocity * interval,
            target_position: target.transform.position,
            target_derivative: target.velocity * interval,
        }
    }

    pub fn vehicle_state(&self) -> &VehicleState {
        &self.rendered
    }

    pub fn interval(&self) -> f32 {
        self.time_between_updates
    }

    pub fn latest_snapshot(&self) -> Option<&ServerState> {
        self.target.as_ref()
    }
}
