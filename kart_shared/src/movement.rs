//! Kart movement.
//!
//! [`MovementSimulator::step`] is the single place where control input turns
//! into motion. Authority, prediction and replay all call it, so it must stay
//! a pure function of `(state, move, constants)`: no clocks, no globals, no
//! randomness, and a fixed order of floating point operations.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    math::{Quat, Vec3},
    physics::{CollisionSweep, OpenGround},
};

/// One tick of control input, stamped with session time.
///
/// Moves are immutable once built; `start_time` orders them per sender.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub throttle: f32,
    pub steering_throw: f32,
    pub delta_time: f32,
    pub start_time: f64,
}

impl Move {
    pub fn new(throttle: f32, steering_throw: f32, delta_time: f32, start_time: f64) -> Self {
        Self {
            throttle,
            steering_throw,
            delta_time,
            start_time,
        }
    }
}

/// Physical state of a kart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct VehicleState {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
}

impl VehicleState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn forward(&self) -> Vec3 {
        forward_axis(self.orientation)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite() && self.velocity.is_finite()
    }
}

/// Tunables for the movement model. Units are SI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConstants {
    /// Mass of the kart (kg).
    pub mass: f32,
    /// Force applied with the throttle fully down (N).
    pub max_driving_force: f32,
    /// Radius of the turning circle at full lock (m).
    pub min_turning_radius: f32,
    /// Higher means more drag (kg/m).
    pub drag_coefficient: f32,
    /// Higher means more rolling resistance.
    pub rolling_resistance_coefficient: f32,
    /// Magnitude of gravity (m/s^2).
    pub gravity: f32,
}

impl Default for MovementConstants {
    fn default() -> Self {
        Self {
            mass: 1000.0,
            max_driving_force: 10_000.0,
            min_turning_radius: 10.0,
            drag_coefficient: 16.0,
            rolling_resistance_coefficient: 0.015,
            gravity: 9.81,
        }
    }
}

pub fn forward_axis(orientation: Quat) -> Vec3 {
    orientation.rotate(Vec3::X)
}

/// Deterministic movement step shared by every role.
#[derive(Clone)]
pub struct MovementSimulator {
    constants: MovementConstants,
    collision: Arc<dyn CollisionSweep>,
}

impl fmt::Debug for MovementSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MovementSimulator")
            .field("constants", &self.constants)
            .finish_non_exhaustive()
    }
}

impl Default for MovementSimulator {
    fn default() -> Self {
        Self::new(MovementConstants::default())
    }
}

impl MovementSimulator {
    /// Simulator with no collision geometry.
    pub fn new(constants: MovementConstants) -> Self {
        Self::with_collision(constants, Arc::new(OpenGround))
    }

    pub fn with_collision(constants: MovementConstants, collision: Arc<dyn CollisionSweep>) -> Self {
        Self {
            constants,
            collision,
        }
    }

    pub fn constants(&self) -> &MovementConstants {
        &self.constants
    }

    /// Advances `state` by one move.
    pub fn step(&self, state: &VehicleState, mv: &Move) -> VehicleState {
        let c = &self.constants;
        let dt = mv.delta_time;
        let forward = forward_axis(state.orientation);

        let driving_force = forward * (c.max_driving_force * mv.throttle);
        let force = driving_force + self.air_resistance(state.velocity) + self.rolling_resistance(state.velocity);
        let acceleration = force / c.mass;
        let velocity = state.velocity + acceleration * dt;

        let (orientation, velocity) = self.apply_rotation(state.orientation, velocity, dt, mv.steering_throw);

        let hit = self.collision.sweep(state.position, velocity * dt);
        let velocity = if hit.blocked { Vec3::ZERO } else { velocity };

        VehicleState {
            position: hit.position,
            orientation,
            velocity,
        }
    }

    fn air_resistance(&self, velocity: Vec3) -> Vec3 {
        -velocity.normalize_or_zero() * velocity.len_sq() * self.constants.drag_coefficient
    }

    fn rolling_resistance(&self, velocity: Vec3) -> Vec3 {
        let c = &self.constants;
        let normal_force = c.mass * c.gravity;
        -velocity.normalize_or_zero() * (c.rolling_resistance_coefficient * normal_force)
    }

    fn apply_rotation(&self, orientation: Quat, velocity: Vec3, dt: f32, steering_throw: f32) -> (Quat, Vec3) {
        let forward = forward_axis(orientation);
        let delta_location = forward.dot(velocity) * dt;
        let turn_angle = delta_location / self.constants.min_turning_radius * steering_throw;
        let turn = Quat::from_axis_angle(Vec3::Z, turn_angle);
        ((turn * orientation).normalize(), turn.rotate(velocity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Arena;
    use approx::assert_relative_eq;

    fn frictionless() -> MovementConstants {
        MovementConstants {
            drag_coefficient: 0.0,
            rolling_resistance_coefficient: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn full_throttle_from_rest_reaches_one_meter_per_second() {
        let sim = MovementSimulator::new(frictionless());
        let mv = Move::new(1.0, 0.0, 0.1, 0.0);
        let next = sim.step(&VehicleState::default(), &mv);

        assert_relative_eq!(next.velocity.len(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(next.velocity.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(next.position.x, 0.1, epsilon = 1e-6);
        assert_eq!(next.orientation, Quat::IDENTITY);
    }

    #[test]
    fn resting_kart_with_resistance_stays_finite() {
        let sim = MovementSimulator::default();
        let mv = Move::new(0.0, 1.0, 0.1, 0.0);
        let next = sim.step(&VehicleState::default(), &mv);
        assert!(next.is_finite());
        assert_eq!(next.velocity, Vec3::ZERO);
        assert_eq!(next.position, Vec3::ZERO);
    }

    #[test]
    fn step_is_deterministic() {
        let sim = MovementSimulator::default();
        let mut a = VehicleState::default();
        let mut b = VehicleState::default();
        for i in 0..200 {
            let mv = Move::new(1.0, ((i as f32) * 0.1).sin(), 1.0 / 60.0, i as f64 / 60.0);
            a = sim.step(&a, &mv);
            b = sim.clone().step(&b, &mv);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn resistance_opposes_motion() {
        let sim = MovementSimulator::default();
        let state = VehicleState {
            velocity: Vec3::new(20.0, 0.0, 0.0),
            ..Default::default()
        };
        let next = sim.step(&state, &Move::new(0.0, 0.0, 0.1, 0.0));
        // drag 16 * 400 + rolling 0.015 * 1000 * 9.81 = 6547.15 N
        assert_relative_eq!(next.velocity.x, 20.0 - 0.654715, epsilon = 1e-4);
    }

    #[test]
    fn steering_turns_velocity_and_heading_together() {
        let sim = MovementSimulator::new(frictionless());
        let state = VehicleState {
            velocity: Vec3::new(10.0, 0.0, 0.0),
            ..Default::default()
        };
        let next = sim.step(&state, &Move::new(0.0, 1.0, 0.1, 0.0));

        // 10 m/s * 0.1 s / 10 m radius = 0.1 rad of yaw.
        let heading = next.forward();
        assert_relative_eq!(heading.y.atan2(heading.x), 0.1, epsilon = 1e-5);
        let v = next.velocity;
        assert_relative_eq!(v.y.atan2(v.x), 0.1, epsilon = 1e-5);
        assert_relative_eq!(v.len(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn reversing_turns_the_other_way() {
        let sim = MovementSimulator::new(frictionless());
        let state = VehicleState {
            velocity: Vec3::new(-10.0, 0.0, 0.0),
            ..Default::default()
        };
        let next = sim.step(&state, &Move::new(0.0, 1.0, 0.1, 0.0));
        let heading = next.forward();
        assert_relative_eq!(heading.y.atan2(heading.x), -0.1, epsilon = 1e-5);
    }

    #[test]
    fn blocking_hit_is_a_hard_stop() {
        let sim = MovementSimulator::with_collision(frictionless(), Arc::new(Arena::new(5.0, 5.0)));
        let state = VehicleState {
            position: Vec3::new(4.5, 0.0, 0.0),
            velocity: Vec3::new(10.0, 0.0, 0.0),
            ..Default::default()
        };
        let next = sim.step(&state, &Move::new(1.0, 0.0, 0.1, 0.0));
        assert_eq!(next.velocity, Vec3::ZERO);
        assert_relative_eq!(next.position.x, 5.0);
    }
}
