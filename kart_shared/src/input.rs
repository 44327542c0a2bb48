//! Control input.
//!
//! Device binding lives outside this crate. Whatever samples the device
//! hands an [`InputState`] to the controlling role once per tick, which
//! turns it into a [`Move`].

use serde::{Deserialize, Serialize};

use crate::movement::Move;

/// Throttle and steering sampled for one tick, each in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub throttle: f32,
    pub steering: f32,
}

impl InputState {
    /// Builds an input, clamping both axes into range. NaN reads as zero.
    pub fn new(throttle: f32, steering: f32) -> Self {
        Self {
            throttle: clamp_axis(throttle),
            steering: clamp_axis(steering),
        }
    }

    /// Turns this sample into a move stamped with session time.
    pub fn to_move(self, delta_time: f32, start_time: f64) -> Move {
        Move::new(self.throttle, self.steering, delta_time, start_time)
    }
}

fn clamp_axis(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-1.0, 1.0)
    }
}

/// Source of per-tick control samples.
pub trait ControlInput {
    fn sample(&mut self, dt: f32) -> InputState;
}

impl ControlInput for InputState {
    fn sample(&mut self, _dt: f32) -> InputState {
        *self
    }
}

/// Headless driver: fixed throttle, steering that optionally weaves
/// sinusoidally with the given period.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedInput {
    pub throttle: f32,
    pub steering: f32,
    pub weave_period: Option<f32>,
    elapsed: f32,
}

impl ScriptedInput {
    pub fn new(throttle: f32, steering: f32) -> Self {
        Self {
            throttle,
            steering,
            weave_period: None,
            elapsed: 0.0,
        }
    }

    pub fn weaving(mut self, period: f32) -> Self {
        self.weave_period = (period > 0.0).then_some(period);
        self
    }
}

impl ControlInput for ScriptedInput {
    fn sample(&mut self, dt: f32) -> InputState {
        self.elapsed += dt;
        let steering = match self.weave_period {
            Some(period) => self.steering * (self.elapsed * std::f32::consts::TAU / period).sin(),
            None => self.steering,
        };
        InputState::new(self.throttle, steering)
    }
}
