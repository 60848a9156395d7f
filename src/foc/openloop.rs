//! Open-loop motion generators
//!
//! Integrate a shaft angle from a timing model alone. The motor drives the
//! phases at its voltage limit towards the electrical angle of the tracked
//! shaft angle, so no sensor feedback is involved.

use super::timing::{self, SampleTimer};
use super::transforms::{normalize_angle, sign};
use libm::fabsf;

/// Shaft state produced by an open-loop generator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OpenLoopState {
    /// Tracked shaft angle [rad]
    pub shaft_angle: f32,
    /// Reported shaft velocity [rad/s]
    pub shaft_velocity: f32,
}

/// Constant velocity generator
#[derive(Debug, Clone, Default)]
pub struct VelocityOpenLoop {
    timer: SampleTimer,
}

impl VelocityOpenLoop {
    pub const fn new() -> Self {
        Self {
            timer: SampleTimer::new(),
        }
    }

    /// Advance `shaft_angle` by `target_velocity · Ts`
    pub fn step(&mut self, shaft_angle: f32, target_velocity: f32, now_us: u64) -> OpenLoopState {
        let ts = self.timer.sample(now_us);
        self.step_with_ts(shaft_angle, target_velocity, ts)
    }

    pub fn step_with_ts(
        &mut self,
        shaft_angle: f32,
        target_velocity: f32,
        ts: f32,
    ) -> OpenLoopState {
        let ts = timing::sanitize(ts);
        OpenLoopState {
            shaft_angle: normalize_angle(shaft_angle + target_velocity * ts),
            shaft_velocity: target_velocity,
        }
    }

    pub fn reset(&mut self) {
        self.timer.reset();
    }
}

/// Position follower with a velocity cap
#[derive(Debug, Clone, Default)]
pub struct AngleOpenLoop {
    timer: SampleTimer,
}

impl AngleOpenLoop {
    pub const fn new() -> Self {
        Self {
            timer: SampleTimer::new(),
        }
    }

    /// Move `shaft_angle` towards `target_angle` by at most
    /// `velocity_limit · Ts`
    pub fn step(
        &mut self,
        shaft_angle: f32,
        target_angle: f32,
        velocity_limit: f32,
        now_us: u64,
    ) -> OpenLoopState {
        let ts = self.timer.sample(now_us);
        self.step_with_ts(shaft_angle, target_angle, velocity_limit, ts)
    }

    pub fn step_with_ts(
        &mut self,
        shaft_angle: f32,
        target_angle: f32,
        velocity_limit: f32,
        ts: f32,
    ) -> OpenLoopState {
        let ts = timing::sanitize(ts);
        let error = target_angle - shaft_angle;
        let max_step = fabsf(velocity_limit) * ts;

        if fabsf(error) > max_step {
            OpenLoopState {
                shaft_angle: shaft_angle + sign(error) * max_step,
                shaft_velocity: velocity_limit,
            }
        } else {
            // within one step: land exactly on the target
            OpenLoopState {
                shaft_angle: target_angle,
                shaft_velocity: 0.0,
            }
        }
    }

    pub fn reset(&mut self) {
        self.timer.reset();
    }
}
