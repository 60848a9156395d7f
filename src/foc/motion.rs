//! Motion control loop
//!
//! Cascades the outer controllers into a dq voltage command, or hands the
//! shaft over to an open-loop generator. Controllers persist across mode
//! switches; their history is only cleared by an explicit reset.

use super::openloop::{AngleOpenLoop, OpenLoopState, VelocityOpenLoop};
use super::pid_controller::{PController, PidController, Regulator};
use super::transforms::{limit_voltage, DqVoltage};
use crate::config::{MotionControlType, MotorConfig};

/// Shaft measurement fed to the motion loop
///
/// In open-loop modes this is the tracked (not measured) shaft state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionFeedback {
    /// [rad]
    pub shaft_angle: f32,
    /// [rad/s]
    pub shaft_velocity: f32,
}

/// Output limits for one motion step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    /// Phase voltage limit [V]
    pub voltage: f32,
    /// Shaft velocity limit [rad/s]
    pub velocity: f32,
}

/// What the motion loop decided for this cycle
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionOutput {
    /// Closed-loop modes: voltage for the FOC step
    Voltage(DqVoltage),
    /// Open-loop modes: drive the phases at the voltage limit towards the
    /// tracked shaft angle, bypassing the FOC step
    OpenLoop(OpenLoopState),
}

/// Outer loop state: controllers, generators and setpoints
#[derive(Debug, Clone)]
pub struct MotionController {
    pid_velocity: PidController,
    p_angle: PController,
    velocity_open_loop: VelocityOpenLoop,
    angle_open_loop: AngleOpenLoop,

    downsample: u32,
    downsample_cnt: u32,

    target: f32,
    shaft_angle_sp: f32,
    shaft_velocity_sp: f32,
}

impl MotionController {
    pub fn new(config: &MotorConfig) -> Self {
        Self {
            pid_velocity: PidController::from_config(&config.pid_velocity),
            p_angle: PController::from_config(&config.p_angle),
            velocity_open_loop: VelocityOpenLoop::new(),
            angle_open_loop: AngleOpenLoop::new(),
            downsample: config.motion_downsample,
            downsample_cnt: 0,
            target: 0.0,
            shaft_angle_sp: 0.0,
            shaft_velocity_sp: 0.0,
        }
    }

    /// Run the loop for one call
    ///
    /// Returns `None` on calls skipped by the downsampler. `new_target`
    /// replaces the stored target only on calls that run.
    pub fn step(
        &mut self,
        mode: MotionControlType,
        new_target: Option<f32>,
        feedback: MotionFeedback,
        limits: MotionLimits,
        now_us: u64,
    ) -> Option<MotionOutput> {
        if self.downsample > 0 {
            self.downsample_cnt += 1;
            if self.downsample_cnt < self.downsample {
                return None;
            }
            self.downsample_cnt = 0;
        }

        if let Some(target) = new_target {
            self.target = target;
        }

        let output = match mode {
            MotionControlType::Torque => {
                let voltage = DqVoltage::new(self.target, 0.0);
                MotionOutput::Voltage(limit_voltage(voltage, limits.voltage))
            }
            MotionControlType::Angle => {
                self.shaft_angle_sp = self.target;
                self.shaft_velocity_sp = self
                    .p_angle
                    .update(self.shaft_angle_sp - feedback.shaft_angle, now_us);
                let q = self
                    .pid_velocity
                    .update(self.shaft_velocity_sp - feedback.shaft_velocity, now_us);
                MotionOutput::Voltage(DqVoltage::new(q, 0.0))
            }
            MotionControlType::Velocity => {
                self.shaft_velocity_sp = self.target;
                let q = self
                    .pid_velocity
                    .update(self.shaft_velocity_sp - feedback.shaft_velocity, now_us);
                MotionOutput::Voltage(DqVoltage::new(q, 0.0))
            }
            MotionControlType::VelocityOpenLoop => {
                self.shaft_velocity_sp = self.target;
                MotionOutput::OpenLoop(self.velocity_open_loop.step(
                    feedback.shaft_angle,
                    self.shaft_velocity_sp,
                    now_us,
                ))
            }
            MotionControlType::AngleOpenLoop => {
                self.shaft_angle_sp = self.target;
                MotionOutput::OpenLoop(self.angle_open_loop.step(
                    feedback.shaft_angle,
                    self.shaft_angle_sp,
                    limits.velocity,
                    now_us,
                ))
            }
        };

        Some(output)
    }

    /// One step of the angle generator outside the motion loop (index search)
    pub fn open_loop_move(
        &mut self,
        shaft_angle: f32,
        target_angle: f32,
        velocity_limit: f32,
        now_us: u64,
    ) -> OpenLoopState {
        self.angle_open_loop
            .step(shaft_angle, target_angle, velocity_limit, now_us)
    }

    /// Clear controller and generator history
    pub fn reset(&mut self) {
        self.pid_velocity.reset();
        self.p_angle.reset();
        self.velocity_open_loop.reset();
        self.angle_open_loop.reset();
        self.downsample_cnt = 0;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn shaft_angle_sp(&self) -> f32 {
        self.shaft_angle_sp
    }

    pub fn shaft_velocity_sp(&self) -> f32 {
        self.shaft_velocity_sp
    }

    pub fn pid_velocity(&self) -> &PidController {
        &self.pid_velocity
    }

    pub fn pid_velocity_mut(&mut self) -> &mut PidController {
        &mut self.pid_velocity
    }

    pub fn p_angle(&self) -> &PController {
        &self.p_angle
    }

    pub fn p_angle_mut(&mut self) -> &mut PController {
        &mut self.p_angle
    }
}
