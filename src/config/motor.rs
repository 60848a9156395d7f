//! Runtime motor configuration
//!
//! Everything the control core reads at setup time. Values come from
//! [`params`](super::params) unless overridden by the application.

use super::params::{self, angle_p, velocity_pid};
use crate::error::ConfigError;
use crate::foc::Direction;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the q-axis command is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TorqueControlType {
    /// q command is a phase voltage
    #[default]
    Voltage,
    /// DC current estimate (not supported by this core)
    Current,
    /// dq current loops (not supported by this core)
    FocCurrent,
}

/// Outer control loop selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MotionControlType {
    /// Target is the q-axis voltage
    Torque,
    /// Target is a shaft velocity [rad/s]
    #[default]
    Velocity,
    /// Target is a shaft angle [rad]
    Angle,
    /// Target is a shaft velocity, no sensor feedback
    VelocityOpenLoop,
    /// Target is a shaft angle, no sensor feedback
    AngleOpenLoop,
}

impl MotionControlType {
    /// Open-loop modes drive the phases themselves and bypass the FOC step
    pub const fn is_open_loop(self) -> bool {
        matches!(self, Self::VelocityOpenLoop | Self::AngleOpenLoop)
    }
}

/// Gains and limits of one regulator
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PidConfig {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    /// Maximum output slew [units/s], `<= 0` disables the ramp
    pub output_ramp: f32,
    /// Symmetric output bound
    pub limit: f32,
}

impl PidConfig {
    pub const fn new(p: f32, i: f32, d: f32, output_ramp: f32, limit: f32) -> Self {
        Self {
            p,
            i,
            d,
            output_ramp,
            limit,
        }
    }

    pub const fn velocity_default() -> Self {
        Self::new(
            velocity_pid::DEFAULT_P,
            velocity_pid::DEFAULT_I,
            velocity_pid::DEFAULT_D,
            velocity_pid::DEFAULT_RAMP,
            velocity_pid::DEFAULT_LIMIT,
        )
    }

    pub const fn angle_default() -> Self {
        Self::new(
            angle_p::DEFAULT_P,
            0.0,
            0.0,
            angle_p::DEFAULT_RAMP,
            angle_p::DEFAULT_LIMIT,
        )
    }
}

/// Static motor parameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotorConfig {
    // === Motor ===
    pub pole_pairs: u32,

    // === Control selection ===
    pub torque_control: TorqueControlType,
    pub motion_control: MotionControlType,

    // === Limits ===
    /// Phase voltage limit [V], clamped to the driver ceiling on init
    pub voltage_limit: f32,
    /// Shaft velocity limit [rad/s]
    pub velocity_limit: f32,

    // === Alignment ===
    /// Voltage applied while sweeping [V], never above `voltage_limit`
    pub voltage_sensor_align: f32,
    /// Open-loop velocity of the index search [rad/s]
    pub velocity_index_search: f32,
    /// Known electrical zero [rad]; skips the alignment sweep when set
    pub zero_electric_offset: Option<f32>,
    /// Sensor direction used together with `zero_electric_offset`, and the
    /// prior direction kept when alignment cannot detect movement
    pub sensor_direction: Direction,

    // === Loops ===
    /// Run the motion loop once every `motion_downsample` calls
    pub motion_downsample: u32,
    pub pid_velocity: PidConfig,
    /// Only `p`, `output_ramp` and `limit` are used
    pub p_angle: PidConfig,

    /// Use the fixed-point sine/cosine instead of `libm`
    pub fast_trig: bool,
}

impl MotorConfig {
    pub const fn new(pole_pairs: u32) -> Self {
        Self {
            pole_pairs,
            torque_control: TorqueControlType::Voltage,
            motion_control: MotionControlType::Velocity,
            voltage_limit: params::DEFAULT_VOLTAGE_LIMIT,
            velocity_limit: params::DEFAULT_VELOCITY_LIMIT,
            voltage_sensor_align: params::DEFAULT_VOLTAGE_SENSOR_ALIGN,
            velocity_index_search: params::DEFAULT_VELOCITY_INDEX_SEARCH,
            zero_electric_offset: None,
            sensor_direction: Direction::Unknown,
            motion_downsample: params::DEFAULT_MOTION_DOWNSAMPLE,
            pid_velocity: PidConfig::velocity_default(),
            p_angle: PidConfig::angle_default(),
            fast_trig: true,
        }
    }

    /// Check the configuration against the driver and pull the voltages
    /// under its ceiling.
    pub fn constrain(&mut self, driver_voltage_limit: f32) -> Result<(), ConfigError> {
        if driver_voltage_limit <= 0.0 {
            return Err(ConfigError::ZeroVoltageCeiling);
        }
        if self.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }
        if self.torque_control != TorqueControlType::Voltage {
            return Err(ConfigError::UnsupportedTorqueControl);
        }
        // a zero search velocity never reaches the search target
        if !(self.velocity_index_search > 0.0 && self.velocity_index_search.is_finite()) {
            return Err(ConfigError::InvalidSearchVelocity);
        }

        if self.voltage_limit > driver_voltage_limit {
            warn!(
                "Voltage limit {} V above driver ceiling, using {} V",
                self.voltage_limit,
                driver_voltage_limit
            );
            self.voltage_limit = driver_voltage_limit;
        }
        if self.voltage_sensor_align > self.voltage_limit {
            self.voltage_sensor_align = self.voltage_limit;
        }

        // the velocity loop outputs volts, the angle loop outputs rad/s
        self.pid_velocity.limit = self.voltage_limit;
        self.p_angle.limit = self.velocity_limit;
        Ok(())
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::new(params::DEFAULT_POLE_PAIRS)
    }
}
