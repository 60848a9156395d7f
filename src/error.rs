//! Error types

use core::fmt;

/// Non-fatal outcomes of sensor alignment
///
/// The motor stays usable after any of these; it keeps the prior (or
/// partially computed) calibration and runs with more torque ripple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FocError {
    /// Alignment needs a position sensor and none is linked
    NoSensor,
    /// The sensor reported the same angle before and after the sweep
    NoMovementDetected,
    /// The index search ran out of travel before the sensor found its reference
    ReferenceNotFound,
}

impl fmt::Display for FocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSensor => f.write_str("no position sensor linked"),
            Self::NoMovementDetected => f.write_str("sensor did not register movement"),
            Self::ReferenceNotFound => f.write_str("sensor reference not found"),
        }
    }
}

/// Configuration rejected by [`MotorConfig::constrain`](crate::config::MotorConfig::constrain)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Driver reports a voltage ceiling of zero
    ZeroVoltageCeiling,
    /// Pole pair count of zero
    ZeroPolePairs,
    /// Only voltage torque control is implemented
    UnsupportedTorqueControl,
    /// Index search velocity is not a positive finite number
    InvalidSearchVelocity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroVoltageCeiling => f.write_str("driver voltage ceiling is zero"),
            Self::ZeroPolePairs => f.write_str("pole pair count is zero"),
            Self::UnsupportedTorqueControl => f.write_str("torque control type not supported"),
            Self::InvalidSearchVelocity => f.write_str("index search velocity must be positive"),
        }
    }
}
