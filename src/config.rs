//! Configuration module
//!
//! Default parameters and the runtime configuration consumed by the motor.

pub mod motor;
pub mod params;

pub use motor::{MotionControlType, MotorConfig, PidConfig, TorqueControlType};
pub use params::*;
