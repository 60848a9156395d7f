//! Voltage-mode field oriented control for two-phase stepper motors
//!
//! The crate turns a torque, velocity or angle target into phase voltages
//! every control cycle:
//!
//! * [`foc`] - controllers, inverse Park transform, sensor alignment,
//!   open-loop generators and the motion loop
//! * [`motor::StepperMotor`] - one motor with its configuration, hardware
//!   links and motion state
//! * [`motor_driver::PwmStepperDriver`] - two H-bridges over
//!   `embedded_hal` PWM channels
//! * `tasks` - `embassy` task bodies (feature `embassy`)
//!
//! Hardware is reached through the [`driver::StepperDriver`],
//! [`sensor::PositionSensor`], [`current_sense::CurrentSense`] and
//! [`clock::MonotonicClock`] traits.
#![cfg_attr(not(test), no_std)]

// must stay first: the logging macros are textually scoped
mod fmt;

pub mod clock;
pub mod config;
pub mod current_sense;
pub mod driver;
pub mod error;
pub mod foc;
pub mod motor;
pub mod motor_driver;
pub mod sensor;
#[cfg(feature = "embassy")]
pub mod tasks;

pub use config::{MotionControlType, MotorConfig, PidConfig, TorqueControlType};
pub use error::{ConfigError, FocError};
pub use motor::{MotorCommand, MotorStatus, StepperMotor};
