// FOC (Field Oriented Control) module
// Voltage-mode FOC for two-phase stepper motors

pub mod calibration;
pub mod motion;
pub mod openloop;
pub mod pid_controller;
pub mod timing;
pub mod transforms;

// Re-export main types for easier access
pub use calibration::{
    CalibrationPlant, CalibrationResult, CalibrationState, CalibrationStep, Direction,
    SensorAlignment,
};
pub use motion::{MotionController, MotionFeedback, MotionLimits, MotionOutput};
pub use openloop::{AngleOpenLoop, OpenLoopState, VelocityOpenLoop};
pub use pid_controller::{PController, PidController, Regulator};
pub use timing::SampleTimer;
pub use transforms::{
    electrical_angle, inverse_park, limit_voltage, normalize_angle, AlphaBetaVoltage, DqVoltage,
    TrigMode,
};
