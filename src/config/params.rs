//! Default motor and controller parameters

use core::f32::consts::PI;

/// Pole pairs of a standard 1.8° hybrid stepper (200 steps / 4)
pub const DEFAULT_POLE_PAIRS: u32 = 50;

/// Supply voltage assumed when none is configured [V]
pub const DEFAULT_POWER_SUPPLY: f32 = 12.0;

/// Phase voltage limit [V]
pub const DEFAULT_VOLTAGE_LIMIT: f32 = DEFAULT_POWER_SUPPLY;

/// Shaft velocity limit [rad/s]
pub const DEFAULT_VELOCITY_LIMIT: f32 = 20.0;

/// Voltage used while aligning the sensor [V]
pub const DEFAULT_VOLTAGE_SENSOR_ALIGN: f32 = 6.0;

/// Open-loop velocity while searching for the sensor index [rad/s]
pub const DEFAULT_VELOCITY_INDEX_SEARCH: f32 = 1.0;

/// Motion loop runs on every call
pub const DEFAULT_MOTION_DOWNSAMPLE: u32 = 0;

/// Control cycle of the async motor task [us] (1 kHz)
pub const DEFAULT_CONTROL_PERIOD_US: u64 = 1_000;

/// Velocity loop PID (output in volts)
pub mod velocity_pid {
    pub const DEFAULT_P: f32 = 0.5;
    pub const DEFAULT_I: f32 = 10.0;
    pub const DEFAULT_D: f32 = 0.0;
    /// [V/s]
    pub const DEFAULT_RAMP: f32 = 1000.0;
    pub const DEFAULT_LIMIT: f32 = super::DEFAULT_VOLTAGE_LIMIT;
}

/// Angle loop P controller (output in rad/s)
pub mod angle_p {
    pub const DEFAULT_P: f32 = 20.0;
    /// Effectively unlimited
    pub const DEFAULT_RAMP: f32 = 1e10;
    pub const DEFAULT_LIMIT: f32 = super::DEFAULT_VELOCITY_LIMIT;
}

/// Timing used by controllers and open-loop generators
pub mod timing {
    /// Sample time substituted for degenerate clock readings [s]
    pub const DEFAULT_SAMPLE_TIME: f32 = 1e-3;
    /// Longest elapsed time still treated as a valid sample [s]
    pub const MAX_SAMPLE_TIME: f32 = 0.5;
}

/// Sensor alignment sequence
pub mod alignment {
    use super::PI;

    /// Discrete steps per electrical revolution during the sweep
    pub const SWEEP_STEPS: u16 = 500;
    /// Electrical angle the sweep starts from (-90°)
    pub const SWEEP_START_ANGLE: f32 = 3.0 * PI / 2.0;
    /// Zero search gives up after this many mechanical turns
    pub const SEARCH_TURNS: f32 = 1.5;
    /// Zero search also gives up after this many steps
    pub const SEARCH_MAX_STEPS: u32 = 500_000;

    /// Settle time after the index search [ms]
    pub const SETTLE_AFTER_SEARCH_MS: u32 = 500;
    /// Hold at the sweep start angle [ms]
    pub const HOLD_MS: u32 = 500;
    /// Dwell per sweep step [ms]
    pub const SWEEP_STEP_MS: u32 = 2;
    /// Settle after the sweep before sampling the zero angle [ms]
    pub const SETTLE_AFTER_SWEEP_MS: u32 = 1000;
    /// Hold after sampling the zero angle [ms]
    pub const SETTLE_AFTER_ZERO_MS: u32 = 500;
    /// Wait after releasing the phases [ms]
    pub const RELEASE_MS: u32 = 200;
    /// Wait around the whole alignment and around power stage enable [ms]
    pub const INIT_SETTLE_MS: u32 = 500;
}
