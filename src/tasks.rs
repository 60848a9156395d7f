//! Async tasks
//!
//! Generic bodies for `embassy` applications. The application wraps them in
//! its own `#[embassy_executor::task]` with concrete driver, sensor and
//! channel types.

pub mod motor_control;

pub use motor_control::{init_foc_async, motor_control, CommandChannel, StatusSignal};
