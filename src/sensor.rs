//! Position sensor interface

/// Shaft position sensor (encoder, magnetic sensor, ...)
pub trait PositionSensor {
    /// Shaft angle [rad], unwrapped
    fn shaft_angle(&mut self) -> f32;

    /// Shaft velocity [rad/s]
    fn shaft_velocity(&mut self) -> f32;

    /// Sensor has an absolute reference (index) it has not found yet
    fn needs_search(&mut self) -> bool {
        false
    }
}

impl<T: PositionSensor + ?Sized> PositionSensor for &mut T {
    fn shaft_angle(&mut self) -> f32 {
        (**self).shaft_angle()
    }

    fn shaft_velocity(&mut self) -> f32 {
        (**self).shaft_velocity()
    }

    fn needs_search(&mut self) -> bool {
        (**self).needs_search()
    }
}

/// Placeholder for motors run open-loop only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSensor;

impl PositionSensor for NoSensor {
    fn shaft_angle(&mut self) -> f32 {
        0.0
    }

    fn shaft_velocity(&mut self) -> f32 {
        0.0
    }
}
