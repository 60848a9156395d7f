//! Power stage interface

/// Two-phase power stage
///
/// Receives the stationary-frame phase voltages computed by the FOC step or
/// an open-loop generator.
pub trait StepperDriver {
    /// Apply phase A and phase B voltages [V]
    fn set_pwm(&mut self, ua: f32, ub: f32);

    /// Switch the power stage on
    fn enable(&mut self);

    /// Switch the power stage off
    fn disable(&mut self);

    /// Highest phase voltage the stage can produce [V]
    fn voltage_limit(&self) -> f32;
}

impl<T: StepperDriver + ?Sized> StepperDriver for &mut T {
    fn set_pwm(&mut self, ua: f32, ub: f32) {
        (**self).set_pwm(ua, ub)
    }

    fn enable(&mut self) {
        (**self).enable()
    }

    fn disable(&mut self) {
        (**self).disable()
    }

    fn voltage_limit(&self) -> f32 {
        (**self).voltage_limit()
    }
}
