//! Four-PWM stepper driver
//!
//! Two H-bridges, one per phase, each driven by a pair of
//! `embedded_hal` PWM channels. A positive phase voltage modulates the first
//! input of the bridge, a negative one the second.

use core::convert::Infallible;

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::pwm::SetDutyCycle;
use libm::fabsf;

use crate::driver::StepperDriver;

/// Enable line for boards whose bridges are always enabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPin;

impl digital::ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Stepper driver over four PWM channels
pub struct PwmStepperDriver<A1, A2, B1, B2, EN = NoPin> {
    in_1a: A1,
    in_1b: A2,
    in_2a: B1,
    in_2b: B2,
    enable_pin: EN,
    /// Bridge supply voltage [V]
    voltage_power_supply: f32,
    /// Phase voltage ceiling [V], never above the supply
    voltage_limit: f32,
}

impl<A1, A2, B1, B2> PwmStepperDriver<A1, A2, B1, B2, NoPin>
where
    A1: SetDutyCycle,
    A2: SetDutyCycle,
    B1: SetDutyCycle,
    B2: SetDutyCycle,
{
    /// # Arguments
    /// * `in_1a`, `in_1b` - phase A bridge inputs
    /// * `in_2a`, `in_2b` - phase B bridge inputs
    /// * `voltage_power_supply` - bridge supply [V]
    pub fn new(in_1a: A1, in_1b: A2, in_2a: B1, in_2b: B2, voltage_power_supply: f32) -> Self {
        Self {
            in_1a,
            in_1b,
            in_2a,
            in_2b,
            enable_pin: NoPin,
            voltage_power_supply,
            voltage_limit: voltage_power_supply,
        }
    }
}

impl<A1, A2, B1, B2, EN> PwmStepperDriver<A1, A2, B1, B2, EN>
where
    A1: SetDutyCycle,
    A2: SetDutyCycle,
    B1: SetDutyCycle,
    B2: SetDutyCycle,
    EN: OutputPin,
{
    /// Add an enable line, driven high while the stage is enabled
    pub fn with_enable_pin<P: OutputPin>(
        self,
        enable_pin: P,
    ) -> PwmStepperDriver<A1, A2, B1, B2, P> {
        PwmStepperDriver {
            in_1a: self.in_1a,
            in_1b: self.in_1b,
            in_2a: self.in_2a,
            in_2b: self.in_2b,
            enable_pin,
            voltage_power_supply: self.voltage_power_supply,
            voltage_limit: self.voltage_limit,
        }
    }

    /// Lower the phase voltage ceiling; values above the supply are ignored
    pub fn with_voltage_limit(mut self, voltage_limit: f32) -> Self {
        if voltage_limit > 0.0 && voltage_limit < self.voltage_power_supply {
            self.voltage_limit = voltage_limit;
        }
        self
    }

    pub fn voltage_power_supply(&self) -> f32 {
        self.voltage_power_supply
    }

    /// Give the channels back
    pub fn release(self) -> (A1, A2, B1, B2, EN) {
        (self.in_1a, self.in_1b, self.in_2a, self.in_2b, self.enable_pin)
    }

    /// Duty fraction in [0, 1] for `voltage` after clamping to the ceiling
    fn duty_fraction(&self, voltage: f32) -> f32 {
        if self.voltage_power_supply <= 0.0 {
            return 0.0;
        }
        let magnitude = fabsf(voltage).min(self.voltage_limit);
        (magnitude / self.voltage_power_supply).clamp(0.0, 1.0)
    }

    /// Modulate one input of the bridge and hold the other low
    fn drive_input<H: SetDutyCycle, L: SetDutyCycle>(active: &mut H, idle: &mut L, duty: f32) {
        let value = (duty * active.max_duty_cycle() as f32) as u16;
        let result = idle
            .set_duty_cycle_fully_off()
            .map_err(|_| ())
            .and(active.set_duty_cycle(value).map_err(|_| ()));
        if result.is_err() {
            warn!("PWM duty update failed");
        }
    }

    fn set_phase<P: SetDutyCycle, N: SetDutyCycle>(
        positive: &mut P,
        negative: &mut N,
        voltage: f32,
        duty: f32,
    ) {
        if voltage >= 0.0 {
            Self::drive_input(positive, negative, duty);
        } else {
            Self::drive_input(negative, positive, duty);
        }
    }

    fn all_off(&mut self) {
        let result = self
            .in_1a
            .set_duty_cycle_fully_off()
            .map_err(|_| ())
            .and(self.in_1b.set_duty_cycle_fully_off().map_err(|_| ()))
            .and(self.in_2a.set_duty_cycle_fully_off().map_err(|_| ()))
            .and(self.in_2b.set_duty_cycle_fully_off().map_err(|_| ()));
        if result.is_err() {
            warn!("PWM duty update failed");
        }
    }
}

impl<A1, A2, B1, B2, EN> StepperDriver for PwmStepperDriver<A1, A2, B1, B2, EN>
where
    A1: SetDutyCycle,
    A2: SetDutyCycle,
    B1: SetDutyCycle,
    B2: SetDutyCycle,
    EN: OutputPin,
{
    fn set_pwm(&mut self, ua: f32, ub: f32) {
        let duty_a = self.duty_fraction(ua);
        let duty_b = self.duty_fraction(ub);
        Self::set_phase(&mut self.in_1a, &mut self.in_1b, ua, duty_a);
        Self::set_phase(&mut self.in_2a, &mut self.in_2b, ub, duty_b);
    }

    fn enable(&mut self) {
        self.all_off();
        if self.enable_pin.set_high().is_err() {
            warn!("Driver enable pin failed");
        }
    }

    fn disable(&mut self) {
        self.all_off();
        if self.enable_pin.set_low().is_err() {
            warn!("Driver enable pin failed");
        }
    }

    fn voltage_limit(&self) -> f32 {
        self.voltage_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::pwm;

    #[derive(Debug, Default)]
    struct MockPwm {
        duty: u16,
    }

    impl pwm::ErrorType for MockPwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct MockPin {
        high: bool,
    }

    impl digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            Ok(())
        }
    }

    fn driver() -> PwmStepperDriver<MockPwm, MockPwm, MockPwm, MockPwm> {
        PwmStepperDriver::new(
            MockPwm::default(),
            MockPwm::default(),
            MockPwm::default(),
            MockPwm::default(),
            12.0,
        )
    }

    #[test]
    fn test_positive_and_negative_phase_voltage() {
        let mut driver = driver();
        driver.set_pwm(6.0, -3.0);
        let (a1, a2, b1, b2, _) = driver.release();
        assert_eq!(a1.duty, 500);
        assert_eq!(a2.duty, 0);
        assert_eq!(b1.duty, 0);
        assert_eq!(b2.duty, 250);
    }

    #[test]
    fn test_voltage_clamped_to_limit() {
        let mut driver = driver().with_voltage_limit(6.0);
        assert_eq!(driver.voltage_limit(), 6.0);
        driver.set_pwm(24.0, -24.0);
        let (a1, _, _, b2, _) = driver.release();
        assert_eq!(a1.duty, 500);
        assert_eq!(b2.duty, 500);
    }

    #[test]
    fn test_limit_never_above_supply() {
        let driver = driver().with_voltage_limit(24.0);
        assert_eq!(driver.voltage_limit(), 12.0);
    }

    #[test]
    fn test_enable_pin_follows_state() {
        let mut driver = driver().with_enable_pin(MockPin::default());
        driver.enable();
        driver.set_pwm(12.0, 12.0);
        driver.disable();
        let (a1, _, b1, _, pin) = driver.release();
        assert!(!pin.high);
        // disabling also zeroes the duty
        assert_eq!(a1.duty, 0);
        assert_eq!(b1.duty, 0);

        let mut driver = self::driver().with_enable_pin(MockPin::default());
        driver.enable();
        let (_, _, _, _, pin) = driver.release();
        assert!(pin.high);
    }
}
