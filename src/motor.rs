//! Stepper motor
//!
//! Owns the configuration, the hardware links and the motion state of one
//! motor. Two entry points run per control cycle: [`StepperMotor::loop_foc`]
//! (inner rate) and [`StepperMotor::move_to`] (outer, possibly downsampled
//! rate); [`StepperMotor::tick`] runs both.

use embedded_hal::delay::DelayNs;

use crate::clock::MonotonicClock;
use crate::config::alignment::INIT_SETTLE_MS;
use crate::config::{MotionControlType, MotorConfig};
use crate::current_sense::{CurrentSense, NoCurrentSense, PhaseCurrents};
use crate::driver::StepperDriver;
use crate::error::{ConfigError, FocError};
use crate::foc::{
    electrical_angle, inverse_park, normalize_angle, AlphaBetaVoltage, CalibrationPlant,
    CalibrationResult, DqVoltage, MotionController, MotionFeedback, MotionLimits, MotionOutput,
    SensorAlignment, TrigMode,
};
use crate::sensor::PositionSensor;

/// Runtime command, e.g. received from a host link
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorCommand {
    /// New target in the units of the active mode
    Target(f32),
    Enable,
    Disable,
    /// Switch the motion mode; controller history is kept
    Mode(MotionControlType),
}

/// Snapshot of the motion state
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorStatus {
    pub enabled: bool,
    pub mode: MotionControlType,
    pub target: f32,
    /// [rad]
    pub shaft_angle: f32,
    /// [rad/s]
    pub shaft_velocity: f32,
    pub shaft_angle_sp: f32,
    pub shaft_velocity_sp: f32,
    /// Last dq command [V]
    pub voltage: DqVoltage,
    /// Last phase voltages sent to the driver [V]
    pub phase_voltage: AlphaBetaVoltage,
    /// [rad], in [0, 2π)
    pub electrical_angle: f32,
    pub calibration: CalibrationResult,
    /// Present only with a linked current sense
    pub currents: Option<PhaseCurrents>,
}

/// Motion state owned by the motor
#[derive(Debug, Clone, Copy, Default)]
struct MotionState {
    shaft_angle: f32,
    shaft_velocity: f32,
    voltage: DqVoltage,
    phase_voltage: AlphaBetaVoltage,
    electrical_angle: f32,
}

pub(crate) enum AlignmentStart {
    Run(SensorAlignment),
    Skip(Result<CalibrationResult, FocError>),
}

/// One two-phase motor
pub struct StepperMotor<D, S, C, I = NoCurrentSense> {
    config: MotorConfig,
    driver: D,
    sensor: Option<S>,
    current_sense: Option<I>,
    clock: C,

    calibration: CalibrationResult,
    motion: MotionController,
    state: MotionState,
    trig: TrigMode,
    enabled: bool,
}

impl<D, S, C> StepperMotor<D, S, C, NoCurrentSense> {
    /// Create a disabled motor; call [`init`](Self::init) before use
    pub fn new(config: MotorConfig, driver: D, clock: C) -> Self {
        Self {
            calibration: CalibrationResult::new(
                config.zero_electric_offset.unwrap_or(0.0),
                config.sensor_direction,
            ),
            motion: MotionController::new(&config),
            trig: TrigMode::from_fast(config.fast_trig),
            config,
            driver,
            sensor: None,
            current_sense: None,
            clock,
            state: MotionState::default(),
            enabled: false,
        }
    }
}

impl<D, S, C, I> StepperMotor<D, S, C, I> {
    /// Link phase current measurement, reported in [`MotorStatus::currents`]
    pub fn with_current_sense<J>(self, current_sense: J) -> StepperMotor<D, S, C, J> {
        StepperMotor {
            config: self.config,
            driver: self.driver,
            sensor: self.sensor,
            current_sense: Some(current_sense),
            clock: self.clock,
            calibration: self.calibration,
            motion: self.motion,
            state: self.state,
            trig: self.trig,
            enabled: self.enabled,
        }
    }
}

impl<D, S, C, I> StepperMotor<D, S, C, I>
where
    D: StepperDriver,
    S: PositionSensor,
    C: MonotonicClock,
    I: CurrentSense,
{
    pub fn link_sensor(&mut self, sensor: S) {
        self.sensor = Some(sensor);
    }

    /// Validate the configuration against the driver, then enable
    ///
    /// Limits are propagated to the controllers, which start with an empty
    /// history.
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), ConfigError> {
        info!("MOT: Init variables");
        self.config.constrain(self.driver.voltage_limit())?;
        self.motion = MotionController::new(&self.config);
        self.trig = TrigMode::from_fast(self.config.fast_trig);

        delay.delay_ms(INIT_SETTLE_MS);
        info!("MOT: Enable");
        self.enable();
        delay.delay_ms(INIT_SETTLE_MS);
        Ok(())
    }

    /// Power stage on, zero voltage
    pub fn enable(&mut self) {
        self.driver.enable();
        self.driver.set_pwm(0.0, 0.0);
        self.enabled = true;
    }

    /// Zero voltage, power stage off
    pub fn disable(&mut self) {
        self.driver.set_pwm(0.0, 0.0);
        self.driver.disable();
        self.enabled = false;
    }

    /// Calibrate the sensor against the electrical field (blocking)
    ///
    /// With a preset offset in the configuration the sweep is skipped and
    /// the preset is adopted as is. On failure the motor keeps whatever
    /// the alignment could determine and stays usable.
    pub fn init_foc(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<CalibrationResult, FocError> {
        let mut alignment = match self.begin_alignment() {
            AlignmentStart::Run(alignment) => alignment,
            AlignmentStart::Skip(outcome) => return outcome,
        };

        delay.delay_ms(INIT_SETTLE_MS);
        let outcome = alignment.run(self, |ms| delay.delay_ms(ms));
        self.finish_alignment(&alignment, outcome);
        delay.delay_ms(INIT_SETTLE_MS);
        outcome
    }

    /// Preset offset or missing sensor short-cut the alignment
    pub(crate) fn begin_alignment(&mut self) -> AlignmentStart {
        if let Some(offset) = self.config.zero_electric_offset {
            self.calibration = CalibrationResult::new(offset, self.config.sensor_direction);
            info!(
                "MOT: Using preset zero offset {} rad",
                self.calibration.zero_electric_angle
            );
            return AlignmentStart::Skip(Ok(self.calibration));
        }
        if self.sensor.is_none() {
            error!("MOT: No sensor");
            return AlignmentStart::Skip(Err(FocError::NoSensor));
        }

        AlignmentStart::Run(SensorAlignment::new(
            self.config.pole_pairs,
            self.config.voltage_sensor_align,
            self.config.velocity_index_search,
            self.calibration,
        ))
    }

    /// Adopt the alignment result and resync the shaft angle
    pub(crate) fn finish_alignment(
        &mut self,
        alignment: &SensorAlignment,
        outcome: Result<CalibrationResult, FocError>,
    ) {
        self.calibration = alignment.result();
        self.state.shaft_angle = self.shaft_angle();
        match outcome {
            Ok(_) => info!("MOT: Motor ready"),
            Err(_) => warn!("MOT: Alignment failed, running uncalibrated"),
        }
    }

    /// Direction-corrected sensor angle, or the tracked angle without a sensor
    fn shaft_angle(&mut self) -> f32 {
        let sign = self.calibration.sensor_direction.sign();
        match self.sensor.as_mut() {
            Some(sensor) => sign * sensor.shaft_angle(),
            None => self.state.shaft_angle,
        }
    }

    fn shaft_velocity(&mut self) -> f32 {
        let sign = self.calibration.sensor_direction.sign();
        match self.sensor.as_mut() {
            Some(sensor) => sign * sensor.shaft_velocity(),
            None => self.state.shaft_velocity,
        }
    }

    /// Inner loop: apply the stored dq voltage at the measured rotor angle
    ///
    /// Does nothing while disabled, in open-loop modes or without a sensor.
    pub fn loop_foc(&mut self) {
        if !self.enabled || self.config.motion_control.is_open_loop() || self.sensor.is_none() {
            return;
        }

        self.state.shaft_angle = self.shaft_angle();
        let angle_el = normalize_angle(
            electrical_angle(self.state.shaft_angle, self.config.pole_pairs)
                - self.calibration.zero_electric_angle,
        );
        self.state.electrical_angle = angle_el;
        let voltage = self.state.voltage;
        self.set_phase_voltage(voltage.q, voltage.d, angle_el);
    }

    /// Outer loop: run the active motion mode
    ///
    /// `new_target` replaces the stored target on calls that run.
    pub fn move_to(&mut self, new_target: Option<f32>) {
        if !self.enabled {
            return;
        }

        let mode = self.config.motion_control;
        if !mode.is_open_loop() {
            self.state.shaft_velocity = self.shaft_velocity();
        }
        let feedback = MotionFeedback {
            shaft_angle: self.state.shaft_angle,
            shaft_velocity: self.state.shaft_velocity,
        };
        let limits = MotionLimits {
            voltage: self.config.voltage_limit,
            velocity: self.config.velocity_limit,
        };
        let now_us = self.clock.now_us();

        match self.motion.step(mode, new_target, feedback, limits, now_us) {
            Some(MotionOutput::Voltage(voltage)) => self.state.voltage = voltage,
            Some(MotionOutput::OpenLoop(open_loop)) => {
                self.state.shaft_angle = open_loop.shaft_angle;
                self.state.shaft_velocity = open_loop.shaft_velocity;
                self.drive_open_loop();
            }
            None => {}
        }
    }

    /// Full voltage at the tracked shaft angle
    fn drive_open_loop(&mut self) {
        let uq = self.config.voltage_limit;
        let angle_el = electrical_angle(self.state.shaft_angle, self.config.pole_pairs);
        self.state.voltage = DqVoltage::new(uq, 0.0);
        self.state.electrical_angle = normalize_angle(angle_el);
        self.set_phase_voltage(uq, 0.0, angle_el);
    }

    /// One control cycle
    pub fn tick(&mut self) {
        self.loop_foc();
        self.move_to(None);
    }

    /// Modulate `(uq, ud)` at `angle_el` and send it to the driver
    pub fn set_phase_voltage(&mut self, uq: f32, ud: f32, angle_el: f32) {
        let phase = inverse_park(DqVoltage::new(uq, ud), angle_el, self.trig);
        self.state.phase_voltage = phase;
        self.driver.set_pwm(phase.alpha, phase.beta);
    }

    pub fn apply(&mut self, command: MotorCommand) {
        match command {
            MotorCommand::Target(target) => self.motion.set_target(target),
            MotorCommand::Enable => self.enable(),
            MotorCommand::Disable => self.disable(),
            MotorCommand::Mode(mode) => {
                if mode != self.config.motion_control {
                    info!("MOT: Mode {} -> {}", self.config.motion_control, mode);
                    self.config.motion_control = mode;
                }
            }
        }
    }

    pub fn status(&mut self) -> MotorStatus {
        MotorStatus {
            enabled: self.enabled,
            mode: self.config.motion_control,
            target: self.motion.target(),
            shaft_angle: self.state.shaft_angle,
            shaft_velocity: self.state.shaft_velocity,
            shaft_angle_sp: self.motion.shaft_angle_sp(),
            shaft_velocity_sp: self.motion.shaft_velocity_sp(),
            voltage: self.state.voltage,
            phase_voltage: self.state.phase_voltage,
            electrical_angle: self.state.electrical_angle,
            calibration: self.calibration,
            currents: self.current_sense.as_mut().map(|cs| cs.phase_currents()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    pub fn calibration(&self) -> CalibrationResult {
        self.calibration
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    /// Controller tuning at runtime
    pub fn motion_mut(&mut self) -> &mut MotionController {
        &mut self.motion
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn sensor_mut(&mut self) -> Option<&mut S> {
        self.sensor.as_mut()
    }
}

impl<D, S, C, I> CalibrationPlant for StepperMotor<D, S, C, I>
where
    D: StepperDriver,
    S: PositionSensor,
    C: MonotonicClock,
    I: CurrentSense,
{
    fn sensor_angle(&mut self) -> f32 {
        self.sensor.as_mut().map_or(0.0, |sensor| sensor.shaft_angle())
    }

    fn needs_search(&mut self) -> bool {
        self.sensor.as_mut().is_some_and(|sensor| sensor.needs_search())
    }

    fn set_phase_voltage(&mut self, uq: f32, ud: f32, angle_el: f32) {
        StepperMotor::set_phase_voltage(self, uq, ud, angle_el);
    }

    fn open_loop_angle(&self) -> f32 {
        self.state.shaft_angle
    }

    fn search_step(&mut self, target_angle: f32, velocity_limit: f32) -> f32 {
        let now_us = self.clock.now_us();
        let open_loop = self
            .motion
            .open_loop_move(self.state.shaft_angle, target_angle, velocity_limit, now_us);
        self.state.shaft_angle = open_loop.shaft_angle;
        self.state.shaft_velocity = open_loop.shaft_velocity;

        let angle_el = electrical_angle(open_loop.shaft_angle, self.config.pole_pairs);
        // alignment voltage rather than the voltage limit used by the open-loop modes
        let uq = self.config.voltage_sensor_align;
        StepperMotor::set_phase_voltage(self, uq, 0.0, angle_el);
        open_loop.shaft_angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foc::{Direction, Regulator};
    use core::cell::Cell;

    #[derive(Default)]
    struct RecordingDriver {
        enabled: bool,
        last: (f32, f32),
        calls: usize,
    }

    impl StepperDriver for RecordingDriver {
        fn set_pwm(&mut self, ua: f32, ub: f32) {
            self.last = (ua, ub);
            self.calls += 1;
        }

        fn enable(&mut self) {
            self.enabled = true;
        }

        fn disable(&mut self) {
            self.enabled = false;
        }

        fn voltage_limit(&self) -> f32 {
            12.0
        }
    }

    struct FixedSensor {
        angle: f32,
        velocity: f32,
    }

    impl PositionSensor for FixedSensor {
        fn shaft_angle(&mut self) -> f32 {
            self.angle
        }

        fn shaft_velocity(&mut self) -> f32 {
            self.velocity
        }
    }

    struct ConstantCurrents;

    impl CurrentSense for ConstantCurrents {
        fn phase_currents(&mut self) -> PhaseCurrents {
            PhaseCurrents { a: 0.5, b: -0.25 }
        }
    }

    #[derive(Default)]
    struct StepClock {
        now: Cell<u64>,
    }

    impl MonotonicClock for StepClock {
        fn now_us(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now + 1_000);
            now
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    type TestMotor<I = NoCurrentSense> = StepperMotor<RecordingDriver, FixedSensor, StepClock, I>;

    fn motor(mode: MotionControlType) -> TestMotor {
        let mut config = MotorConfig::new(7);
        config.motion_control = mode;
        config.zero_electric_offset = Some(0.0);
        config.sensor_direction = Direction::Cw;
        let mut motor = StepperMotor::new(config, RecordingDriver::default(), StepClock::default());
        motor.link_sensor(FixedSensor {
            angle: 0.0,
            velocity: 0.0,
        });
        motor.init(&mut NoDelay).unwrap();
        motor.init_foc(&mut NoDelay).unwrap();
        motor
    }

    #[test]
    fn test_init_clamps_and_enables() {
        let mut config = MotorConfig::new(7);
        config.voltage_limit = 24.0;
        let mut motor: TestMotor =
            StepperMotor::new(config, RecordingDriver::default(), StepClock::default());
        motor.init(&mut NoDelay).unwrap();
        assert!(motor.is_enabled());
        assert!(motor.driver().enabled);
        assert_eq!(motor.config().voltage_limit, 12.0);
        assert_eq!(motor.motion().pid_velocity().limit(), 12.0);
    }

    #[test]
    fn test_init_rejects_zero_pole_pairs() {
        let mut motor: TestMotor = StepperMotor::new(
            MotorConfig::new(0),
            RecordingDriver::default(),
            StepClock::default(),
        );
        assert_eq!(motor.init(&mut NoDelay), Err(ConfigError::ZeroPolePairs));
        assert!(!motor.is_enabled());
    }

    #[test]
    fn test_init_foc_without_sensor() {
        let mut motor: TestMotor = StepperMotor::new(
            MotorConfig::new(7),
            RecordingDriver::default(),
            StepClock::default(),
        );
        motor.init(&mut NoDelay).unwrap();
        assert_eq!(motor.init_foc(&mut NoDelay), Err(FocError::NoSensor));
    }

    #[test]
    fn test_preset_offset_skips_alignment() {
        let mut config = MotorConfig::new(7);
        config.zero_electric_offset = Some(1.0);
        config.sensor_direction = Direction::Ccw;
        let mut motor: TestMotor =
            StepperMotor::new(config, RecordingDriver::default(), StepClock::default());
        motor.init(&mut NoDelay).unwrap();
        let calls = motor.driver().calls;

        let result = motor.init_foc(&mut NoDelay).unwrap();
        assert_eq!(result, CalibrationResult::new(1.0, Direction::Ccw));
        assert_eq!(motor.driver().calls, calls);
    }

    #[test]
    fn test_angle_mode_cycle() {
        let mut motor = motor(MotionControlType::Angle);
        motor.move_to(Some(1.0));
        motor.loop_foc();

        let status = motor.status();
        assert!(status.voltage.q > 0.0);
        assert!(status.voltage.q <= 12.0);
        assert_eq!(status.voltage.d, 0.0);
        // rotor at electrical zero: all of q lands on beta
        let (ua, ub) = motor.driver().last;
        assert!(ua.abs() < 1e-3);
        assert!((ub - status.voltage.q).abs() < 1e-3);
    }

    #[test]
    fn test_torque_mode_target_clamped() {
        let mut motor = motor(MotionControlType::Torque);
        motor.apply(MotorCommand::Target(50.0));
        motor.tick();
        assert!((motor.status().voltage.q - 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_disabled_motor_ignores_cycles() {
        let mut motor = motor(MotionControlType::Torque);
        motor.apply(MotorCommand::Disable);
        assert!(!motor.driver().enabled);
        let calls = motor.driver().calls;

        motor.move_to(Some(3.0));
        motor.loop_foc();
        assert_eq!(motor.driver().calls, calls);
        assert_eq!(motor.status().voltage, DqVoltage::ZERO);

        motor.apply(MotorCommand::Enable);
        motor.tick();
        assert!(motor.driver().calls > calls);
    }

    #[test]
    fn test_open_loop_skips_foc_step() {
        let mut motor = motor(MotionControlType::VelocityOpenLoop);
        let calls = motor.driver().calls;
        motor.loop_foc();
        assert_eq!(motor.driver().calls, calls);

        motor.move_to(Some(10.0));
        let status = motor.status();
        assert_eq!(motor.driver().calls, calls + 1);
        assert_eq!(status.shaft_velocity, 10.0);
        assert!(status.shaft_angle > 0.0);
        assert_eq!(status.voltage.q, 12.0);
    }

    #[test]
    fn test_mode_switch_via_command() {
        let mut motor = motor(MotionControlType::Velocity);
        motor.apply(MotorCommand::Mode(MotionControlType::AngleOpenLoop));
        assert_eq!(motor.status().mode, MotionControlType::AngleOpenLoop);
    }

    #[test]
    fn test_status_reports_currents_when_linked() {
        let mut motor = motor(MotionControlType::Torque);
        assert_eq!(motor.status().currents, None);

        let mut config = MotorConfig::new(7);
        config.zero_electric_offset = Some(0.0);
        let mut motor: TestMotor<ConstantCurrents> =
            StepperMotor::new(config, RecordingDriver::default(), StepClock::default())
                .with_current_sense(ConstantCurrents);
        assert_eq!(
            motor.status().currents,
            Some(PhaseCurrents { a: 0.5, b: -0.25 })
        );
    }

    #[test]
    fn test_new_infers_without_current_sense() {
        let mut motor = StepperMotor::new(
            MotorConfig::new(7),
            RecordingDriver::default(),
            StepClock::default(),
        );
        motor.link_sensor(FixedSensor {
            angle: 0.0,
            velocity: 0.0,
        });
        motor.init(&mut NoDelay).unwrap();
        assert_eq!(motor.status().currents, None);

        let mut motor = motor.with_current_sense(ConstantCurrents);
        assert!(motor.is_enabled());
        assert_eq!(
            motor.status().currents,
            Some(PhaseCurrents { a: 0.5, b: -0.25 })
        );
    }

    #[test]
    fn test_reversed_sensor_direction() {
        let mut config = MotorConfig::new(7);
        config.motion_control = MotionControlType::Torque;
        config.zero_electric_offset = Some(0.0);
        config.sensor_direction = Direction::Ccw;
        let mut motor: TestMotor =
            StepperMotor::new(config, RecordingDriver::default(), StepClock::default());
        motor.link_sensor(FixedSensor {
            angle: 0.5,
            velocity: 2.0,
        });
        motor.init(&mut NoDelay).unwrap();
        motor.init_foc(&mut NoDelay).unwrap();

        motor.tick();
        let status = motor.status();
        assert!((status.shaft_angle + 0.5).abs() < 1e-6);
        assert!((status.shaft_velocity + 2.0).abs() < 1e-6);
        assert!((status.electrical_angle - normalize_angle(-3.5)).abs() < 1e-5);
    }
}
