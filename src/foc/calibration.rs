//! Sensor alignment
//!
//! Finds the electrical zero of the rotor and the counting direction of the
//! position sensor by holding a voltage vector on the phases and sweeping it
//! through one electrical revolution forward and back.
//!
//! The sequence is a state machine that never blocks: every call to
//! [`SensorAlignment::step`] performs one action and returns how long the
//! caller should wait before the next call. A blocking or async runner turns
//! those waits into delays.

use core::f32::consts::TAU;

use super::transforms::{electrical_angle, normalize_angle};
use crate::config::alignment::*;
use crate::error::FocError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sensor counting direction relative to the electrical field rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// Sensor angle increases with the field (nominal)
    Cw,
    /// Sensor angle decreases with the field
    Ccw,
    /// Not determined yet
    #[default]
    Unknown,
}

impl Direction {
    /// Factor applied to raw sensor readings; unknown counts as nominal
    pub const fn sign(self) -> f32 {
        match self {
            Self::Ccw => -1.0,
            Self::Cw | Self::Unknown => 1.0,
        }
    }
}

/// Outcome of sensor alignment, consumed by the FOC step
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationResult {
    /// Electrical angle at rotor flux alignment [rad], in [0, 2π)
    pub zero_electric_angle: f32,
    pub sensor_direction: Direction,
}

impl CalibrationResult {
    pub const UNCALIBRATED: Self = Self {
        zero_electric_angle: 0.0,
        sensor_direction: Direction::Unknown,
    };

    pub fn new(zero_electric_angle: f32, sensor_direction: Direction) -> Self {
        Self {
            zero_electric_angle: normalize_angle(zero_electric_angle),
            sensor_direction,
        }
    }
}

impl Default for CalibrationResult {
    fn default() -> Self {
        Self::UNCALIBRATED
    }
}

/// What the alignment sequence needs from the motor
pub trait CalibrationPlant {
    /// Raw sensor angle [rad], before the direction correction
    fn sensor_angle(&mut self) -> f32;

    /// Sensor still needs to find its absolute reference (index)
    fn needs_search(&mut self) -> bool;

    /// Apply `(uq, ud)` at `angle_el`
    fn set_phase_voltage(&mut self, uq: f32, ud: f32, angle_el: f32);

    /// Shaft angle tracked by the open-loop angle generator [rad]
    fn open_loop_angle(&self) -> f32;

    /// One open-loop step towards `target_angle` at `velocity_limit`;
    /// returns the new tracked shaft angle
    fn search_step(&mut self, target_angle: f32, velocity_limit: f32) -> f32;
}

/// Alignment state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationState {
    NotStarted,
    /// Rotating open-loop until the sensor finds its index
    ZeroSearch,
    /// Holding the vector at the sweep start angle
    Hold,
    /// Sweep step `0..=SWEEP_STEPS` forward; `SWEEP_STEPS + 1` samples the midpoint
    SweepForward(u16),
    /// Sweep step counting back down to zero; `None` once finished
    SweepBackward(Option<u16>),
    DirectionDetermined,
    ZeroAngleComputed,
    /// Phases being released
    Release,
    Idle,
}

/// Result of one state machine call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// Call again immediately
    Continue,
    /// Call again after `ms` milliseconds
    Wait(u32),
    /// Sequence complete
    Done(Result<CalibrationResult, FocError>),
}

/// Sensor alignment state machine
#[derive(Debug, Clone)]
pub struct SensorAlignment {
    state: CalibrationState,
    pole_pairs: u32,
    voltage_align: f32,
    search_velocity: f32,

    result: CalibrationResult,
    start_angle: f32,
    mid_angle: f32,
    search_target: f32,
    /// Tracked angle after the previous search step
    search_angle: f32,
    search_steps: u32,
    reference_found: bool,
    movement_detected: bool,
}

impl SensorAlignment {
    /// `prior` is kept for whatever the sweep cannot determine
    pub fn new(
        pole_pairs: u32,
        voltage_align: f32,
        search_velocity: f32,
        prior: CalibrationResult,
    ) -> Self {
        Self {
            state: CalibrationState::NotStarted,
            pole_pairs,
            voltage_align,
            search_velocity,
            result: prior,
            start_angle: 0.0,
            mid_angle: 0.0,
            search_target: 0.0,
            search_angle: 0.0,
            search_steps: 0,
            reference_found: true,
            movement_detected: false,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == CalibrationState::Idle
    }

    /// Current (possibly still prior) result
    pub fn result(&self) -> CalibrationResult {
        self.result
    }

    fn sweep_angle(step: u16) -> f32 {
        SWEEP_START_ANGLE + TAU * step as f32 / SWEEP_STEPS as f32
    }

    fn transition(&mut self, next: CalibrationState) {
        debug!("Calibration: {} -> {}", self.state, next);
        self.state = next;
    }

    fn outcome(&self) -> Result<CalibrationResult, FocError> {
        if !self.movement_detected {
            Err(FocError::NoMovementDetected)
        } else if !self.reference_found {
            Err(FocError::ReferenceNotFound)
        } else {
            Ok(self.result)
        }
    }

    /// Run one action of the sequence
    pub fn step<P: CalibrationPlant>(&mut self, plant: &mut P) -> CalibrationStep {
        match self.state {
            CalibrationState::NotStarted => {
                info!("Calibration: aligning sensor");
                if plant.needs_search() {
                    info!("Calibration: absolute zero search...");
                    self.search_angle = plant.open_loop_angle();
                    self.search_target = self.search_angle + SEARCH_TURNS * TAU;
                    self.search_steps = 0;
                    self.transition(CalibrationState::ZeroSearch);
                    CalibrationStep::Continue
                } else {
                    self.transition(CalibrationState::Hold);
                    CalibrationStep::Wait(SETTLE_AFTER_SEARCH_MS)
                }
            }

            CalibrationState::ZeroSearch => {
                if plant.needs_search() {
                    let angle = plant.search_step(self.search_target, self.search_velocity);
                    self.search_steps += 1;
                    let advanced = angle > self.search_angle;
                    self.search_angle = angle;
                    if advanced
                        && angle < self.search_target
                        && self.search_steps < SEARCH_MAX_STEPS
                    {
                        return CalibrationStep::Continue;
                    }
                    if !advanced {
                        warn!("Calibration: index search stalled at {} rad", angle);
                    }
                }

                // leave the search with the phases released, found or not
                plant.set_phase_voltage(0.0, 0.0, 0.0);
                if plant.needs_search() {
                    self.reference_found = false;
                    error!("Calibration: index not found");
                } else {
                    info!("Calibration: index found");
                }
                self.transition(CalibrationState::Hold);
                CalibrationStep::Wait(SETTLE_AFTER_SEARCH_MS)
            }

            CalibrationState::Hold => {
                self.start_angle = plant.sensor_angle();
                plant.set_phase_voltage(self.voltage_align, 0.0, SWEEP_START_ANGLE);
                self.transition(CalibrationState::SweepForward(0));
                CalibrationStep::Wait(HOLD_MS)
            }

            CalibrationState::SweepForward(step) if step <= SWEEP_STEPS => {
                plant.set_phase_voltage(self.voltage_align, 0.0, Self::sweep_angle(step));
                self.state = CalibrationState::SweepForward(step + 1);
                CalibrationStep::Wait(SWEEP_STEP_MS)
            }

            CalibrationState::SweepForward(_) => {
                self.mid_angle = plant.sensor_angle();
                self.transition(CalibrationState::SweepBackward(Some(SWEEP_STEPS)));
                CalibrationStep::Continue
            }

            CalibrationState::SweepBackward(Some(step)) => {
                plant.set_phase_voltage(self.voltage_align, 0.0, Self::sweep_angle(step));
                self.state = CalibrationState::SweepBackward(step.checked_sub(1));
                CalibrationStep::Wait(SWEEP_STEP_MS)
            }

            CalibrationState::SweepBackward(None) => {
                self.transition(CalibrationState::DirectionDetermined);
                CalibrationStep::Continue
            }

            CalibrationState::DirectionDetermined => {
                if self.mid_angle < self.start_angle {
                    info!("Calibration: sensor direction CCW");
                    self.result.sensor_direction = Direction::Ccw;
                    self.movement_detected = true;
                } else if self.mid_angle == self.start_angle {
                    error!("Calibration: sensor failed to notice movement");
                } else {
                    info!("Calibration: sensor direction CW");
                    self.result.sensor_direction = Direction::Cw;
                    self.movement_detected = true;
                }
                self.transition(CalibrationState::ZeroAngleComputed);
                // let the rotor settle before sampling the zero angle
                CalibrationStep::Wait(SETTLE_AFTER_SWEEP_MS)
            }

            CalibrationState::ZeroAngleComputed => {
                if self.movement_detected {
                    let shaft_angle = self.result.sensor_direction.sign() * plant.sensor_angle();
                    self.result.zero_electric_angle =
                        normalize_angle(electrical_angle(shaft_angle, self.pole_pairs));
                    info!(
                        "Calibration: zero electric angle {} rad",
                        self.result.zero_electric_angle
                    );
                } else {
                    warn!(
                        "Calibration: keeping zero electric angle {} rad",
                        self.result.zero_electric_angle
                    );
                }
                self.transition(CalibrationState::Release);
                CalibrationStep::Wait(SETTLE_AFTER_ZERO_MS)
            }

            CalibrationState::Release => {
                plant.set_phase_voltage(0.0, 0.0, 0.0);
                self.transition(CalibrationState::Idle);
                CalibrationStep::Wait(RELEASE_MS)
            }

            CalibrationState::Idle => CalibrationStep::Done(self.outcome()),
        }
    }

    /// Drive the sequence to completion, handing every wait to `wait_ms`
    pub fn run<P: CalibrationPlant>(
        &mut self,
        plant: &mut P,
        mut wait_ms: impl FnMut(u32),
    ) -> Result<CalibrationResult, FocError> {
        loop {
            match self.step(plant) {
                CalibrationStep::Continue => {}
                CalibrationStep::Wait(ms) => wait_ms(ms),
                CalibrationStep::Done(outcome) => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::PI;

    /// Rotor that follows the field instantly; the sensor reports
    /// `direction * field / pole_pairs` offset by `mount_offset`.
    struct SimulatedRotor {
        pole_pairs: u32,
        sensor_sign: f32,
        mount_offset: f32,
        frozen: bool,
        field_angle: f32,
        /// index found once the open-loop angle passes this value
        index_at: Option<f32>,
        tracked_angle: f32,
        voltages: Vec<(f32, f32, f32)>,
        search_steps: usize,
    }

    impl SimulatedRotor {
        fn new(pole_pairs: u32, sensor_sign: f32) -> Self {
            Self {
                pole_pairs,
                sensor_sign,
                mount_offset: 0.3,
                frozen: false,
                field_angle: 0.0,
                index_at: None,
                tracked_angle: 0.0,
                voltages: Vec::new(),
                search_steps: 0,
            }
        }
    }

    impl CalibrationPlant for SimulatedRotor {
        fn sensor_angle(&mut self) -> f32 {
            if self.frozen {
                return 1.0;
            }
            // unwrapped so the sweep direction is visible
            self.mount_offset + self.sensor_sign * self.field_angle / self.pole_pairs as f32
        }

        fn needs_search(&mut self) -> bool {
            match self.index_at {
                Some(index) => self.tracked_angle < index,
                None => false,
            }
        }

        fn set_phase_voltage(&mut self, uq: f32, ud: f32, angle_el: f32) {
            self.voltages.push((uq, ud, angle_el));
            if uq != 0.0 {
                self.field_angle = angle_el;
            }
        }

        fn open_loop_angle(&self) -> f32 {
            self.tracked_angle
        }

        fn search_step(&mut self, target_angle: f32, velocity_limit: f32) -> f32 {
            self.search_steps += 1;
            self.tracked_angle = (self.tracked_angle + velocity_limit * 1e-3).min(target_angle);
            self.tracked_angle
        }
    }

    fn run(
        alignment: &mut SensorAlignment,
        plant: &mut SimulatedRotor,
    ) -> (Result<CalibrationResult, FocError>, u32) {
        let mut waited = 0;
        let outcome = alignment.run(plant, |ms| waited += ms);
        (outcome, waited)
    }

    #[test]
    fn test_forward_sensor_is_cw() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 1.0, CalibrationResult::UNCALIBRATED);

        let (outcome, _) = run(&mut alignment, &mut plant);
        let result = outcome.unwrap();
        assert_eq!(result.sensor_direction, Direction::Cw);
        assert!(alignment.is_completed());
    }

    #[test]
    fn test_reverse_sensor_is_ccw() {
        let mut plant = SimulatedRotor::new(7, -1.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 1.0, CalibrationResult::UNCALIBRATED);

        let (outcome, _) = run(&mut alignment, &mut plant);
        assert_eq!(outcome.unwrap().sensor_direction, Direction::Ccw);
    }

    #[test]
    fn test_frozen_sensor_keeps_prior() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        plant.frozen = true;
        let prior = CalibrationResult::new(1.25, Direction::Ccw);
        let mut alignment = SensorAlignment::new(7, 3.0, 1.0, prior);

        let (outcome, _) = run(&mut alignment, &mut plant);
        assert_eq!(outcome, Err(FocError::NoMovementDetected));
        assert_eq!(alignment.result(), prior);
        assert_eq!(alignment.state(), CalibrationState::Idle);
        // released anyway
        assert_eq!(plant.voltages.last(), Some(&(0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_zero_angle_from_final_position() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 1.0, CalibrationResult::UNCALIBRATED);

        let result = run(&mut alignment, &mut plant).0.unwrap();
        // the sweep ends back at 3π/2 electrical
        let expected = normalize_angle((0.3 + 1.5 * PI / 7.0) * 7.0);
        assert!((result.zero_electric_angle - expected).abs() < 1e-4);
        assert!(result.zero_electric_angle >= 0.0 && result.zero_electric_angle < TAU);
    }

    #[test]
    fn test_sweep_covers_one_revolution_each_way() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 1.0, CalibrationResult::UNCALIBRATED);
        let (_, waited) = run(&mut alignment, &mut plant);

        let sweep: Vec<_> = plant.voltages.iter().filter(|v| v.0 == 3.0).collect();
        // hold + 501 forward + 501 backward
        assert_eq!(sweep.len(), 1 + 2 * (SWEEP_STEPS as usize + 1));
        let forward_end = sweep[1 + SWEEP_STEPS as usize].2;
        assert!((forward_end - (SWEEP_START_ANGLE + TAU)).abs() < 1e-4);
        assert!((sweep.last().unwrap().2 - SWEEP_START_ANGLE).abs() < 1e-4);

        let expected_wait = SETTLE_AFTER_SEARCH_MS
            + HOLD_MS
            + 2 * (SWEEP_STEPS as u32 + 1) * SWEEP_STEP_MS
            + SETTLE_AFTER_SWEEP_MS
            + SETTLE_AFTER_ZERO_MS
            + RELEASE_MS;
        assert_eq!(waited, expected_wait);
    }

    #[test]
    fn test_index_search_found() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        plant.index_at = Some(2.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 100.0, CalibrationResult::UNCALIBRATED);

        let (outcome, _) = run(&mut alignment, &mut plant);
        assert!(outcome.is_ok());
        // 2 rad at 0.1 rad per step
        assert!(plant.search_steps >= 20 && plant.search_steps <= 21);
        // released right after the search
        assert_eq!(plant.voltages[0], (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_index_search_gives_up_after_one_and_a_half_turns() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        plant.index_at = Some(100.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 100.0, CalibrationResult::UNCALIBRATED);

        let (outcome, _) = run(&mut alignment, &mut plant);
        assert_eq!(outcome, Err(FocError::ReferenceNotFound));
        assert!((plant.tracked_angle - SEARCH_TURNS * TAU).abs() < 1e-4);
        assert_eq!(plant.voltages[0], (0.0, 0.0, 0.0));
        // the sweep still ran and found the direction
        assert_eq!(alignment.result().sensor_direction, Direction::Cw);
    }

    #[test]
    fn test_index_search_stalled_gives_up() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        plant.index_at = Some(100.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 0.0, CalibrationResult::UNCALIBRATED);

        let (outcome, _) = run(&mut alignment, &mut plant);
        assert_eq!(outcome, Err(FocError::ReferenceNotFound));
        assert_eq!(plant.search_steps, 1);
        assert_eq!(plant.voltages[0], (0.0, 0.0, 0.0));
        assert!(alignment.is_completed());
    }

    #[test]
    fn test_index_search_step_budget() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        plant.index_at = Some(100.0);
        // 1e-8 rad per step: far short of 1.5 turns within the budget
        let mut alignment = SensorAlignment::new(7, 3.0, 1e-5, CalibrationResult::UNCALIBRATED);

        let (outcome, _) = run(&mut alignment, &mut plant);
        assert_eq!(outcome, Err(FocError::ReferenceNotFound));
        assert_eq!(plant.search_steps, SEARCH_MAX_STEPS as usize);
        assert!(plant.tracked_angle < 0.01);
    }

    #[test]
    fn test_done_is_sticky() {
        let mut plant = SimulatedRotor::new(7, 1.0);
        let mut alignment = SensorAlignment::new(7, 3.0, 1.0, CalibrationResult::UNCALIBRATED);
        let first = run(&mut alignment, &mut plant).0;
        assert_eq!(alignment.step(&mut plant), CalibrationStep::Done(first));
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::Cw.sign(), 1.0);
        assert_eq!(Direction::Ccw.sign(), -1.0);
        assert_eq!(Direction::Unknown.sign(), 1.0);
    }
}
