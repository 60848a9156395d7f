//! Motor control task
//!
//! Runs the control cycle on a fixed ticker, applying queued commands
//! before each cycle and publishing the status after it.

use core::future::Future;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker, Timer};

use crate::clock::MonotonicClock;
use crate::config::alignment::INIT_SETTLE_MS;
use crate::current_sense::CurrentSense;
use crate::driver::StepperDriver;
use crate::error::FocError;
use crate::foc::{CalibrationPlant, CalibrationResult, CalibrationStep, SensorAlignment};
use crate::motor::{AlignmentStart, MotorCommand, MotorStatus, StepperMotor};
use crate::sensor::PositionSensor;

/// Queue of runtime commands for one motor
pub type CommandChannel<M, const N: usize> = Channel<M, MotorCommand, N>;

/// Latest status of one motor
pub type StatusSignal<M> = Signal<M, MotorStatus>;

/// Sensor alignment with `embassy_time` waits
///
/// Same sequence and outcome as the blocking
/// [`StepperMotor::init_foc`]; other tasks keep running during the waits
/// and between the index search steps.
pub async fn init_foc_async<D, S, C, I>(
    motor: &mut StepperMotor<D, S, C, I>,
) -> Result<CalibrationResult, FocError>
where
    D: StepperDriver,
    S: PositionSensor,
    C: MonotonicClock,
    I: CurrentSense,
{
    let mut alignment = match motor.begin_alignment() {
        AlignmentStart::Run(alignment) => alignment,
        AlignmentStart::Skip(outcome) => return outcome,
    };

    Timer::after_millis(INIT_SETTLE_MS.into()).await;
    let outcome =
        run_alignment(&mut alignment, motor, |ms| Timer::after_millis(ms.into())).await;
    motor.finish_alignment(&alignment, outcome);
    Timer::after_millis(INIT_SETTLE_MS.into()).await;
    outcome
}

/// Step the alignment to completion, yielding between immediate steps
async fn run_alignment<P, W, F>(
    alignment: &mut SensorAlignment,
    plant: &mut P,
    mut wait_ms: W,
) -> Result<CalibrationResult, FocError>
where
    P: CalibrationPlant,
    W: FnMut(u32) -> F,
    F: Future<Output = ()>,
{
    loop {
        match alignment.step(plant) {
            CalibrationStep::Continue => yield_now().await,
            CalibrationStep::Wait(ms) => wait_ms(ms).await,
            CalibrationStep::Done(outcome) => return outcome,
        }
    }
}

/// Control loop, never returns
///
/// # Arguments
/// * `motor` - initialized and calibrated motor
/// * `commands` - drained completely before every cycle
/// * `status` - overwritten after every cycle
/// * `period` - control cycle, e.g. `DEFAULT_CONTROL_PERIOD_US`
pub async fn motor_control<D, S, C, I, M, const N: usize>(
    motor: &mut StepperMotor<D, S, C, I>,
    commands: &CommandChannel<M, N>,
    status: &StatusSignal<M>,
    period: Duration,
) -> !
where
    D: StepperDriver,
    S: PositionSensor,
    C: MonotonicClock,
    I: CurrentSense,
    M: RawMutex,
{
    info!(
        "Motor control task started: period={}us, mode={}",
        period.as_micros(),
        motor.config().motion_control
    );

    let mut ticker = Ticker::every(period);
    loop {
        while let Ok(command) = commands.try_receive() {
            debug!("Motor command: {}", command);
            motor.apply(command);
        }

        motor.tick();
        status.signal(motor.status());

        ticker.next().await;
    }
}
