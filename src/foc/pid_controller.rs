// PID and P controllers with output ramp and anti-windup

use super::timing::{self, SampleTimer};
use crate::config::PidConfig;

/// Discrete regulator driven by an error signal
///
/// Implementations keep their own history (previous error, output,
/// timestamp) and must be called at a roughly constant cadence.
pub trait Regulator {
    /// Run one step, measuring the sample time from `now_us`
    fn update(&mut self, error: f32, now_us: u64) -> f32;

    /// Run one step with an explicit sample time [s]
    ///
    /// A sample time that is not positive or above half a second is replaced
    /// by the default step.
    fn update_with_ts(&mut self, error: f32, ts: f32) -> f32;

    /// Clear the history
    fn reset(&mut self);

    /// Symmetric output bound
    fn limit(&self) -> f32;

    fn set_limit(&mut self, limit: f32);
}

/// Limit the slew of `output` relative to `output_prev`
#[inline]
fn apply_ramp(output: f32, output_prev: f32, output_ramp: f32, ts: f32) -> f32 {
    if output_ramp <= 0.0 {
        return output;
    }

    let output_rate = (output - output_prev) / ts;
    if output_rate > output_ramp {
        output_prev + output_ramp * ts
    } else if output_rate < -output_ramp {
        output_prev - output_ramp * ts
    } else {
        output
    }
}

/// PID controller
///
/// ```text
/// u(s) = (P + I/s + Ds) e(s)
/// ```
///
/// Integral by Tustin transform, derivative by backward difference. The
/// output is rate limited first, then clamped to ±limit; when clamped, the
/// stored integral is recomputed so that P + I + D equals the clamped
/// output (back-calculation anti-windup).
#[derive(Debug, Clone)]
pub struct PidController {
    /// Proportional gain
    p: f32,
    /// Integral gain
    i: f32,
    /// Derivative gain
    d: f32,
    /// Output derivative limit [units/s]
    output_ramp: f32,
    /// Output magnitude limit
    limit: f32,

    integral_prev: f32,
    error_prev: f32,
    output_prev: f32,
    timer: SampleTimer,
}

impl PidController {
    pub const fn new(p: f32, i: f32, d: f32, output_ramp: f32, limit: f32) -> Self {
        Self {
            p,
            i,
            d,
            output_ramp,
            limit,
            integral_prev: 0.0,
            error_prev: 0.0,
            output_prev: 0.0,
            timer: SampleTimer::new(),
        }
    }

    pub const fn from_config(config: &PidConfig) -> Self {
        Self::new(
            config.p,
            config.i,
            config.d,
            config.output_ramp,
            config.limit,
        )
    }

    /// Replace the gains, keeping the history
    pub fn set_gains(&mut self, p: f32, i: f32, d: f32) {
        self.p = p;
        self.i = i;
        self.d = d;
    }

    pub fn set_output_ramp(&mut self, output_ramp: f32) {
        self.output_ramp = output_ramp;
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn i(&self) -> f32 {
        self.i
    }

    pub fn d(&self) -> f32 {
        self.d
    }

    /// Integral state carried into the next step
    pub fn integral(&self) -> f32 {
        self.integral_prev
    }

    /// Last output
    pub fn output(&self) -> f32 {
        self.output_prev
    }
}

impl From<&PidConfig> for PidController {
    fn from(config: &PidConfig) -> Self {
        Self::from_config(config)
    }
}

impl Regulator for PidController {
    fn update(&mut self, error: f32, now_us: u64) -> f32 {
        let ts = self.timer.sample(now_us);
        self.update_with_ts(error, ts)
    }

    fn update_with_ts(&mut self, error: f32, ts: f32) -> f32 {
        let ts = timing::sanitize(ts);

        // u_p = P * e(k)
        let proportional = self.p * error;
        // u_ik = u_ik_1 + I * Ts/2 * (e(k) + e(k-1))
        let mut integral = self.integral_prev + self.i * ts * 0.5 * (error + self.error_prev);
        // u_dk = D * (e(k) - e(k-1)) / Ts
        let derivative = self.d * (error - self.error_prev) / ts;

        let mut output = proportional + integral + derivative;
        output = apply_ramp(output, self.output_prev, self.output_ramp, ts);

        if output > self.limit {
            output = self.limit;
            integral = output - proportional - derivative;
        } else if output < -self.limit {
            output = -self.limit;
            integral = output - proportional - derivative;
        }

        self.integral_prev = integral;
        self.output_prev = output;
        self.error_prev = error;
        output
    }

    fn reset(&mut self) {
        self.integral_prev = 0.0;
        self.error_prev = 0.0;
        self.output_prev = 0.0;
        self.timer.reset();
    }

    fn limit(&self) -> f32 {
        self.limit
    }

    fn set_limit(&mut self, limit: f32) {
        self.limit = limit;
    }
}

/// Proportional-only controller
///
/// Same interface and limiters as [`PidController`] without the integral
/// and derivative bookkeeping; used for the outer angle loop.
#[derive(Debug, Clone)]
pub struct PController {
    p: f32,
    output_ramp: f32,
    limit: f32,
    output_prev: f32,
    timer: SampleTimer,
}

impl PController {
    pub const fn new(p: f32, output_ramp: f32, limit: f32) -> Self {
        Self {
            p,
            output_ramp,
            limit,
            output_prev: 0.0,
            timer: SampleTimer::new(),
        }
    }

    /// `i` and `d` of the config are ignored
    pub const fn from_config(config: &PidConfig) -> Self {
        Self::new(config.p, config.output_ramp, config.limit)
    }

    pub fn set_gain(&mut self, p: f32) {
        self.p = p;
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn output(&self) -> f32 {
        self.output_prev
    }
}

impl From<&PidConfig> for PController {
    fn from(config: &PidConfig) -> Self {
        Self::from_config(config)
    }
}

impl Regulator for PController {
    fn update(&mut self, error: f32, now_us: u64) -> f32 {
        let ts = self.timer.sample(now_us);
        self.update_with_ts(error, ts)
    }

    fn update_with_ts(&mut self, error: f32, ts: f32) -> f32 {
        let ts = timing::sanitize(ts);

        let mut output = apply_ramp(self.p * error, self.output_prev, self.output_ramp, ts);
        if output > self.limit {
            output = self.limit;
        } else if output < -self.limit {
            output = -self.limit;
        }

        self.output_prev = output;
        output
    }

    fn reset(&mut self) {
        self.output_prev = 0.0;
        self.timer.reset();
    }

    fn limit(&self) -> f32 {
        self.limit
    }

    fn set_limit(&mut self, limit: f32) {
        self.limit = limit;
    }
}
