//! Sample time between successive control calls
//!
//! Controllers and open-loop generators integrate over the real time elapsed
//! since their previous call. A reading that is not positive or longer than
//! [`MAX_SAMPLE_TIME`] (first call, clock wraparound, clock stepping back,
//! a long pause) is replaced by [`DEFAULT_SAMPLE_TIME`].

use crate::config::timing::{DEFAULT_SAMPLE_TIME, MAX_SAMPLE_TIME};

/// Elapsed seconds between `prev_us` and `now_us`, with the degenerate-time
/// substitution applied
pub fn sample_time(prev_us: Option<u64>, now_us: u64) -> f32 {
    let Some(prev_us) = prev_us else {
        return DEFAULT_SAMPLE_TIME;
    };
    let Some(elapsed_us) = now_us.checked_sub(prev_us) else {
        return DEFAULT_SAMPLE_TIME;
    };

    sanitize(elapsed_us as f32 / 1e6)
}

/// Pass `ts` through if it is a usable sample time, otherwise the default
#[inline]
pub fn sanitize(ts: f32) -> f32 {
    if ts > 0.0 && ts <= MAX_SAMPLE_TIME {
        ts
    } else {
        DEFAULT_SAMPLE_TIME
    }
}

/// Remembers the timestamp of the previous call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleTimer {
    timestamp_prev: Option<u64>,
}

impl SampleTimer {
    pub const fn new() -> Self {
        Self {
            timestamp_prev: None,
        }
    }

    /// Sample time since the previous call; stores `now_us` for the next one
    pub fn sample(&mut self, now_us: u64) -> f32 {
        let ts = sample_time(self.timestamp_prev, now_us);
        self.timestamp_prev = Some(now_us);
        ts
    }

    /// Forget the previous timestamp so the next sample uses the default step
    pub fn reset(&mut self) {
        self.timestamp_prev = None;
    }
}
