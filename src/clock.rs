//! Monotonic time source

/// Free-running microsecond clock
///
/// May wrap; the controllers treat a backwards step as a degenerate sample.
pub trait MonotonicClock {
    fn now_us(&self) -> u64;
}

impl<T: MonotonicClock + ?Sized> MonotonicClock for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// `embassy_time::Instant` as the clock
#[cfg(feature = "embassy")]
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

#[cfg(feature = "embassy")]
impl MonotonicClock for EmbassyClock {
    fn now_us(&self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }
}
