//! Time sources and wait policies for step pacing.

use std::cell::Cell;
use std::time::Instant;

use embedded_hal::delay::DelayNs;

/// Monotonic microsecond counter.
///
/// Pacing compares readings with `wrapping_sub`, which is only correct across
/// a wrap of the full `u64` range. A narrower hardware counter (a 32-bit
/// microsecond timer, say) must be extended to a non-wrapping `u64` before it
/// is returned here; zero-extending it is not enough.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
}

/// Microseconds since construction, backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    started_at: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        self.started_at.elapsed().as_micros() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, micros: u64) {
        self.now.set(micros);
    }

    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get().wrapping_add(micros));
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.get()
    }
}

/// Wait policy that never sleeps, it just spins once and lets the caller re-read the clock.
///
/// Passing this to [`StepperChannel::step`](crate::StepperChannel::step)
/// gives a plain busy-wait.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinDelay;

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, _ns: u32) {
        core::hint::spin_loop();
    }
}

/// Delay that advances a [`ManualClock`] instead of waiting.
///
/// Every requested delay is recorded so tests can check how the blocking
/// loop waited.
#[derive(Debug)]
pub struct ClockDelay<'a> {
    clock: &'a ManualClock,
    waits: Vec<u64>,
}

impl<'a> ClockDelay<'a> {
    pub fn new(clock: &'a ManualClock) -> Self {
        Self {
            clock,
            waits: Vec::new(),
        }
    }

    /// Requested waits in microseconds, rounded up.
    pub fn waits(&self) -> &[u64] {
        &self.waits
    }
}

impl DelayNs for ClockDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        let micros = u64::from(ns).div_ceil(1_000);
        self.waits.push(micros);
        self.clock.advance(micros);
    }

    fn delay_us(&mut self, us: u32) {
        self.waits.push(u64::from(us));
        self.clock.advance(u64::from(us));
    }
}
