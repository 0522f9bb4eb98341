//! Wrapping microsecond clock and deadline arithmetic
//!
//! All timing in the pipeline (debounce locks, blink schedules, event flashes)
//! is expressed as [`Deadline`]s derived from a free-running `u32` microsecond
//! counter. The counter wraps roughly every 71 minutes, so deadlines are
//! compared through the wrapping difference to the current time instead of by
//! absolute value.
//!
//! ```text
//!   now ──────────────► deadline            (deadline - now) as i32 > 0  → pending
//!   deadline ◄──────── now                  (deadline - now) as i32 < 0  → passed
//! ```
//!
//! An unset deadline is modelled as `Option::None`. [`Timebase::after`] never
//! produces a value that could collide with "unset" after wraparound, because
//! the low bit of every deadline is forced to 1.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// A point in time on the wrapping microsecond counter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(NonZeroU32);

impl Deadline {
    /// Raw counter value of this deadline
    pub fn as_micros(self) -> u32 {
        self.0.get()
    }
}

/// Source of the monotonic microsecond counter
pub trait Clock: Send + Sync {
    /// Current counter value, wrapping at 2^32
    fn now_us(&self) -> u32;
}

/// Deadline arithmetic bound to a clock and a maximum horizon
///
/// The horizon must be the largest interval the pipeline ever schedules. A
/// deadline further away from `now` than the horizon is treated as already
/// passed, which is what keeps deadlines that were left armed for more than
/// one horizon from looking "pending" again after the counter wraps.
#[derive(Clone)]
pub struct Timebase {
    clock: Arc<dyn Clock>,
    horizon_us: u32,
}

impl Timebase {
    pub fn new(clock: Arc<dyn Clock>, horizon_us: u32) -> Self {
        debug_assert!(horizon_us > 0 && horizon_us < i32::MAX as u32);
        Self { clock, horizon_us }
    }

    pub fn now_us(&self) -> u32 {
        self.clock.now_us()
    }

    pub fn horizon_us(&self) -> u32 {
        self.horizon_us
    }

    /// Returns true once `deadline` lies in the past. Unset deadlines never pass.
    pub fn has_passed(&self, deadline: Option<Deadline>) -> bool {
        let Some(deadline) = deadline else {
            return false;
        };
        let remaining = deadline.as_micros().wrapping_sub(self.now_us());
        // a deadline at the full horizon can sit one tick further out because of the low bit
        (remaining as i32) < 0 || remaining > self.horizon_us.saturating_add(1)
    }

    /// Deadline `delta_us` from now, clamped to the horizon
    pub fn after(&self, delta_us: u32) -> Deadline {
        let delta_us = if delta_us > self.horizon_us {
            warn!(
                "Clamping delay of {}us to horizon of {}us",
                delta_us, self.horizon_us
            );
            self.horizon_us
        } else {
            delta_us
        };

        let raw = self.now_us().wrapping_add(delta_us) | 1;
        // low bit is set, so never zero
        Deadline(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MIN))
    }
}

/// Clock backed by [`Instant`], counting from construction
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u32 {
        // truncation is the wraparound
        self.start.elapsed().as_micros() as u32
    }
}

#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};

/// Clock that only moves when told to
///
/// Clones share the same counter, so a test can keep one handle and give the
/// other to the driver.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

#[cfg(test)]
impl ManualClock {
    pub fn starting_at(now_us: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(now_us)),
        }
    }

    pub fn advance_us(&self, delta_us: u32) {
        let now = self.now.load(Ordering::Relaxed);
        self.now.store(now.wrapping_add(delta_us), Ordering::Relaxed);
    }

    pub fn advance_ms(&self, delta_ms: u32) {
        self.advance_us(delta_ms * 1000);
    }

    pub fn set_us(&self, now_us: u32) {
        self.now.store(now_us, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_us(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HORIZON: u32 = 2_500_000;

    fn timebase_at(now: u32) -> (ManualClock, Timebase) {
        let clock = ManualClock::starting_at(now);
        let timebase = Timebase::new(Arc::new(clock.clone()), HORIZON);
        (clock, timebase)
    }

    #[test]
    fn unset_deadline_never_passes() {
        let (clock, timebase) = timebase_at(0);
        assert!(!timebase.has_passed(None));
        clock.advance_us(u32::MAX);
        assert!(!timebase.has_passed(None));
    }

    #[test]
    fn deadline_passes_after_delay() {
        let (clock, timebase) = timebase_at(1_000);
        let deadline = timebase.after(20_000);
        assert_eq!(deadline.as_micros(), 21_001);
        assert!(!timebase.has_passed(Some(deadline)));

        clock.advance_us(20_001);
        assert!(!timebase.has_passed(Some(deadline)));

        clock.advance_us(1);
        assert!(timebase.has_passed(Some(deadline)));
    }

    #[test]
    fn deadline_low_bit_is_always_set() {
        let (clock, timebase) = timebase_at(0);
        assert_eq!(timebase.after(0).as_micros(), 1);

        // now + delta lands exactly on zero after wrapping
        clock.set_us(u32::MAX - 9);
        assert_eq!(timebase.after(10).as_micros(), 1);
    }

    #[test]
    fn deadline_set_before_wraparound() {
        let (clock, timebase) = timebase_at(u32::MAX - 5_000);
        let deadline = timebase.after(20_000);
        assert!(deadline.as_micros() < 20_000);
        assert!(!timebase.has_passed(Some(deadline)));

        clock.advance_us(10_000);
        assert!(clock.now_us() < 10_000);
        assert!(!timebase.has_passed(Some(deadline)));

        clock.advance_us(10_001);
        assert!(timebase.has_passed(Some(deadline)));
    }

    #[test]
    fn deadline_set_after_wraparound() {
        let (clock, timebase) = timebase_at(u32::MAX - 100);
        clock.advance_us(200);
        let deadline = timebase.after(20_000);
        assert_eq!(deadline.as_micros(), 20_099);
        assert!(!timebase.has_passed(Some(deadline)));

        clock.advance_us(20_001);
        assert!(timebase.has_passed(Some(deadline)));
    }

    #[test]
    fn stale_deadline_counts_as_passed() {
        let (clock, timebase) = timebase_at(0);
        let deadline = timebase.after(1_000);

        // far enough that the wrapping difference looks like a future point
        clock.advance_us(u32::MAX / 2 + 10_000);
        assert!(timebase.has_passed(Some(deadline)));
    }

    #[test]
    fn long_delays_are_clamped_to_horizon() {
        let (clock, timebase) = timebase_at(0);
        let deadline = timebase.after(HORIZON * 4);
        assert_eq!(deadline.as_micros(), HORIZON | 1);

        clock.advance_us(HORIZON + 2);
        assert!(timebase.has_passed(Some(deadline)));
    }
}
