//! Per-line debounce with a post-commit lockout
//!
//! A change on a line is committed immediately, then the line is locked for
//! the debounce window. While locked, disagreeing samples are ignored. Once
//! the lock has expired the line follows whatever the raw level is at that
//! later tick, so a glitch that already went away is never replayed.

use crate::clock::{Deadline, Timebase};
use crate::input::lines::{DeviceId, DeviceLines, LINE_COUNT};
use tracing::trace;

/// One debounced binary input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line {
    value: bool,
    lock_until: Option<Deadline>,
}

impl Line {
    /// Committed state, true = pressed
    pub fn value(&self) -> bool {
        self.value
    }

    pub fn lock_until(&self) -> Option<Deadline> {
        self.lock_until
    }

    /// Feeds one raw sample. Returns true if the committed value changed.
    pub fn sample(&mut self, raw: bool, timebase: &Timebase, window_us: u32) -> bool {
        // expired locks are dropped while the line is steady, before a wrap can revive them
        if self.lock_until.is_some() && timebase.has_passed(self.lock_until) {
            self.lock_until = None;
        }

        if raw == self.value || self.lock_until.is_some() {
            return false;
        }

        self.value = raw;
        self.lock_until = Some(timebase.after(window_us));
        true
    }
}

/// Debounce state for all lines of both ports
#[derive(Debug, Clone)]
pub struct Debouncer {
    lines: [Line; LINE_COUNT],
    window_us: u32,
}

impl Debouncer {
    pub fn new(window_us: u32) -> Self {
        Self {
            lines: [Line::default(); LINE_COUNT],
            window_us,
        }
    }

    /// Samples every line once; returns the number of committed changes
    pub fn update(&mut self, active: &[bool; LINE_COUNT], timebase: &Timebase) -> usize {
        let mut committed = 0;
        for (index, (line, &raw)) in self.lines.iter_mut().zip(active.iter()).enumerate() {
            if line.sample(raw, timebase, self.window_us) {
                trace!("Line {} committed to {}", index, raw);
                committed += 1;
            } else if line.value != raw {
                trace!("Line {} change to {} suppressed, still locked", index, raw);
            }
        }
        committed
    }

    pub fn line(&self, index: usize) -> &Line {
        &self.lines[index]
    }

    pub fn states(&self) -> [bool; LINE_COUNT] {
        self.lines.map(|line| line.value)
    }

    pub fn device_lines(&self, device: DeviceId) -> DeviceLines {
        DeviceLines::from_states(&self.states(), device)
    }
}
