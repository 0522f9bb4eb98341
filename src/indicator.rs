//! Status LED state machine
//!
//! The LED shows the connection lifecycle as a baseline pattern and briefly
//! inverts on every delivered report.
//!
//! ```text
//!                 on_connected                 settle window over
//!  NotConnected ─────────────► ConnectedSettling ─────────────────► Connected
//!  (slow blink)                  (fast blink)                       (steady)
//!       ▲                                ▲                              │
//!       │ on_disconnected     on_resumed │          on_suspended        │
//!       └──────────────────────────── Suspended ◄───────────────────────┘
//!                                   (very slow blink)
//! ```
//!
//! EventFlash sits on top of whatever the baseline is. Lifecycle events only
//! replace the baseline; the LED itself is not touched until the flash ends.

use crate::clock::{Deadline, Timebase};
use rppal::gpio::{Gpio, OutputPin};
use std::fmt;
use tracing::{debug, info, trace};

#[derive(Debug, thiserror::Error)]
pub enum IndicatorError {
    #[error("Failed to open GPIO controller: {0}")]
    Gpio(String),

    #[error("LED GPIO {0} is not available: {1}")]
    PinUnavailable(u8, String),
}

/// Physical indicator
pub trait IndicatorOutput: Send {
    fn write(&mut self, level: bool);
}

/// LED on a GPIO output, high = lit
pub struct GpioLed {
    pin: OutputPin,
}

impl GpioLed {
    pub fn open(number: u8) -> Result<Self, IndicatorError> {
        let gpio = Gpio::new().map_err(|e| IndicatorError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(number)
            .map_err(|e| IndicatorError::PinUnavailable(number, e.to_string()))?
            .into_output_low();
        debug!("GPIO {} configured as status LED", number);
        Ok(Self { pin })
    }
}

impl IndicatorOutput for GpioLed {
    fn write(&mut self, level: bool) {
        if level {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

/// Used when no LED is configured
#[derive(Debug, Default)]
pub struct NoIndicator;

impl IndicatorOutput for NoIndicator {
    fn write(&mut self, _level: bool) {}
}

/// All indicator intervals, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorTimings {
    pub not_connected_blink_us: u32,
    pub suspended_blink_us: u32,
    pub fast_blink_us: u32,
    pub settle_after_connect_us: u32,
    pub settle_after_resume_us: u32,
    pub flash_us: u32,
}

impl Default for IndicatorTimings {
    fn default() -> Self {
        Self {
            not_connected_blink_us: 250_000,
            suspended_blink_us: 2_500_000,
            fast_blink_us: 50_000,
            settle_after_connect_us: 1_000_000,
            settle_after_resume_us: 500_000,
            flash_us: 30_000,
        }
    }
}

/// Baseline pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Steady(bool),
    SlowBlink { interval_us: u32 },
    FastBlinkUntil(Deadline),
}

/// Named state, derived from mode and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotConnected,
    ConnectedSettling,
    Connected,
    Suspended,
    EventFlash,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NotConnected => "not connected",
            Phase::ConnectedSettling => "connected (settling)",
            Phase::Connected => "connected",
            Phase::Suspended => "suspended",
            Phase::EventFlash => "event flash",
        };
        write!(f, "{}", name)
    }
}

pub struct Indicator {
    mode: Mode,
    flash_until: Option<Deadline>,
    // level to go back to when the flash ends
    restore_level: bool,
    level: bool,
    next_toggle: Option<Deadline>,
    connected: bool,
    suspended: bool,
    connected_level: bool,
    timings: IndicatorTimings,
    output: Box<dyn IndicatorOutput>,
}

impl Indicator {
    /// Starts in NotConnected with the LED off
    pub fn new(
        timings: IndicatorTimings,
        connected_level: bool,
        mut output: Box<dyn IndicatorOutput>,
    ) -> Self {
        output.write(false);
        Self {
            mode: Mode::SlowBlink {
                interval_us: timings.not_connected_blink_us,
            },
            flash_until: None,
            restore_level: false,
            level: false,
            next_toggle: None,
            connected: false,
            suspended: false,
            connected_level,
            timings,
            output,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn level(&self) -> bool {
        self.level
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn phase(&self) -> Phase {
        if self.flash_until.is_some() {
            return Phase::EventFlash;
        }
        if self.suspended {
            return Phase::Suspended;
        }
        match self.mode {
            Mode::Steady(_) => Phase::Connected,
            Mode::FastBlinkUntil(_) => Phase::ConnectedSettling,
            Mode::SlowBlink { .. } => Phase::NotConnected,
        }
    }

    fn set_level(&mut self, level: bool) {
        if self.level != level {
            self.level = level;
            self.output.write(level);
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        // first toggle of the new pattern happens on the next tick
        self.next_toggle = None;
    }

    /// Inverts the LED for the flash window. A flash while one is armed
    /// inverts again and extends the window.
    pub fn flash(&mut self, timebase: &Timebase) {
        if self.flash_until.is_none() {
            self.restore_level = self.level;
        }
        self.set_level(!self.level);
        self.flash_until = Some(timebase.after(self.timings.flash_us));
    }

    pub fn on_connected(&mut self, timebase: &Timebase) {
        info!("Host connected");
        self.connected = true;
        self.suspended = false;
        let until = timebase.after(self.timings.settle_after_connect_us);
        self.set_mode(Mode::FastBlinkUntil(until));
    }

    pub fn on_disconnected(&mut self) {
        info!("Host disconnected");
        self.connected = false;
        self.suspended = false;
        self.set_mode(Mode::SlowBlink {
            interval_us: self.timings.not_connected_blink_us,
        });
    }

    pub fn on_suspended(&mut self) {
        info!("Host suspended the bus");
        self.suspended = true;
        self.set_mode(Mode::SlowBlink {
            interval_us: self.timings.suspended_blink_us,
        });
    }

    pub fn on_resumed(&mut self, timebase: &Timebase) {
        info!("Host resumed the bus");
        self.suspended = false;
        if self.connected {
            let until = timebase.after(self.timings.settle_after_resume_us);
            self.set_mode(Mode::FastBlinkUntil(until));
        } else {
            self.set_mode(Mode::SlowBlink {
                interval_us: self.timings.not_connected_blink_us,
            });
        }
    }

    /// Advances the pattern; called once per poll tick
    pub fn tick(&mut self, timebase: &Timebase) {
        if self.flash_until.is_some() {
            if !timebase.has_passed(self.flash_until) {
                return;
            }
            self.flash_until = None;
            self.set_level(self.restore_level);
            trace!("Event flash over, LED back to {}", self.restore_level);
        }

        if let Mode::FastBlinkUntil(until) = self.mode {
            if timebase.has_passed(Some(until)) {
                debug!("Settle window over, LED steady");
                self.set_mode(Mode::Steady(self.connected_level));
            }
        }

        let interval_us = match self.mode {
            Mode::Steady(level) => {
                self.set_level(level);
                return;
            }
            Mode::SlowBlink { interval_us } => interval_us,
            Mode::FastBlinkUntil(_) => self.timings.fast_blink_us,
        };

        if self.next_toggle.is_none() || timebase.has_passed(self.next_toggle) {
            self.set_level(!self.level);
            self.next_toggle = Some(timebase.after(interval_us));
        }
    }

    /// LED off, used on shutdown
    pub fn off(&mut self) {
        self.flash_until = None;
        self.set_level(false);
    }
}

/// Indicator output that records every level written
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingIndicator {
    writes: std::sync::Arc<std::sync::Mutex<Vec<bool>>>,
}

#[cfg(test)]
impl RecordingIndicator {
    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }
}

#[cfg(test)]
impl IndicatorOutput for RecordingIndicator {
    fn write(&mut self, level: bool) {
        self.writes.lock().unwrap().push(level);
    }
}
