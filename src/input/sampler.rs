//! Raw line sampling
//!
//! A [`RawSampler`] returns the electrical level of every monitored GPIO as a
//! bitmask (bit n = GPIO n, 1 = high). It knows nothing about polarity or
//! which line a pin belongs to; that is the [`LineMap`]'s job.

use crate::input::lines::{LineMap, Polarity};
use rppal::gpio::{Gpio, InputPin};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Failed to open GPIO controller: {0}")]
    Gpio(String),

    #[error("GPIO {0} is not available: {1}")]
    PinUnavailable(u8, String),
}

/// Reads the current level of all monitored lines, once per tick
pub trait RawSampler: Send {
    fn read_raw_lines(&mut self) -> u32;
}

/// Sampler reading the board's GPIO header through `rppal`
pub struct GpioSampler {
    pins: Vec<(u8, InputPin)>,
}

impl GpioSampler {
    /// Claims every pin of `map` as an input, biased towards the released level
    pub fn open(map: &LineMap) -> Result<Self, SamplerError> {
        let gpio = Gpio::new().map_err(|e| SamplerError::Gpio(e.to_string()))?;
        info!(
            "Configuring {} joystick inputs ({:?})",
            map.gpios().len(),
            map.polarity()
        );

        let mut pins = Vec::with_capacity(map.gpios().len());
        for &number in map.gpios() {
            let pin = gpio
                .get(number)
                .map_err(|e| SamplerError::PinUnavailable(number, e.to_string()))?;
            let input = match map.polarity() {
                Polarity::ActiveLow => pin.into_input_pullup(),
                Polarity::ActiveHigh => pin.into_input_pulldown(),
            };
            debug!("GPIO {} configured as input", number);
            pins.push((number, input));
        }

        Ok(Self { pins })
    }
}

impl RawSampler for GpioSampler {
    fn read_raw_lines(&mut self) -> u32 {
        self.pins
            .iter()
            .filter(|(_, pin)| pin.is_high())
            .fold(0, |levels, (number, _)| levels | (1 << number))
    }
}

/// Sampler whose levels are set by the test
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct ScriptedSampler {
    levels: std::sync::Arc<std::sync::atomic::AtomicU32>,
    map: LineMap,
}

#[cfg(test)]
impl ScriptedSampler {
    /// All lines released
    pub fn idle(map: &LineMap) -> Self {
        Self {
            levels: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(map.idle_levels())),
            map: map.clone(),
        }
    }

    /// Drives `gpio` to its pressed level
    pub fn press(&self, gpio: u8) {
        self.drive(gpio, true);
    }

    pub fn release(&self, gpio: u8) {
        self.drive(gpio, false);
    }

    fn drive(&self, gpio: u8, pressed: bool) {
        use std::sync::atomic::Ordering;

        let high = match self.map.polarity() {
            Polarity::ActiveLow => !pressed,
            Polarity::ActiveHigh => pressed,
        };
        let bit = 1u32 << gpio;
        if high {
            self.levels.fetch_or(bit, Ordering::Relaxed);
        } else {
            self.levels.fetch_and(!bit, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
impl RawSampler for ScriptedSampler {
    fn read_raw_lines(&mut self) -> u32 {
        self.levels.load(std::sync::atomic::Ordering::Relaxed)
    }
}
