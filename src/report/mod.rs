//! Report construction, change detection and delivery
//!
//! A [`Report`] is the minimal summary of one port: its hat direction and its
//! button bits. The [`differ`] decides per tick whether a port's report has to
//! be (re)sent, and a [`ReportTransport`] hands finished reports to the host.
//!
//! ```text
//! DeviceLines ──► Report ──► LogicalDevice ──► ReportTransport
//!                            (last delivered)   (hidg0 / hidg1)
//! ```

pub mod differ;
pub mod hid_gadget;

pub use differ::{DeliveryStats, LogicalDevice, Outcome};
pub use hid_gadget::HidGadgetTransport;

use crate::input::{DeviceId, DeviceLines, Direction};
use std::fmt;

/// Button bit of the fire button
pub const BUTTON_FIRE: u8 = 0b0000_0001;

/// State summary of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Report {
    pub direction: Direction,
    pub buttons: u8,
}

impl Report {
    pub fn new(direction: Direction, buttons: u8) -> Self {
        Self { direction, buttons }
    }

    pub fn from_lines(lines: &DeviceLines) -> Self {
        Self {
            direction: Direction::from_lines(lines),
            buttons: if lines.button { BUTTON_FIRE } else { 0 },
        }
    }

    /// Input report as written to the host; `report_id` 0 means no id prefix
    pub fn to_wire(&self, report_id: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3);
        if report_id != 0 {
            bytes.push(report_id);
        }
        bytes.push(self.direction.code());
        bytes.push(self.buttons);
        bytes
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#04x}", self.direction, self.buttons)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Endpoint busy, previous report still pending")]
    Busy,

    #[error("Endpoint {0} not ready: {1}")]
    NotReady(String, String),

    #[error("Short write on {path}: {written} of {expected} bytes")]
    ShortWrite {
        path: String,
        written: usize,
        expected: usize,
    },

    #[error("Write to {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outbound channel to the host, one channel per logical device
///
/// `send_report` must return immediately; a report that cannot be queued
/// right now is a failure, not a wait.
pub trait ReportTransport: Send {
    fn send_report(&mut self, device: DeviceId, report: &Report) -> Result<(), TransportError>;
}

/// Transport that records every attempt and fails on demand
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: std::sync::Arc<std::sync::Mutex<RecordingState>>,
}

#[cfg(test)]
#[derive(Default)]
struct RecordingState {
    attempts: Vec<(DeviceId, Report)>,
    delivered: Vec<(DeviceId, Report)>,
    failing: [bool; crate::input::lines::DEVICE_COUNT],
}

#[cfg(test)]
impl RecordingTransport {
    pub fn set_failing(&self, device: DeviceId, failing: bool) {
        self.inner.lock().unwrap().failing[device.index()] = failing;
    }

    pub fn attempts(&self) -> Vec<(DeviceId, Report)> {
        self.inner.lock().unwrap().attempts.clone()
    }

    pub fn delivered(&self) -> Vec<(DeviceId, Report)> {
        self.inner.lock().unwrap().delivered.clone()
    }

    pub fn attempts_for(&self, device: DeviceId) -> Vec<Report> {
        self.attempts()
            .into_iter()
            .filter(|(id, _)| *id == device)
            .map(|(_, report)| report)
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        state.attempts.clear();
        state.delivered.clear();
    }
}

#[cfg(test)]
impl ReportTransport for RecordingTransport {
    fn send_report(&mut self, device: DeviceId, report: &Report) -> Result<(), TransportError> {
        let mut state = self.inner.lock().unwrap();
        state.attempts.push((device, *report));
        if state.failing[device.index()] {
            return Err(TransportError::Busy);
        }
        state.delivered.push((device, *report));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_from_lines() {
        let lines = DeviceLines {
            down: true,
            right: true,
            button: true,
            ..Default::default()
        };
        assert_eq!(
            Report::from_lines(&lines),
            Report::new(Direction::SouthEast, BUTTON_FIRE)
        );
        assert_eq!(
            Report::from_lines(&DeviceLines::default()),
            Report::new(Direction::Center, 0)
        );
    }

    #[test]
    fn wire_format_with_and_without_report_id() {
        let report = Report::new(Direction::West, BUTTON_FIRE);
        assert_eq!(report.to_wire(0x04), vec![0x04, 7, 1]);
        assert_eq!(report.to_wire(0), vec![7, 1]);
    }

    #[test]
    fn display_is_compact() {
        let report = Report::new(Direction::NorthEast, 0);
        assert_eq!(report.to_string(), "NE 0x00");
    }
}
