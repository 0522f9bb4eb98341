//! Change detection against the last delivered report
//!
//! Each [`LogicalDevice`] remembers the last report the transport accepted.
//! A new report is offered whenever the current one differs from it. A failed
//! send leaves the cache untouched, so the same report is offered again on
//! every following tick until it gets through; there is no backoff and no
//! give-up.

use crate::input::{DeviceId, DeviceLines};
use crate::report::{Report, ReportTransport};
use chrono::{DateTime, Local};
use tracing::{debug, info, trace, warn};

/// Result of evaluating one device for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Current report equals the last delivered one
    Unchanged,
    /// Report accepted by the transport
    Delivered(Report),
    /// Transport refused; will be retried next tick
    Failed(Report),
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    pub last_delivery: Option<DateTime<Local>>,
}

/// One joystick endpoint as seen by the host
#[derive(Debug, Clone)]
pub struct LogicalDevice {
    id: DeviceId,
    // None until the first confirmed delivery, so the first report always goes out
    last_sent: Option<Report>,
    stats: DeliveryStats,
    failure_streak: u32,
}

impl LogicalDevice {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            last_sent: None,
            stats: DeliveryStats::default(),
            failure_streak: 0,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn last_sent(&self) -> Option<Report> {
        self.last_sent
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// Builds this tick's report and sends it if it differs from the last delivered one
    pub fn evaluate(
        &mut self,
        lines: &DeviceLines,
        transport: &mut dyn ReportTransport,
    ) -> Outcome {
        let candidate = Report::from_lines(lines);
        if self.last_sent == Some(candidate) {
            return Outcome::Unchanged;
        }

        match transport.send_report(self.id, &candidate) {
            Ok(()) => {
                if self.failure_streak > 0 {
                    info!(
                        "{}: delivered {} after {} failed attempts",
                        self.id, candidate, self.failure_streak
                    );
                    self.failure_streak = 0;
                } else {
                    debug!("{}: delivered {}", self.id, candidate);
                }
                self.last_sent = Some(candidate);
                self.stats.delivered += 1;
                self.stats.last_delivery = Some(Local::now());
                Outcome::Delivered(candidate)
            }
            Err(e) => {
                // retries happen every tick, only the first of a streak is a warning
                if self.failure_streak == 0 {
                    warn!("{}: failed to send report {}: {}", self.id, candidate, e);
                } else {
                    trace!("{}: retry of {} failed: {}", self.id, candidate, e);
                }
                self.failure_streak = self.failure_streak.saturating_add(1);
                self.stats.failed += 1;
                Outcome::Failed(candidate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Direction;
    use crate::report::{RecordingTransport, BUTTON_FIRE};

    #[test]
    fn first_evaluation_always_sends() {
        let mut transport = RecordingTransport::default();
        let mut device = LogicalDevice::new(DeviceId::One);

        let outcome = device.evaluate(&DeviceLines::default(), &mut transport);
        assert_eq!(outcome, Outcome::Delivered(Report::default()));
        assert_eq!(device.last_sent(), Some(Report::default()));
    }

    #[test]
    fn unchanged_report_is_not_resent() {
        let mut transport = RecordingTransport::default();
        let mut device = LogicalDevice::new(DeviceId::One);
        let lines = DeviceLines {
            up: true,
            ..Default::default()
        };

        device.evaluate(&lines, &mut transport);
        assert_eq!(device.evaluate(&lines, &mut transport), Outcome::Unchanged);
        assert_eq!(device.evaluate(&lines, &mut transport), Outcome::Unchanged);
        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(device.stats().delivered, 1);
    }

    #[test]
    fn failed_report_is_retried_until_delivered() {
        let mut transport = RecordingTransport::default();
        let mut device = LogicalDevice::new(DeviceId::Two);
        device.evaluate(&DeviceLines::default(), &mut transport);

        let lines = DeviceLines {
            right: true,
            button: true,
            ..Default::default()
        };
        let expected = Report::new(Direction::East, BUTTON_FIRE);

        transport.set_failing(DeviceId::Two, true);
        for _ in 0..3 {
            assert_eq!(
                device.evaluate(&lines, &mut transport),
                Outcome::Failed(expected)
            );
            assert_eq!(device.last_sent(), Some(Report::default()));
        }

        transport.set_failing(DeviceId::Two, false);
        assert_eq!(
            device.evaluate(&lines, &mut transport),
            Outcome::Delivered(expected)
        );
        assert_eq!(device.evaluate(&lines, &mut transport), Outcome::Unchanged);

        let attempts = transport.attempts_for(DeviceId::Two);
        assert_eq!(attempts.len(), 5);
        assert!(attempts[1..].iter().all(|report| *report == expected));
        assert_eq!(device.stats().failed, 3);
    }

    #[test]
    fn reverting_while_failing_needs_no_send() {
        let mut transport = RecordingTransport::default();
        let mut device = LogicalDevice::new(DeviceId::One);
        device.evaluate(&DeviceLines::default(), &mut transport);

        transport.set_failing(DeviceId::One, true);
        let pressed = DeviceLines {
            button: true,
            ..Default::default()
        };
        assert!(matches!(
            device.evaluate(&pressed, &mut transport),
            Outcome::Failed(_)
        ));

        // back to what the host already has
        assert_eq!(
            device.evaluate(&DeviceLines::default(), &mut transport),
            Outcome::Unchanged
        );
    }
}
