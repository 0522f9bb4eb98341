//! Poll loop driver
//!
//! Owns every piece of pipeline state and runs it one tick at a time:
//!
//! ```text
//! RawSampler ─► LineMap ─► Debouncer ─► LogicalDevice x2 ─► Indicator
//!   (levels)    (active)   (committed)   (diff / send)      (flash, blink)
//! ```
//!
//! Two phases, enforced by the type:
//! - `Driver<Enumerating>` only services the indicator and link events until
//!   the host has configured the gadget.
//! - `Driver<Polling>` runs the full pipeline.
//!
//! Link events arrive from the watcher task over a channel and are applied
//! between ticks, never inside one.

use crate::clock::{Clock, Timebase};
use crate::config::{ConfigError, DualJoyConfig};
use crate::indicator::{
    GpioLed, Indicator, IndicatorError, IndicatorOutput, NoIndicator, Phase,
};
use crate::input::lines::DEVICE_COUNT;
use crate::input::{Debouncer, DeviceId, GpioSampler, LineMap, RawSampler, SamplerError};
use crate::link::LinkEvent;
use crate::report::{HidGadgetTransport, LogicalDevice, Outcome, ReportTransport};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Input setup failed: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Indicator setup failed: {0}")]
    Indicator(#[from] IndicatorError),
}

#[derive(Clone, Debug)]
pub struct DriverSettings {
    pub debounce_us: u32,
    pub poll_period: Duration,
    pub suspended_sleep: Duration,
    pub stats_interval: Duration,
    pub wait_for_host: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            debounce_us: 20_000,
            poll_period: Duration::from_millis(1),
            suspended_sleep: Duration::from_millis(100),
            stats_interval: Duration::from_secs(10),
            wait_for_host: true,
        }
    }
}

impl DriverSettings {
    pub fn from_config(config: &DualJoyConfig) -> Self {
        Self {
            debounce_us: config.debounce_us(),
            poll_period: config.poll_period(),
            suspended_sleep: config.suspended_sleep(),
            stats_interval: config.stats_interval(),
            wait_for_host: config.link.wait_for_host,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub committed: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[state]
#[derive(Debug, Clone)]
pub enum DriverState {
    Enumerating,
    Polling,
}

#[machine]
pub struct Driver<S: DriverState> {
    timebase: Timebase,
    line_map: LineMap,
    sampler: Box<dyn RawSampler>,
    transport: Box<dyn ReportTransport>,
    debouncer: Debouncer,
    devices: [LogicalDevice; DEVICE_COUNT],
    indicator: Indicator,
    link_events: mpsc::Receiver<LinkEvent>,
    link_open: bool,
    settings: DriverSettings,
    ticks: u64,
}

// Methods available in both phases
impl<S: DriverState> Driver<S> {
    pub fn phase(&self) -> Phase {
        self.indicator.phase()
    }

    pub fn device(&self, id: DeviceId) -> &LogicalDevice {
        &self.devices[id.index()]
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn on_connected(&mut self) {
        self.indicator.on_connected(&self.timebase);
    }

    pub fn on_disconnected(&mut self) {
        self.indicator.on_disconnected();
    }

    pub fn on_suspended(&mut self) {
        self.indicator.on_suspended();
    }

    pub fn on_resumed(&mut self) {
        self.indicator.on_resumed(&self.timebase);
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        debug!("Applying link event: {}", event);
        match event {
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::Disconnected => self.on_disconnected(),
            LinkEvent::Suspended => self.on_suspended(),
            LinkEvent::Resumed => self.on_resumed(),
        }
    }

    /// Applies every queued link event; returns how many there were
    pub fn drain_link_events(&mut self) -> usize {
        let mut applied = 0;
        while self.link_open {
            match self.link_events.try_recv() {
                Ok(event) => {
                    self.handle_link_event(event);
                    applied += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    warn!("Link watcher gone, lifecycle state is frozen");
                    self.link_open = false;
                }
            }
        }
        applied
    }

    fn log_stats(&self) {
        for device in &self.devices {
            let stats = device.stats();
            let last = stats
                .last_delivery
                .map(|at| at.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "never".to_string());
            info!(
                "{}: {} delivered, {} failed, last {} ({})",
                device.id(),
                stats.delivered,
                stats.failed,
                last,
                device
                    .last_sent()
                    .map(|report| report.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        debug!("{} ticks, indicator {}", self.ticks, self.indicator.phase());
    }

    // drives the LED low on the way out
    fn shut_down(&mut self) {
        info!("Driver stopping after {} ticks", self.ticks);
        self.log_stats();
        self.indicator.off();
    }
}

impl Driver<Enumerating> {
    /// Builds a driver around already constructed capabilities
    pub fn create(
        timebase: Timebase,
        line_map: LineMap,
        sampler: Box<dyn RawSampler>,
        transport: Box<dyn ReportTransport>,
        indicator: Indicator,
        link_events: mpsc::Receiver<LinkEvent>,
        settings: DriverSettings,
    ) -> Self {
        info!(
            "Creating driver: debounce {}us, poll every {:?}, horizon {}us",
            settings.debounce_us,
            settings.poll_period,
            timebase.horizon_us()
        );
        let debouncer = Debouncer::new(settings.debounce_us);
        let devices = DeviceId::ALL.map(LogicalDevice::new);

        Self::new(
            timebase,
            line_map,
            sampler,
            transport,
            debouncer,
            devices,
            indicator,
            link_events,
            true,
            settings,
            0,
        )
    }

    /// Opens the board's GPIOs and the gadget endpoints described by `config`
    pub fn from_config(
        config: &DualJoyConfig,
        clock: Arc<dyn Clock>,
        link_events: mpsc::Receiver<LinkEvent>,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let line_map = config.line_map()?;
        let timebase = Timebase::new(clock, config.horizon_us());

        let sampler = GpioSampler::open(&line_map)?;
        let output: Box<dyn IndicatorOutput> = match config.indicator.led_pin {
            Some(pin) => Box::new(GpioLed::open(pin)?),
            None => {
                info!("No status LED configured");
                Box::new(NoIndicator)
            }
        };
        let indicator = Indicator::new(
            config.indicator_timings(),
            config.indicator.connected_level,
            output,
        );
        let transport = HidGadgetTransport::new(
            [
                config.transport.port_one_device.as_path(),
                config.transport.port_two_device.as_path(),
            ],
            [
                config.transport.port_one_report_id,
                config.transport.port_two_report_id,
            ],
        );

        Ok(Self::create(
            timebase,
            line_map,
            Box::new(sampler),
            Box::new(transport),
            indicator,
            link_events,
            DriverSettings::from_config(config),
        ))
    }

    pub fn host_ready(&self) -> bool {
        !self.settings.wait_for_host || self.indicator.is_connected()
    }

    /// One tick while waiting for the host: lifecycle and LED only
    pub fn enumeration_tick(&mut self) {
        self.drain_link_events();
        self.indicator.tick(&self.timebase);
    }

    /// Services the indicator until the host is ready; `None` if cancelled first
    pub async fn wait_for_host(mut self, cancel: &CancellationToken) -> Option<Driver<Polling>> {
        info!("Waiting for the host to configure the gadget");
        let mut ticker = tokio::time::interval(self.settings.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.enumeration_tick();
            if self.host_ready() {
                return Some(self.begin_polling());
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shut_down();
                    return None;
                }
                _ = ticker.tick() => {}
            }
        }
    }

    pub fn begin_polling(self) -> Driver<Polling> {
        info!("Starting joystick polling ({})", self.indicator.phase());
        self.transition()
    }
}

impl Driver<Polling> {
    /// One pass of the pipeline: sample, debounce, both reports, indicator
    pub fn tick(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();

        let levels = self.sampler.read_raw_lines();
        let active = self.line_map.decode(levels);
        summary.committed = self.debouncer.update(&active, &self.timebase);

        for device in self.devices.iter_mut() {
            let lines = self.debouncer.device_lines(device.id());
            match device.evaluate(&lines, self.transport.as_mut()) {
                Outcome::Unchanged => {}
                Outcome::Delivered(_) => {
                    self.indicator.flash(&self.timebase);
                    summary.delivered += 1;
                }
                Outcome::Failed(_) => summary.failed += 1,
            }
        }

        self.indicator.tick(&self.timebase);
        self.ticks += 1;

        if summary != TickSummary::default() {
            trace!("Tick {}: {:?}", self.ticks, summary);
        }
        summary
    }

    /// Runs the pipeline at the configured period until `cancel` fires
    pub async fn run_until_cancelled(mut self, cancel: CancellationToken) {
        info!("Poll loop running every {:?}", self.settings.poll_period);
        let mut ticker = tokio::time::interval(self.settings.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = tokio::time::interval(self.settings.stats_interval);
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick of an interval fires immediately
        stats.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Poll loop cancelled");
                    break;
                }
                _ = stats.tick() => self.log_stats(),
                _ = ticker.tick() => {
                    self.drain_link_events();
                    self.tick();
                    if self.indicator.is_suspended() {
                        // host is asleep, no need to sample at full rate
                        tokio::time::sleep(self.settings.suspended_sleep).await;
                    }
                }
            }
        }

        self.shut_down();
    }
}
