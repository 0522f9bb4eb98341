//! Daemon configuration
//!
//! Read from `$DUALJOY_CONFIG` or `<config dir>/dualjoy/config.toml`. A missing
//! file is created with the defaults, which match the reference board wiring.

use crate::indicator::IndicatorTimings;
use crate::input::{LineMap, LineMapError, Polarity};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_ENV: &str = "DUALJOY_CONFIG";
const CONFIG_DIR: &str = "dualjoy";
const CONFIG_FILE: &str = "config.toml";

/// GPIOs above this are not on the 40-pin header
pub const MAX_HEADER_GPIO: u8 = 27;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GPIO {gpio} for {line} is outside the header range 0..=27")]
    PinOutOfRange { line: String, gpio: u8 },

    #[error("Invalid pin map: {0}")]
    LineMap(#[from] LineMapError),

    #[error("LED GPIO {0} is also used as a joystick input")]
    LedPinShared(u8),

    #[error("{0} must not be zero")]
    ZeroInterval(&'static str),

    #[error("Poll period of {poll_us}us must be shorter than the debounce window of {debounce_us}us")]
    PollTooSlow { poll_us: u32, debounce_us: u32 },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_period_us: u32,
    pub debounce_ms: u32,
    pub suspended_sleep_ms: u32,
    pub stats_interval_s: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_period_us: 1_000,
            debounce_ms: 20,
            suspended_sleep_ms: 100,
            stats_interval_s: 10,
        }
    }
}

/// GPIO numbers of one DB9 port
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortPins {
    pub up: u8,
    pub down: u8,
    pub left: u8,
    pub right: u8,
    pub button: u8,
}

impl PortPins {
    fn named(&self) -> [(&'static str, u8); 5] {
        [
            ("up", self.up),
            ("down", self.down),
            ("left", self.left),
            ("right", self.right),
            ("button", self.button),
        ]
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PinConfig {
    pub polarity: Polarity,
    pub port_one: PortPins,
    pub port_two: PortPins,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            polarity: Polarity::ActiveLow,
            port_one: PortPins {
                up: 5,
                down: 4,
                left: 3,
                right: 2,
                button: 27,
            },
            port_two: PortPins {
                up: 9,
                down: 8,
                left: 7,
                right: 6,
                button: 26,
            },
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Unset runs without an LED
    pub led_pin: Option<u8>,
    /// LED level once the host has settled
    pub connected_level: bool,
    pub not_connected_blink_ms: u32,
    pub suspended_blink_ms: u32,
    pub fast_blink_ms: u32,
    pub settle_after_connect_ms: u32,
    pub settle_after_resume_ms: u32,
    pub flash_ms: u32,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            led_pin: Some(17),
            connected_level: false,
            not_connected_blink_ms: 250,
            suspended_blink_ms: 2500,
            fast_blink_ms: 50,
            settle_after_connect_ms: 1000,
            settle_after_resume_ms: 500,
            flash_ms: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub port_one_device: PathBuf,
    pub port_two_device: PathBuf,
    /// 0 sends reports without an id prefix
    pub port_one_report_id: u8,
    pub port_two_report_id: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port_one_device: PathBuf::from("/dev/hidg0"),
            port_two_device: PathBuf::from("/dev/hidg1"),
            port_one_report_id: 0x04,
            port_two_report_id: 0x05,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Controller name under /sys/class/udc, first one found when unset
    pub udc: Option<String>,
    pub poll_ms: u32,
    /// Hold off polling the joysticks until the host has configured the gadget
    pub wait_for_host: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            udc: None,
            poll_ms: 50,
            wait_for_host: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DualJoyConfig {
    pub timing: TimingConfig,
    pub pins: PinConfig,
    pub indicator: IndicatorConfig,
    pub transport: TransportConfig,
    pub link: LinkConfig,
}

impl DualJoyConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ports = [("port_one", &self.pins.port_one), ("port_two", &self.pins.port_two)];
        for (port, pins) in ports {
            for (role, gpio) in pins.named() {
                if gpio > MAX_HEADER_GPIO {
                    return Err(ConfigError::PinOutOfRange {
                        line: format!("{}.{}", port, role),
                        gpio,
                    });
                }
            }
        }

        let map = self.line_map()?;
        if let Some(led) = self.indicator.led_pin {
            if led > MAX_HEADER_GPIO {
                return Err(ConfigError::PinOutOfRange {
                    line: "indicator.led_pin".to_string(),
                    gpio: led,
                });
            }
            if map.mask() & (1 << led) != 0 {
                return Err(ConfigError::LedPinShared(led));
            }
        }

        let intervals = [
            ("timing.poll_period_us", self.timing.poll_period_us),
            ("timing.debounce_ms", self.timing.debounce_ms),
            ("timing.stats_interval_s", self.timing.stats_interval_s),
            ("indicator.not_connected_blink_ms", self.indicator.not_connected_blink_ms),
            ("indicator.suspended_blink_ms", self.indicator.suspended_blink_ms),
            ("indicator.fast_blink_ms", self.indicator.fast_blink_ms),
            ("indicator.settle_after_connect_ms", self.indicator.settle_after_connect_ms),
            ("indicator.settle_after_resume_ms", self.indicator.settle_after_resume_ms),
            ("indicator.flash_ms", self.indicator.flash_ms),
            ("link.poll_ms", self.link.poll_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroInterval(*name));
        }

        let debounce_us = self.debounce_us();
        if self.timing.poll_period_us >= debounce_us {
            return Err(ConfigError::PollTooSlow {
                poll_us: self.timing.poll_period_us,
                debounce_us,
            });
        }

        Ok(())
    }

    /// Pin table in logical line order
    pub fn line_map(&self) -> Result<LineMap, ConfigError> {
        let one = &self.pins.port_one;
        let two = &self.pins.port_two;
        let gpios = [
            one.up, one.down, one.left, one.right, one.button, two.up, two.down, two.left,
            two.right, two.button,
        ];
        Ok(LineMap::new(gpios, self.pins.polarity)?)
    }

    pub fn debounce_us(&self) -> u32 {
        self.timing.debounce_ms.saturating_mul(1000)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_micros(self.timing.poll_period_us as u64)
    }

    pub fn suspended_sleep(&self) -> Duration {
        Duration::from_millis(self.timing.suspended_sleep_ms as u64)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.timing.stats_interval_s as u64)
    }

    pub fn link_poll(&self) -> Duration {
        Duration::from_millis(self.link.poll_ms as u64)
    }

    pub fn indicator_timings(&self) -> IndicatorTimings {
        let us = |ms: u32| ms.saturating_mul(1000);
        IndicatorTimings {
            not_connected_blink_us: us(self.indicator.not_connected_blink_ms),
            suspended_blink_us: us(self.indicator.suspended_blink_ms),
            fast_blink_us: us(self.indicator.fast_blink_ms),
            settle_after_connect_us: us(self.indicator.settle_after_connect_ms),
            settle_after_resume_us: us(self.indicator.settle_after_resume_ms),
            flash_us: us(self.indicator.flash_ms),
        }
    }

    /// Longest interval ever scheduled on the clock
    pub fn horizon_us(&self) -> u32 {
        let t = self.indicator_timings();
        [
            self.debounce_us(),
            t.not_connected_blink_us,
            t.suspended_blink_us,
            t.fast_blink_us,
            t.settle_after_connect_us,
            t.settle_after_resume_us,
            t.flash_us,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
        // keep the wrapping comparison unambiguous
        .clamp(1, i32::MAX as u32 / 2)
    }
}

/// `$DUALJOY_CONFIG`, else `<config dir>/dualjoy/config.toml`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Loads the config at `path`, writing the defaults there first if it does not exist
pub async fn load_or_create(path: &Path) -> Result<DualJoyConfig> {
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        info!("No config at {}, writing defaults", path.display());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let config = DualJoyConfig::default();
        tokio::fs::write(path, config.to_toml()?)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        return Ok(config);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file: {}", e))?;
    let config = DualJoyConfig::from_toml(&content)?;
    debug!("Loaded config from {}: {:?}", path.display(), config);
    Ok(config)
}
