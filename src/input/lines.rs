//! Physical-to-logical line mapping
//!
//! The two DB9 ports give 10 lines in total. Each line is identified by its
//! port ([`DeviceId`]) and its function ([`LineRole`]); the logical index is
//! `device * 5 + role`. The [`LineMap`] is built once from configuration and
//! translates a raw GPIO level mask into the active state of each logical line.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const LINES_PER_DEVICE: usize = 5;
pub const DEVICE_COUNT: usize = 2;
pub const LINE_COUNT: usize = LINES_PER_DEVICE * DEVICE_COUNT;

/// Highest GPIO number that fits the raw level mask
pub const MAX_GPIO: u8 = 31;

// Logical joystick endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    One,
    Two,
}

impl DeviceId {
    pub const ALL: [DeviceId; DEVICE_COUNT] = [DeviceId::One, DeviceId::Two];

    /// Zero-based index, also used as the transport channel
    pub fn index(self) -> usize {
        match self {
            DeviceId::One => 0,
            DeviceId::Two => 1,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::One => write!(f, "J1"),
            DeviceId::Two => write!(f, "J2"),
        }
    }
}

// Function of a line within one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineRole {
    Up,
    Down,
    Left,
    Right,
    Button,
}

impl LineRole {
    pub fn index(self) -> usize {
        match self {
            LineRole::Up => 0,
            LineRole::Down => 1,
            LineRole::Left => 2,
            LineRole::Right => 3,
            LineRole::Button => 4,
        }
    }
}

/// Logical index of a line in the 10-line array
pub fn line_index(device: DeviceId, role: LineRole) -> usize {
    device.index() * LINES_PER_DEVICE + role.index()
}

/// Electrical level that means "pressed"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Line is pulled up and the switch shorts it to ground
    #[default]
    ActiveLow,
    ActiveHigh,
}

/// Debounced state of the 5 lines of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceLines {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub button: bool,
}

impl DeviceLines {
    pub fn from_states(states: &[bool; LINE_COUNT], device: DeviceId) -> Self {
        let at = |role| states[line_index(device, role)];
        Self {
            up: at(LineRole::Up),
            down: at(LineRole::Down),
            left: at(LineRole::Left),
            right: at(LineRole::Right),
            button: at(LineRole::Button),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LineMapError {
    #[error("GPIO {0} is outside the sampled range 0..=31")]
    OutOfRange(u8),

    #[error("GPIO {0} is assigned to more than one line")]
    Duplicate(u8),
}

/// Immutable table from logical line index to GPIO number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMap {
    gpios: [u8; LINE_COUNT],
    polarity: Polarity,
    mask: u32,
}

impl LineMap {
    /// Builds the map; `gpios` is ordered by [`line_index`]
    pub fn new(gpios: [u8; LINE_COUNT], polarity: Polarity) -> Result<Self, LineMapError> {
        let mut mask = 0u32;
        for &gpio in &gpios {
            if gpio > MAX_GPIO {
                return Err(LineMapError::OutOfRange(gpio));
            }
            let bit = 1u32 << gpio;
            if mask & bit != 0 {
                return Err(LineMapError::Duplicate(gpio));
            }
            mask |= bit;
        }

        Ok(Self {
            gpios,
            polarity,
            mask,
        })
    }

    pub fn gpio(&self, device: DeviceId, role: LineRole) -> u8 {
        self.gpios[line_index(device, role)]
    }

    pub fn gpios(&self) -> &[u8; LINE_COUNT] {
        &self.gpios
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Bits of all monitored GPIOs
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Raw level mask with every line released
    pub fn idle_levels(&self) -> u32 {
        match self.polarity {
            Polarity::ActiveLow => self.mask,
            Polarity::ActiveHigh => 0,
        }
    }

    /// Active state of each logical line for a raw level mask
    pub fn decode(&self, levels: u32) -> [bool; LINE_COUNT] {
        let active = match self.polarity {
            Polarity::ActiveLow => !levels & self.mask,
            Polarity::ActiveHigh => levels & self.mask,
        };

        let mut states = [false; LINE_COUNT];
        for (state, &gpio) in states.iter_mut().zip(self.gpios.iter()) {
            *state = active & (1 << gpio) != 0;
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPIOS: [u8; LINE_COUNT] = [5, 4, 3, 2, 27, 9, 8, 7, 6, 26];

    #[test]
    fn decode_active_low() {
        let map = LineMap::new(GPIOS, Polarity::ActiveLow).unwrap();
        assert_eq!(map.decode(map.idle_levels()), [false; LINE_COUNT]);

        // J1 left and J2 button pulled to ground
        let levels = map.idle_levels() & !(1 << 3) & !(1 << 26);
        let states = map.decode(levels);
        assert!(states[line_index(DeviceId::One, LineRole::Left)]);
        assert!(states[line_index(DeviceId::Two, LineRole::Button)]);
        assert_eq!(states.iter().filter(|s| **s).count(), 2);
    }

    #[test]
    fn decode_active_high_ignores_unmapped_bits() {
        let map = LineMap::new(GPIOS, Polarity::ActiveHigh).unwrap();
        let states = map.decode((1 << 9) | (1 << 0) | (1 << 31));
        assert!(states[line_index(DeviceId::Two, LineRole::Up)]);
        assert_eq!(states.iter().filter(|s| **s).count(), 1);
    }

    #[test]
    fn rejects_duplicate_and_out_of_range_pins() {
        let mut gpios = GPIOS;
        gpios[9] = 5;
        assert_eq!(
            LineMap::new(gpios, Polarity::ActiveLow),
            Err(LineMapError::Duplicate(5))
        );

        gpios[9] = 40;
        assert_eq!(
            LineMap::new(gpios, Polarity::ActiveLow),
            Err(LineMapError::OutOfRange(40))
        );
    }

    #[test]
    fn device_lines_follow_line_index() {
        let mut states = [false; LINE_COUNT];
        states[line_index(DeviceId::Two, LineRole::Right)] = true;
        states[line_index(DeviceId::One, LineRole::Button)] = true;

        let one = DeviceLines::from_states(&states, DeviceId::One);
        let two = DeviceLines::from_states(&states, DeviceId::Two);
        assert!(one.button && !one.right);
        assert!(two.right && !two.button);

        let map = LineMap::new(GPIOS, Polarity::ActiveLow).unwrap();
        assert_eq!(map.gpio(DeviceId::Two, LineRole::Up), 9);
        assert_eq!(map.gpio(DeviceId::One, LineRole::Button), 27);
    }
}
