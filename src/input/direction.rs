//! 8-way direction encoding
//!
//! Codes match the HID hat switch usage (logical 1..=8, clockwise from north,
//! 0 as the null/center state).

use crate::input::lines::DeviceLines;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Center = 0,
    North = 1,
    NorthEast = 2,
    East = 3,
    SouthEast = 4,
    South = 5,
    SouthWest = 6,
    West = 7,
    NorthWest = 8,
}

impl Direction {
    /// Encodes the four directional lines of one port.
    ///
    /// The vertical axis decides first (up before down), then a horizontal
    /// line turns it into a diagonal (right before left). Opposite lines held
    /// together are not rejected; they resolve through the same order.
    pub fn encode(up: bool, down: bool, left: bool, right: bool) -> Self {
        if up {
            if right {
                Direction::NorthEast
            } else if left {
                Direction::NorthWest
            } else {
                Direction::North
            }
        } else if down {
            if right {
                Direction::SouthEast
            } else if left {
                Direction::SouthWest
            } else {
                Direction::South
            }
        } else if right {
            Direction::East
        } else if left {
            Direction::West
        } else {
            Direction::Center
        }
    }

    pub fn from_lines(lines: &DeviceLines) -> Self {
        Self::encode(lines.up, lines.down, lines.left, lines.right)
    }

    /// Hat switch value sent on the wire
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Direction::Center => "C",
            Direction::North => "N",
            Direction::NorthEast => "NE",
            Direction::East => "E",
            Direction::SouthEast => "SE",
            Direction::South => "S",
            Direction::SouthWest => "SW",
            Direction::West => "W",
            Direction::NorthWest => "NW",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Direction::*;

    #[test]
    fn all_sixteen_combinations() {
        // (up, down, left, right) -> expected
        let table = [
            ((false, false, false, false), Center),
            ((false, false, false, true), East),
            ((false, false, true, false), West),
            ((false, false, true, true), East),
            ((false, true, false, false), South),
            ((false, true, false, true), SouthEast),
            ((false, true, true, false), SouthWest),
            ((false, true, true, true), SouthEast),
            ((true, false, false, false), North),
            ((true, false, false, true), NorthEast),
            ((true, false, true, false), NorthWest),
            ((true, false, true, true), NorthEast),
            ((true, true, false, false), North),
            ((true, true, false, true), NorthEast),
            ((true, true, true, false), NorthWest),
            ((true, true, true, true), NorthEast),
        ];

        for ((up, down, left, right), expected) in table {
            assert_eq!(
                Direction::encode(up, down, left, right),
                expected,
                "up={} down={} left={} right={}",
                up,
                down,
                left,
                right
            );
        }
    }

    #[test]
    fn codes_follow_hat_switch_layout() {
        let clockwise = [
            North, NorthEast, East, SouthEast, South, SouthWest, West, NorthWest,
        ];
        for (expected, direction) in (1u8..).zip(clockwise) {
            assert_eq!(direction.code(), expected);
        }
        assert_eq!(Center.code(), 0);
    }

    #[test]
    fn from_lines_uses_directional_lines_only() {
        let lines = DeviceLines {
            left: true,
            button: true,
            ..Default::default()
        };
        assert_eq!(Direction::from_lines(&lines), West);
    }
}
