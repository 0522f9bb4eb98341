//! Joystick line input for both ports
//!
//! Implements the input half of the pipeline:
//!
//! 1. [`sampler`] - Raw electrical levels of the monitored GPIOs
//! 2. [`lines`] - Fixed map from GPIO number to logical line, with polarity
//! 3. [`debounce`] - Per-line lockout after every committed change
//! 4. [`direction`] - 4 directional lines to one of 9 hat codes
//!
//! # Architecture
//!
//! ```text
//! GPIO ──► RawSampler ──► LineMap ──► Debouncer ──► DeviceLines ──► Direction
//!          (u32 levels)   (active?)   (committed)   (per port)
//! ```
//!
//! Everything here runs inside one poll tick of the driver; nothing in this
//! module spawns or blocks.

pub mod debounce;
pub mod direction;
pub mod lines;
pub mod sampler;

pub use debounce::{Debouncer, Line};
pub use direction::Direction;
pub use lines::{DeviceId, DeviceLines, LineMap, LineMapError, LineRole, Polarity};
pub use sampler::{GpioSampler, RawSampler, SamplerError};
