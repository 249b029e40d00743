//! Overlay modes
//!
//! A presentation remote drives the overlay in one of a small, closed set of
//! modes. Devices advertise the subset they can sensibly drive; the active
//! device's subset is what `switch_mode` cycles through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overlay mode, in cycling order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Overlay hidden, the remote behaves like a plain pointer/keyboard
    Mouse,
    Spotlight,
    Laser,
    Pen,
    MagnifyGlass,
}

impl Mode {
    /// Every mode in cycling order
    pub const ALL: [Mode; 5] = [
        Mode::Mouse,
        Mode::Spotlight,
        Mode::Laser,
        Mode::Pen,
        Mode::MagnifyGlass,
    ];

    /// Position of this mode in [`Mode::ALL`]
    pub fn index(self) -> usize {
        match self {
            Mode::Mouse => 0,
            Mode::Spotlight => 1,
            Mode::Laser => 2,
            Mode::Pen => 3,
            Mode::MagnifyGlass => 4,
        }
    }

    /// Stable lowercase name used on D-Bus and in config files
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Mouse => "mouse",
            Mode::Spotlight => "spotlight",
            Mode::Laser => "laser",
            Mode::Pen => "pen",
            Mode::MagnifyGlass => "magnify_glass",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mode name is not recognized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode: {}", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mouse" => Ok(Mode::Mouse),
            "spotlight" => Ok(Mode::Spotlight),
            "laser" => Ok(Mode::Laser),
            "pen" => Ok(Mode::Pen),
            "magnify_glass" | "magnifyglass" | "magnifier" => Ok(Mode::MagnifyGlass),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
