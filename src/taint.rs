//! Severity tag attached to every entry

use std::fmt;

use crate::color::Color;

/// Severity/category tag of an entry
///
/// Stored on disk as a single byte. Values outside the known range are kept
/// as `Unknown` so that decoding never loses information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Taint {
    #[default]
    Normal,
    Info,
    Warning,
    Error,
    Fatal,
    Ok,
    Unknown(u8),
}

impl Taint {
    /// Wire representation of this taint
    pub fn as_byte(&self) -> u8 {
        match self {
            Taint::Normal => 0,
            Taint::Info => 1,
            Taint::Warning => 2,
            Taint::Error => 3,
            Taint::Fatal => 4,
            Taint::Ok => 5,
            Taint::Unknown(b) => *b,
        }
    }

    /// Parse the wire representation
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Taint::Normal,
            1 => Taint::Info,
            2 => Taint::Warning,
            3 => Taint::Error,
            4 => Taint::Fatal,
            5 => Taint::Ok,
            other => Taint::Unknown(other),
        }
    }

    /// Display colour for console echo
    pub fn color(&self) -> Color {
        match self {
            Taint::Info => Color::Blue,
            Taint::Warning => Color::Yellow,
            Taint::Error => Color::Red,
            Taint::Fatal => Color::Magenta,
            Taint::Ok => Color::Green,
            Taint::Normal | Taint::Unknown(_) => Color::None,
        }
    }

    /// Short uppercase name, used in emergency records
    pub fn as_str(&self) -> &'static str {
        match self {
            Taint::Normal => "NORMAL",
            Taint::Info => "INFO",
            Taint::Warning => "WARNING",
            Taint::Error => "ERROR",
            Taint::Fatal => "FATAL",
            Taint::Ok => "OK",
            Taint::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<u8> for Taint {
    fn from(b: u8) -> Self {
        Taint::from_byte(b)
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Taint::Unknown(b) => write!(f, "UNKNOWN({})", b),
            other => f.write_str(other.as_str()),
        }
    }
}
