//! ANSI colour palette for console echo
//!
//! Thin wrapper around crossterm's colour commands so the rest of the crate
//! deals with a small closed set of display colours.

use crossterm::style::{Color as TermColor, ResetColor, SetForegroundColor};

/// Display colour used when echoing entries to a console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// No colour change (plain text)
    None,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    /// Used for the timestamp prefix
    DarkGreen,
}

impl Color {
    /// ANSI escape sequence selecting this colour (empty for `None`)
    pub fn escape(&self) -> String {
        let term = match self {
            Color::None => return String::new(),
            Color::Red => TermColor::Red,
            Color::Green => TermColor::Green,
            Color::Yellow => TermColor::Yellow,
            Color::Blue => TermColor::Blue,
            Color::Magenta => TermColor::Magenta,
            Color::DarkGreen => TermColor::DarkGreen,
        };
        SetForegroundColor(term).to_string()
    }
}

/// ANSI escape sequence restoring the default style
pub fn reset() -> String {
    ResetColor.to_string()
}
