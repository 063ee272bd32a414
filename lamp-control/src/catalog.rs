//! Viewer command names
//!
//! Viewers pick from a fixed list of colours and built-in effects by name,
//! e.g. `!lamp red` or `!lamp rainbow`.

use std::fmt;

use crate::state::Rgb;

/// Chat prefix that marks a lamp command
pub const COMMAND_PREFIX: &str = "!lamp ";

const COLORS: &[(&str, Rgb)] = &[
    ("red", Rgb::new(255, 0, 0)),
    ("green", Rgb::new(0, 255, 0)),
    ("blue", Rgb::new(0, 0, 255)),
    ("yellow", Rgb::new(255, 255, 0)),
    ("cyan", Rgb::new(0, 255, 255)),
    ("magenta", Rgb::new(255, 0, 255)),
    ("purple", Rgb::new(128, 0, 128)),
    ("orange", Rgb::new(255, 165, 0)),
    ("pink", Rgb::new(255, 192, 203)),
    ("white", Rgb::new(255, 255, 255)),
];

const EFFECTS: &[(&str, u8)] = &[
    ("rainbow", 0x25),
    ("strobe", 0x26),
    ("fade", 0x27),
    ("pulse", 0x28),
];

/// A resolved viewer command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    Color(Rgb),
    Effect(u8),
}

impl ViewerCommand {
    /// Look a command name up, ignoring case
    pub fn resolve(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Some((_, rgb)) = COLORS.iter().find(|(n, _)| *n == name) {
            return Some(Self::Color(*rgb));
        }
        EFFECTS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, index)| Self::Effect(*index))
    }
}

impl fmt::Display for ViewerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Color(rgb) => write!(f, "color {rgb}"),
            Self::Effect(index) => write!(f, "effect 0x{index:02X}"),
        }
    }
}

pub fn colors() -> impl Iterator<Item = &'static str> {
    COLORS.iter().map(|(name, _)| *name)
}

pub fn effects() -> impl Iterator<Item = &'static str> {
    EFFECTS.iter().map(|(name, _)| *name)
}

/// Extract the command name from a chat line such as `!lamp Red`.
///
/// Returns the lower-cased name, or None when the line is not a lamp
/// command or has nothing after the prefix.
pub fn parse_chat_command(message: &str) -> Option<String> {
    let message = message.trim().to_lowercase();
    let command = message.strip_prefix(COMMAND_PREFIX)?.trim();
    if command.is_empty() {
        None
    } else {
        Some(command.to_string())
    }
}
