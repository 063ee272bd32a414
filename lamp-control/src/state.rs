//! Application level lamp state
//!
//! The lamps never report their state, so this is the last state confirmed
//! by a successful write.

use std::fmt;

use chrono::{DateTime, Utc};
use lamp_transport::LampCommand;
use serde::{Deserialize, Serialize};

/// RGB colour, one byte per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Self = Self::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RGB({},{},{})", self.r, self.g, self.b)
    }
}

/// Warm/cold white channel intensities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhiteBalance {
    pub warm: u8,
    pub cold: u8,
}

/// The colour-producing mode of a lamp.
///
/// Only one can be active, so setting one replaces the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Look {
    Rgb(Rgb),
    WhiteBalance(WhiteBalance),
    Effect { index: u8, speed: u8 },
}

impl Look {
    /// Link command that produces this look
    pub fn command(&self) -> LampCommand {
        match *self {
            Self::Rgb(Rgb { r, g, b }) => LampCommand::Rgb { r, g, b },
            Self::WhiteBalance(WhiteBalance { warm, cold }) => {
                LampCommand::WhiteBalance { warm, cold }
            }
            Self::Effect { index, speed } => LampCommand::Effect { index, speed },
        }
    }
}

/// Last confirmed state of one lamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub power: bool,
    pub brightness: u8,
    pub look: Option<Look>,
    pub last_updated: DateTime<Utc>,
}

impl Default for DeviceState {
    /// Off, full brightness, white
    fn default() -> Self {
        Self {
            power: false,
            brightness: 255,
            look: Some(Look::Rgb(Rgb::WHITE)),
            last_updated: Utc::now(),
        }
    }
}

impl DeviceState {
    pub fn rgb(&self) -> Option<Rgb> {
        match self.look {
            Some(Look::Rgb(rgb)) => Some(rgb),
            _ => None,
        }
    }

    pub fn white_balance(&self) -> Option<WhiteBalance> {
        match self.look {
            Some(Look::WhiteBalance(wb)) => Some(wb),
            _ => None,
        }
    }

    /// Active effect as `(index, speed)`
    pub fn effect(&self) -> Option<(u8, u8)> {
        match self.look {
            Some(Look::Effect { index, speed }) => Some((index, speed)),
            _ => None,
        }
    }

    pub fn set_power(&mut self, on: bool) {
        self.power = on;
        self.touch();
    }

    pub fn set_brightness(&mut self, level: u8) {
        self.brightness = level;
        self.touch();
    }

    pub fn set_look(&mut self, look: Look) {
        self.look = Some(look);
        self.touch();
    }

    /// Record a confirmed command
    pub fn apply(&mut self, command: LampCommand) {
        match command {
            LampCommand::Power(on) => self.set_power(on),
            LampCommand::Brightness(level) => self.set_brightness(level),
            LampCommand::Rgb { r, g, b } => self.set_look(Look::Rgb(Rgb { r, g, b })),
            LampCommand::WhiteBalance { warm, cold } => {
                self.set_look(Look::WhiteBalance(WhiteBalance { warm, cold }))
            }
            LampCommand::Effect { index, speed } => self.set_look(Look::Effect { index, speed }),
            // Preset colours have no RGB read-back, the look becomes unknown
            LampCommand::PresetColor(_) => {
                self.look = None;
                self.touch();
            }
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = DeviceState::default();
        assert!(!state.power);
        assert_eq!(state.brightness, 255);
        assert_eq!(state.rgb(), Some(Rgb::WHITE));
    }

    #[test]
    fn test_rgb_clears_effect_and_white() {
        let mut state = DeviceState::default();
        state.apply(LampCommand::Effect { index: 0x25, speed: 50 });
        assert_eq!(state.effect(), Some((0x25, 50)));
        assert_eq!(state.rgb(), None);

        state.apply(LampCommand::Rgb { r: 1, g: 2, b: 3 });
        assert_eq!(state.rgb(), Some(Rgb::new(1, 2, 3)));
        assert_eq!(state.effect(), None);
        assert_eq!(state.white_balance(), None);
    }

    #[test]
    fn test_white_clears_rgb() {
        let mut state = DeviceState::default();
        state.apply(LampCommand::WhiteBalance { warm: 10, cold: 20 });
        assert_eq!(state.white_balance(), Some(WhiteBalance { warm: 10, cold: 20 }));
        assert_eq!(state.rgb(), None);
    }

    #[test]
    fn test_power_and_brightness_keep_look() {
        let mut state = DeviceState::default();
        state.apply(LampCommand::Power(true));
        state.apply(LampCommand::Brightness(40));
        assert!(state.power);
        assert_eq!(state.brightness, 40);
        assert_eq!(state.rgb(), Some(Rgb::WHITE));
    }
}
