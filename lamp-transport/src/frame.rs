//! Fixed-size command frames
//!
//! Pure encoders from semantic lamp commands to 9-byte frames, plus the
//! reverse mapping used when monitoring link traffic. Parameters are plain
//! `u8` so every encoder is total.

use std::fmt;

use crate::protocol::{
    cmd, color_mode, power, END_BYTE, FRAME_LEN, PAD, RESERVED, SEQ_BYTE, START_BYTE,
};

/// A complete command frame as written to the lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Assemble a frame from a command byte and the five parameter bytes
    pub const fn new(command: u8, params: [u8; 5]) -> Self {
        Self([
            START_BYTE, SEQ_BYTE, command, params[0], params[1], params[2], params[3], params[4],
            END_BYTE,
        ])
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Command byte (offset 2)
    pub fn command_byte(&self) -> u8 {
        self.0[2]
    }

    /// Decode the frame back into the command it encodes.
    ///
    /// Returns `None` for malformed framing or commands this crate never emits.
    pub fn decode(&self) -> Option<LampCommand> {
        let b = &self.0;
        if b[0] != START_BYTE || b[1] != SEQ_BYTE || b[8] != END_BYTE {
            return None;
        }
        let p = &b[3..8];
        match b[2] {
            cmd::POWER if p[..3] == power::ON => Some(LampCommand::Power(true)),
            cmd::POWER if p[..3] == power::OFF => Some(LampCommand::Power(false)),
            cmd::COLOR => match p[0] {
                color_mode::RGB => Some(LampCommand::Rgb {
                    r: p[1],
                    g: p[2],
                    b: p[3],
                }),
                color_mode::WHITE => Some(LampCommand::WhiteBalance {
                    warm: p[1],
                    cold: p[2],
                }),
                color_mode::SINGLE => Some(LampCommand::PresetColor(p[1])),
                _ => None,
            },
            cmd::BRIGHTNESS => Some(LampCommand::Brightness(p[0])),
            cmd::EFFECT => Some(LampCommand::Effect {
                index: p[0],
                speed: p[1],
            }),
            _ => None,
        }
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = usize;

    /// Fails with the offending length when `data` is not exactly one frame
    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        <[u8; FRAME_LEN]>::try_from(data)
            .map(Self)
            .map_err(|_| data.len())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Semantic lamp command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampCommand {
    Power(bool),
    Rgb { r: u8, g: u8, b: u8 },
    WhiteBalance { warm: u8, cold: u8 },
    PresetColor(u8),
    Brightness(u8),
    Effect { index: u8, speed: u8 },
}

impl LampCommand {
    /// Encode into a frame
    pub fn encode(&self) -> Frame {
        match *self {
            Self::Power(on) => encode_power(on),
            Self::Rgb { r, g, b } => encode_rgb(r, g, b),
            Self::WhiteBalance { warm, cold } => encode_white_balance(warm, cold),
            Self::PresetColor(index) => encode_single_color(index),
            Self::Brightness(level) => encode_brightness(level),
            Self::Effect { index, speed } => encode_effect(index, speed),
        }
    }
}

impl fmt::Display for LampCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power(on) => write!(f, "power {}", if *on { "on" } else { "off" }),
            Self::Rgb { r, g, b } => write!(f, "rgb #{r:02X}{g:02X}{b:02X}"),
            Self::WhiteBalance { warm, cold } => write!(f, "white warm={warm} cold={cold}"),
            Self::PresetColor(index) => write!(f, "preset colour {index}"),
            Self::Brightness(level) => write!(f, "brightness {level}"),
            Self::Effect { index, speed } => write!(f, "effect 0x{index:02X} speed={speed}"),
        }
    }
}

/// Power on/off
pub fn encode_power(on: bool) -> Frame {
    let [a, b, c] = if on { power::ON } else { power::OFF };
    Frame::new(cmd::POWER, [a, b, c, PAD, RESERVED])
}

/// Direct RGB colour
pub fn encode_rgb(r: u8, g: u8, b: u8) -> Frame {
    Frame::new(cmd::COLOR, [color_mode::RGB, r, g, b, RESERVED])
}

/// Warm/cold white balance
pub fn encode_white_balance(warm: u8, cold: u8) -> Frame {
    Frame::new(cmd::COLOR, [color_mode::WHITE, warm, cold, PAD, RESERVED])
}

/// One of the lamp's preset colours by index
pub fn encode_single_color(index: u8) -> Frame {
    Frame::new(cmd::COLOR, [color_mode::SINGLE, index, PAD, PAD, RESERVED])
}

/// Brightness level (0-255)
pub fn encode_brightness(level: u8) -> Frame {
    Frame::new(cmd::BRIGHTNESS, [level, PAD, PAD, PAD, RESERVED])
}

/// Built-in effect with speed
pub fn encode_effect(index: u8, speed: u8) -> Frame {
    Frame::new(cmd::EFFECT, [index, speed, PAD, PAD, RESERVED])
}
