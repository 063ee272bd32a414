//! Protocol constants for ELK-BLEDOM style lamp controllers
//!
//! Every command is a fixed 9-byte frame:
//!
//! ```text
//! [0x7E, 0x00, CMD, p0, p1, p2, p3, p4, 0xEF]
//! ```
//!
//! Unused parameter bytes are padded with `0xFF`; `p4` is reserved and always `0x00`.

/// Total frame length in bytes
pub const FRAME_LEN: usize = 9;

/// Start-of-frame marker
pub const START_BYTE: u8 = 0x7E;

/// Sequence byte (always zero, the lamps ignore it)
pub const SEQ_BYTE: u8 = 0x00;

/// End-of-frame marker
pub const END_BYTE: u8 = 0xEF;

/// Filler for unused parameter bytes
pub const PAD: u8 = 0xFF;

/// Value of the reserved last parameter byte
pub const RESERVED: u8 = 0x00;

/// Command bytes (frame offset 2)
pub mod cmd {
    pub const BRIGHTNESS: u8 = 0x01;
    pub const EFFECT: u8 = 0x03;
    pub const POWER: u8 = 0x04;
    pub const COLOR: u8 = 0x05;
    /// Custom program upload, not driven by this crate
    pub const CUSTOM: u8 = 0x06;
}

/// Colour sub-modes (first parameter byte of a `COLOR` frame)
pub mod color_mode {
    /// Single preset colour by index
    pub const SINGLE: u8 = 0x01;
    /// Warm/cold white balance
    pub const WHITE: u8 = 0x02;
    /// Direct RGB
    pub const RGB: u8 = 0x03;
}

/// Power parameter triplets
pub mod power {
    pub const ON: [u8; 3] = [0xF0, 0x00, 0x01];
    pub const OFF: [u8; 3] = [0x00, 0x00, 0x00];
}

/// GATT identifiers used by the lamps
pub mod gatt {
    pub const WRITE_CHARACTERISTIC_UUID: &str = "0000fff3-0000-1000-8000-00805f9b34fb";

    /// 16-bit short forms, expanded with the Bluetooth base UUID
    pub const WRITE_SHORT: u16 = 0xFFF3;
    pub const NOTIFY_SHORT: u16 = 0xFFF4;
}

/// Link timing defaults
pub mod timing {
    /// Connect (including service discovery) timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
    /// Single write timeout
    pub const WRITE_TIMEOUT_MS: u64 = 5_000;
    /// Write attempts before giving up, each one reconnecting on failure
    pub const WRITE_ATTEMPTS: u32 = 3;
    /// Pause between failed attempts
    pub const RETRY_BACKOFF_MS: u64 = 500;
    /// Default discovery window
    pub const SCAN_TIMEOUT_MS: u64 = 10_000;
}

/// Substrings of advertised names that identify a lamp controller
pub const NAME_HINTS: &[&str] = &["ELK", "BLEDOM", "LED", "STRIP"];

/// Check whether an advertised name looks like a supported lamp
pub fn is_lamp_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let upper = name.to_ascii_uppercase();
    NAME_HINTS.iter().any(|hint| upper.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lamp_names() {
        assert!(is_lamp_name("ELK-BLEDOM"));
        assert!(is_lamp_name("ledble-1234"));
        assert!(is_lamp_name("StripX"));
        assert!(!is_lamp_name("Keyboard"));
        assert!(!is_lamp_name(""));
    }
}
