//! SECS-II item header types

use secs_core::{SecsError, SecsFormat, SecsResult};

/// Largest length a three-byte length field can carry
pub const MAX_ITEM_LENGTH: usize = 0xFF_FFFF;

/// Deepest list nesting the encoder writes and the decoder accepts
pub const MAX_NESTING_DEPTH: usize = 64;

/// Size of the length field following the format byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthBytes {
    One = 1,
    Two = 2,
    Three = 3,
}

impl LengthBytes {
    /// Smallest length field able to hold `length`
    ///
    /// # Errors
    /// Returns `SecsError::Encode` if `length` exceeds `MAX_ITEM_LENGTH`
    pub fn for_length(length: usize) -> SecsResult<Self> {
        match length {
            0..=0xFF => Ok(LengthBytes::One),
            0x100..=0xFFFF => Ok(LengthBytes::Two),
            0x1_0000..=MAX_ITEM_LENGTH => Ok(LengthBytes::Three),
            _ => Err(SecsError::Encode(format!(
                "Item length {} exceeds maximum {}",
                length, MAX_ITEM_LENGTH
            ))),
        }
    }

    /// Decode the 2-bit selector of a format byte
    pub fn from_selector(selector: u8) -> SecsResult<Self> {
        match selector {
            1 => Ok(LengthBytes::One),
            2 => Ok(LengthBytes::Two),
            3 => Ok(LengthBytes::Three),
            _ => Err(SecsError::Decode(format!(
                "Invalid length-byte selector: {}",
                selector
            ))),
        }
    }

    pub fn count(self) -> usize {
        self as usize
    }

    /// Big-endian length field of `length`
    pub fn encode(self, length: usize) -> Vec<u8> {
        let bytes = (length as u32).to_be_bytes();
        bytes[4 - self.count()..].to_vec()
    }
}

/// First byte of every encoded item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatByte {
    pub format: SecsFormat,
    pub length_bytes: LengthBytes,
}

impl FormatByte {
    pub fn new(format: SecsFormat, length_bytes: LengthBytes) -> Self {
        Self { format, length_bytes }
    }

    pub fn to_u8(self) -> u8 {
        (self.format.to_u8() << 2) | self.length_bytes as u8
    }

    pub fn from_u8(byte: u8) -> SecsResult<Self> {
        let format = SecsFormat::from_u8(byte >> 2)?;
        let length_bytes = LengthBytes::from_selector(byte & 0x03)?;
        Ok(Self { format, length_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_bytes_boundaries() {
        assert_eq!(LengthBytes::for_length(0).unwrap(), LengthBytes::One);
        assert_eq!(LengthBytes::for_length(255).unwrap(), LengthBytes::One);
        assert_eq!(LengthBytes::for_length(256).unwrap(), LengthBytes::Two);
        assert_eq!(LengthBytes::for_length(65535).unwrap(), LengthBytes::Two);
        assert_eq!(LengthBytes::for_length(65536).unwrap(), LengthBytes::Three);
        assert!(LengthBytes::for_length(MAX_ITEM_LENGTH + 1).is_err());
    }

    #[test]
    fn test_length_field_encoding() {
        assert_eq!(LengthBytes::Two.encode(0x0102), vec![0x01, 0x02]);
        assert_eq!(LengthBytes::Three.encode(0x010203), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_format_byte() {
        let fb = FormatByte::new(SecsFormat::Ascii, LengthBytes::One);
        assert_eq!(fb.to_u8(), 0x41);
        assert_eq!(FormatByte::from_u8(0x41).unwrap(), fb);
        assert_eq!(FormatByte::new(SecsFormat::List, LengthBytes::One).to_u8(), 0x01);
        assert_eq!(FormatByte::new(SecsFormat::U4, LengthBytes::Two).to_u8(), 0xAA);
        // selector 0 is not a valid length size
        assert!(FormatByte::from_u8(0x40).is_err());
    }
}
