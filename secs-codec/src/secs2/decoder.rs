//! SECS-II decoder

use crate::secs2::types::{FormatByte, MAX_NESTING_DEPTH};
use secs_core::{SecsError, SecsFormat, SecsItem, SecsResult};

/// SECS-II decoder reading items from a byte slice
pub struct SecsDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> SecsDecoder<'a> {
    /// Create a new decoder
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Decode one item, recursing into list children
    pub fn decode_item(&mut self) -> SecsResult<SecsItem> {
        self.decode_nested(0)
    }

    fn decode_nested(&mut self, depth: usize) -> SecsResult<SecsItem> {
        if depth > MAX_NESTING_DEPTH {
            return Err(SecsError::Decode(format!(
                "List nesting deeper than {}",
                MAX_NESTING_DEPTH
            )));
        }

        let (format, length) = self.decode_header()?;

        if format == SecsFormat::List {
            // every child needs at least a format byte and one length byte
            if length > self.remaining() / 2 {
                return Err(SecsError::Decode(format!(
                    "List of {} items overruns the {} remaining bytes",
                    length,
                    self.remaining()
                )));
            }
            let mut items = Vec::with_capacity(length);
            for _ in 0..length {
                items.push(self.decode_nested(depth + 1)?);
            }
            return Ok(SecsItem::List(items));
        }

        let payload = self.read_bytes(length)?;
        let width = format.element_size().unwrap_or(1);
        if payload.len() % width != 0 {
            return Err(SecsError::Decode(format!(
                "{} payload of {} bytes is not a multiple of {}",
                format.sml_name(),
                payload.len(),
                width
            )));
        }

        let item = match format {
            SecsFormat::List => unreachable!("lists are handled above"),
            SecsFormat::Binary => SecsItem::Binary(payload.to_vec()),
            SecsFormat::Jis8 => SecsItem::Jis8(payload.to_vec()),
            SecsFormat::U1 => SecsItem::U1(payload.to_vec()),
            SecsFormat::Boolean => SecsItem::Boolean(payload.iter().map(|b| *b != 0).collect()),
            SecsFormat::Ascii => SecsItem::Ascii(payload.iter().map(|b| char::from(*b)).collect()),
            SecsFormat::I1 => SecsItem::I1(payload.iter().map(|b| *b as i8).collect()),
            SecsFormat::I2 => SecsItem::I2(chunks(payload, i16::from_be_bytes)),
            SecsFormat::I4 => SecsItem::I4(chunks(payload, i32::from_be_bytes)),
            SecsFormat::I8 => SecsItem::I8(chunks(payload, i64::from_be_bytes)),
            SecsFormat::U2 => SecsItem::U2(chunks(payload, u16::from_be_bytes)),
            SecsFormat::U4 => SecsItem::U4(chunks(payload, u32::from_be_bytes)),
            SecsFormat::U8 => SecsItem::U8(chunks(payload, u64::from_be_bytes)),
            SecsFormat::F4 => SecsItem::F4(chunks(payload, f32::from_be_bytes)),
            SecsFormat::F8 => SecsItem::F8(chunks(payload, f64::from_be_bytes)),
        };
        Ok(item)
    }

    /// Decode a format byte and its length field
    ///
    /// # Returns
    /// The format and the length (item count for lists, byte count otherwise)
    pub fn decode_header(&mut self) -> SecsResult<(SecsFormat, usize)> {
        let format_byte = FormatByte::from_u8(self.read_byte()?)?;
        let length = self
            .read_bytes(format_byte.length_bytes.count())?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        Ok((format_byte.format, length))
    }

    fn read_byte(&mut self) -> SecsResult<u8> {
        let byte = *self
            .buffer
            .get(self.position)
            .ok_or_else(|| SecsError::Decode("Unexpected end of data".to_string()))?;
        self.position += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> SecsResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(SecsError::Decode(format!(
                "Need {} bytes, only {} remaining",
                len,
                self.remaining()
            )));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get remaining bytes
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

fn chunks<T, const N: usize>(payload: &[u8], convert: fn([u8; N]) -> T) -> Vec<T> {
    payload
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            convert(raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> SecsResult<SecsItem> {
        SecsDecoder::new(bytes).decode_item()
    }

    #[test]
    fn test_decode_nested_list() {
        let bytes = [0x01, 0x02, 0x41, 0x01, b'X', 0x01, 0x00];
        let item = decode(&bytes).unwrap();
        assert_eq!(item, SecsItem::list(vec![SecsItem::ascii("X"), SecsItem::list(vec![])]));
    }

    #[test]
    fn test_decode_numeric_arrays() {
        let bytes = [0xA9, 0x08, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(decode(&bytes).unwrap(), SecsItem::U4(vec![1, u32::MAX]));

        let bytes = [0x65, 0x04, 0xFF, 0xFE, 0x00, 0x02];
        assert_eq!(decode(&bytes).unwrap(), SecsItem::I2(vec![-2, 2]));

        let bytes = [0x81, 0x04, 0x3F, 0x80, 0x00, 0x00];
        assert_eq!(decode(&bytes).unwrap(), SecsItem::f4(1.0));
    }

    #[test]
    fn test_decode_zero_length_items() {
        assert_eq!(decode(&[0x41, 0x00]).unwrap(), SecsItem::ascii(""));
        assert_eq!(decode(&[0x21, 0x00]).unwrap(), SecsItem::binary(vec![]));
        assert_eq!(decode(&[0x85, 0x00]).unwrap(), SecsItem::F8(vec![]));
    }

    #[test]
    fn test_decode_two_byte_length() {
        let mut bytes = vec![0x22, 0x01, 0x00];
        bytes.extend(std::iter::repeat_n(0xAB, 256));
        let item = decode(&bytes).unwrap();
        assert_eq!(item.len(), 256);
    }

    #[test]
    fn test_decode_truncated_payload() {
        assert!(matches!(decode(&[0x41, 0x05, b'A']), Err(SecsError::Decode(_))));
        assert!(matches!(decode(&[0x22, 0x01]), Err(SecsError::Decode(_))));
        assert!(matches!(decode(&[]), Err(SecsError::Decode(_))));
    }

    #[test]
    fn test_decode_list_count_overrun() {
        // claims 200 children with only one present
        let bytes = [0x01, 0xC8, 0xA1, 0x01, 0x01];
        assert!(matches!(decode(&bytes), Err(SecsError::Decode(_))));

        // claims 2 children but input ends after the first
        let bytes = [0x01, 0x02, 0xA1, 0x01, 0x01, 0x41];
        assert!(matches!(decode(&bytes), Err(SecsError::Decode(_))));
    }

    #[test]
    fn test_decode_misaligned_numeric_payload() {
        let bytes = [0xA9, 0x03, 0x00, 0x00, 0x01];
        assert!(matches!(decode(&bytes), Err(SecsError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_format() {
        assert!(matches!(decode(&[0xFD, 0x00]), Err(SecsError::Decode(_))));
    }

    #[test]
    fn test_decode_excessive_nesting() {
        let mut bytes = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            bytes.extend_from_slice(&[0x01, 0x01]);
        }
        bytes.extend_from_slice(&[0x01, 0x00]);
        assert!(matches!(decode(&bytes), Err(SecsError::Decode(_))));
    }

    #[test]
    fn test_position_tracks_consumed_bytes() {
        let bytes = [0xA1, 0x01, 0x07, 0x41, 0x00];
        let mut decoder = SecsDecoder::new(&bytes);
        assert_eq!(decoder.decode_item().unwrap(), SecsItem::U1(vec![7]));
        assert_eq!(decoder.position(), 3);
        assert_eq!(decoder.decode_item().unwrap(), SecsItem::ascii(""));
        assert_eq!(decoder.remaining(), 0);
    }
}
