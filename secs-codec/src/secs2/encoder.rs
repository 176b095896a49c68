//! SECS-II encoder

use crate::secs2::types::{FormatByte, LengthBytes, MAX_NESTING_DEPTH};
use bytes::{BufMut, BytesMut};
use secs_core::{SecsError, SecsFormat, SecsItem, SecsResult};

/// SECS-II encoder writing items into a growable buffer
pub struct SecsEncoder {
    buffer: BytesMut,
}

impl SecsEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Create a new encoder with initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Encode an item, recursing into list children
    ///
    /// # Errors
    /// Returns `SecsError::Encode` for lists nested deeper than
    /// [`MAX_NESTING_DEPTH`], which the decoder would refuse
    pub fn encode_item(&mut self, item: &SecsItem) -> SecsResult<()> {
        self.encode_nested(item, 0)
    }

    fn encode_nested(&mut self, item: &SecsItem, depth: usize) -> SecsResult<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(SecsError::Encode(format!(
                "List nesting deeper than {}",
                MAX_NESTING_DEPTH
            )));
        }

        match item {
            SecsItem::List(items) => {
                self.encode_header(SecsFormat::List, items.len())?;
                for child in items {
                    self.encode_nested(child, depth + 1)?;
                }
            }
            SecsItem::Binary(v) | SecsItem::Jis8(v) | SecsItem::U1(v) => {
                self.encode_header(item.format(), v.len())?;
                self.buffer.put_slice(v);
            }
            SecsItem::Boolean(v) => {
                self.encode_header(SecsFormat::Boolean, v.len())?;
                for b in v {
                    self.buffer.put_u8(u8::from(*b));
                }
            }
            SecsItem::Ascii(s) => {
                let bytes = s
                    .chars()
                    .map(|c| {
                        u8::try_from(u32::from(c)).map_err(|_| {
                            SecsError::Encode(format!("Character {:?} is not a single-byte character", c))
                        })
                    })
                    .collect::<SecsResult<Vec<u8>>>()?;
                self.encode_header(SecsFormat::Ascii, bytes.len())?;
                self.buffer.put_slice(&bytes);
            }
            SecsItem::I1(v) => {
                self.encode_header(SecsFormat::I1, v.len())?;
                v.iter().for_each(|x| self.buffer.put_i8(*x));
            }
            SecsItem::I2(v) => {
                self.encode_header(SecsFormat::I2, v.len() * 2)?;
                v.iter().for_each(|x| self.buffer.put_i16(*x));
            }
            SecsItem::I4(v) => {
                self.encode_header(SecsFormat::I4, v.len() * 4)?;
                v.iter().for_each(|x| self.buffer.put_i32(*x));
            }
            SecsItem::I8(v) => {
                self.encode_header(SecsFormat::I8, v.len() * 8)?;
                v.iter().for_each(|x| self.buffer.put_i64(*x));
            }
            SecsItem::U2(v) => {
                self.encode_header(SecsFormat::U2, v.len() * 2)?;
                v.iter().for_each(|x| self.buffer.put_u16(*x));
            }
            SecsItem::U4(v) => {
                self.encode_header(SecsFormat::U4, v.len() * 4)?;
                v.iter().for_each(|x| self.buffer.put_u32(*x));
            }
            SecsItem::U8(v) => {
                self.encode_header(SecsFormat::U8, v.len() * 8)?;
                v.iter().for_each(|x| self.buffer.put_u64(*x));
            }
            SecsItem::F4(v) => {
                self.encode_header(SecsFormat::F4, v.len() * 4)?;
                v.iter().for_each(|x| self.buffer.put_f32(*x));
            }
            SecsItem::F8(v) => {
                self.encode_header(SecsFormat::F8, v.len() * 8)?;
                v.iter().for_each(|x| self.buffer.put_f64(*x));
            }
        }
        Ok(())
    }

    /// Encode a format byte and length field
    ///
    /// `length` is the child count for lists and the payload byte count
    /// for every other format.
    pub fn encode_header(&mut self, format: SecsFormat, length: usize) -> SecsResult<()> {
        let length_bytes = LengthBytes::for_length(length)?;
        self.buffer.put_u8(FormatByte::new(format, length_bytes).to_u8());
        self.buffer.put_slice(&length_bytes.encode(length));
        Ok(())
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the encoder and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for SecsEncoder {
    fn default() -> Self {
        Self::new()
    }
}
