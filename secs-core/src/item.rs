//! SECS-II item model
//!
//! A SECS-II message body is a tree of self-describing items. Lists hold
//! child items; every other format holds an array of elements of one
//! type. A single value is simply a one-element array.

use crate::error::{SecsError, SecsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SECS-II format codes (SEMI E5)
///
/// The wire format byte carries the code in its upper six bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecsFormat {
    List = 0x00,
    Binary = 0x08,
    Boolean = 0x09,
    Ascii = 0x10,
    Jis8 = 0x11,
    I1 = 0x18,
    I2 = 0x19,
    I4 = 0x1A,
    I8 = 0x1B,
    F4 = 0x20,
    F8 = 0x21,
    U1 = 0x28,
    U2 = 0x29,
    U4 = 0x2A,
    U8 = 0x2B,
}

impl SecsFormat {
    /// Convert format code to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert a 6-bit format code to a format
    pub fn from_u8(code: u8) -> SecsResult<Self> {
        match code {
            0x00 => Ok(SecsFormat::List),
            0x08 => Ok(SecsFormat::Binary),
            0x09 => Ok(SecsFormat::Boolean),
            0x10 => Ok(SecsFormat::Ascii),
            0x11 => Ok(SecsFormat::Jis8),
            0x18 => Ok(SecsFormat::I1),
            0x19 => Ok(SecsFormat::I2),
            0x1A => Ok(SecsFormat::I4),
            0x1B => Ok(SecsFormat::I8),
            0x20 => Ok(SecsFormat::F4),
            0x21 => Ok(SecsFormat::F8),
            0x28 => Ok(SecsFormat::U1),
            0x29 => Ok(SecsFormat::U2),
            0x2A => Ok(SecsFormat::U4),
            0x2B => Ok(SecsFormat::U8),
            _ => Err(SecsError::Decode(format!(
                "Unknown SECS-II format code: 0o{:02o}",
                code
            ))),
        }
    }

    /// Width in bytes of one element of this format
    ///
    /// Lists have no element width because their length field counts
    /// child items rather than bytes.
    pub fn element_size(self) -> Option<usize> {
        match self {
            SecsFormat::List => None,
            SecsFormat::Binary
            | SecsFormat::Boolean
            | SecsFormat::Ascii
            | SecsFormat::Jis8
            | SecsFormat::I1
            | SecsFormat::U1 => Some(1),
            SecsFormat::I2 | SecsFormat::U2 => Some(2),
            SecsFormat::I4 | SecsFormat::U4 | SecsFormat::F4 => Some(4),
            SecsFormat::I8 | SecsFormat::U8 | SecsFormat::F8 => Some(8),
        }
    }

    /// SML mnemonic of the format
    pub fn sml_name(self) -> &'static str {
        match self {
            SecsFormat::List => "L",
            SecsFormat::Binary => "B",
            SecsFormat::Boolean => "BOOLEAN",
            SecsFormat::Ascii => "A",
            SecsFormat::Jis8 => "J",
            SecsFormat::I1 => "I1",
            SecsFormat::I2 => "I2",
            SecsFormat::I4 => "I4",
            SecsFormat::I8 => "I8",
            SecsFormat::F4 => "F4",
            SecsFormat::F8 => "F8",
            SecsFormat::U1 => "U1",
            SecsFormat::U2 => "U2",
            SecsFormat::U4 => "U4",
            SecsFormat::U8 => "U8",
        }
    }
}

/// A SECS-II data item
///
/// `Ascii` text is a sequence of single-byte characters; code points above
/// `0xFF` cannot be encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SecsItem {
    List(Vec<SecsItem>),
    Binary(Vec<u8>),
    Boolean(Vec<bool>),
    Ascii(String),
    Jis8(Vec<u8>),
    I1(Vec<i8>),
    I2(Vec<i16>),
    I4(Vec<i32>),
    I8(Vec<i64>),
    U1(Vec<u8>),
    U2(Vec<u16>),
    U4(Vec<u32>),
    U8(Vec<u64>),
    F4(Vec<f32>),
    F8(Vec<f64>),
}

impl SecsItem {
    /// Create a list item
    pub fn list(items: impl Into<Vec<SecsItem>>) -> Self {
        SecsItem::List(items.into())
    }

    /// Create an ASCII item
    pub fn ascii(text: impl Into<String>) -> Self {
        SecsItem::Ascii(text.into())
    }

    /// Create a binary item
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        SecsItem::Binary(bytes.into())
    }

    /// Create a single-element boolean item
    pub fn boolean(value: bool) -> Self {
        SecsItem::Boolean(vec![value])
    }

    pub fn u1(value: u8) -> Self {
        SecsItem::U1(vec![value])
    }

    pub fn u2(value: u16) -> Self {
        SecsItem::U2(vec![value])
    }

    pub fn u4(value: u32) -> Self {
        SecsItem::U4(vec![value])
    }

    pub fn u8(value: u64) -> Self {
        SecsItem::U8(vec![value])
    }

    pub fn i4(value: i32) -> Self {
        SecsItem::I4(vec![value])
    }

    pub fn i8(value: i64) -> Self {
        SecsItem::I8(vec![value])
    }

    pub fn f4(value: f32) -> Self {
        SecsItem::F4(vec![value])
    }

    pub fn f8(value: f64) -> Self {
        SecsItem::F8(vec![value])
    }

    /// Format code of this item
    pub fn format(&self) -> SecsFormat {
        match self {
            SecsItem::List(_) => SecsFormat::List,
            SecsItem::Binary(_) => SecsFormat::Binary,
            SecsItem::Boolean(_) => SecsFormat::Boolean,
            SecsItem::Ascii(_) => SecsFormat::Ascii,
            SecsItem::Jis8(_) => SecsFormat::Jis8,
            SecsItem::I1(_) => SecsFormat::I1,
            SecsItem::I2(_) => SecsFormat::I2,
            SecsItem::I4(_) => SecsFormat::I4,
            SecsItem::I8(_) => SecsFormat::I8,
            SecsItem::U1(_) => SecsFormat::U1,
            SecsItem::U2(_) => SecsFormat::U2,
            SecsItem::U4(_) => SecsFormat::U4,
            SecsItem::U8(_) => SecsFormat::U8,
            SecsItem::F4(_) => SecsFormat::F4,
            SecsItem::F8(_) => SecsFormat::F8,
        }
    }

    /// Number of elements (child items for a list, characters for ASCII)
    pub fn len(&self) -> usize {
        match self {
            SecsItem::List(v) => v.len(),
            SecsItem::Binary(v) | SecsItem::Jis8(v) | SecsItem::U1(v) => v.len(),
            SecsItem::Boolean(v) => v.len(),
            SecsItem::Ascii(s) => s.chars().count(),
            SecsItem::I1(v) => v.len(),
            SecsItem::I2(v) => v.len(),
            SecsItem::I4(v) => v.len(),
            SecsItem::I8(v) => v.len(),
            SecsItem::U2(v) => v.len(),
            SecsItem::U4(v) => v.len(),
            SecsItem::U8(v) => v.len(),
            SecsItem::F4(v) => v.len(),
            SecsItem::F8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_list(&self) -> Option<&[SecsItem]> {
        match self {
            SecsItem::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            SecsItem::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            SecsItem::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Child item of a list by index
    pub fn get(&self, index: usize) -> Option<&SecsItem> {
        self.as_list().and_then(|items| items.get(index))
    }

    /// First element of an unsigned or binary item, widened to u64
    pub fn first_unsigned(&self) -> Option<u64> {
        match self {
            SecsItem::Binary(v) | SecsItem::U1(v) => v.first().map(|x| u64::from(*x)),
            SecsItem::U2(v) => v.first().map(|x| u64::from(*x)),
            SecsItem::U4(v) => v.first().map(|x| u64::from(*x)),
            SecsItem::U8(v) => v.first().copied(),
            _ => None,
        }
    }

    /// First element of a signed item, widened to i64
    pub fn first_signed(&self) -> Option<i64> {
        match self {
            SecsItem::I1(v) => v.first().map(|x| i64::from(*x)),
            SecsItem::I2(v) => v.first().map(|x| i64::from(*x)),
            SecsItem::I4(v) => v.first().map(|x| i64::from(*x)),
            SecsItem::I8(v) => v.first().copied(),
            _ => None,
        }
    }

    /// First element of a boolean item
    pub fn first_bool(&self) -> Option<bool> {
        match self {
            SecsItem::Boolean(v) => v.first().copied(),
            _ => None,
        }
    }

    fn fmt_sml(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pretty = f.alternate();
        let name = self.format().sml_name();
        match self {
            SecsItem::List(items) => {
                write!(f, "<{}[{}]", name, items.len())?;
                for item in items {
                    if pretty {
                        write!(f, "\n{:width$}", "", width = (depth + 1) * 2)?;
                    } else {
                        f.write_str(" ")?;
                    }
                    item.fmt_sml(f, depth + 1)?;
                }
                if pretty && !items.is_empty() {
                    write!(f, "\n{:width$}", "", width = depth * 2)?;
                }
                f.write_str(">")
            }
            SecsItem::Ascii(s) => write!(f, "<{}[{}] {:?}>", name, s.chars().count(), s),
            SecsItem::Binary(v) | SecsItem::Jis8(v) => {
                write!(f, "<{}[{}]", name, v.len())?;
                for b in v {
                    write!(f, " 0x{:02X}", b)?;
                }
                f.write_str(">")
            }
            SecsItem::Boolean(v) => {
                write!(f, "<{}[{}]", name, v.len())?;
                for b in v {
                    f.write_str(if *b { " T" } else { " F" })?;
                }
                f.write_str(">")
            }
            SecsItem::I1(v) => write_elements(f, name, v),
            SecsItem::I2(v) => write_elements(f, name, v),
            SecsItem::I4(v) => write_elements(f, name, v),
            SecsItem::I8(v) => write_elements(f, name, v),
            SecsItem::U1(v) => write_elements(f, name, v),
            SecsItem::U2(v) => write_elements(f, name, v),
            SecsItem::U4(v) => write_elements(f, name, v),
            SecsItem::U8(v) => write_elements(f, name, v),
            SecsItem::F4(v) => write_elements(f, name, v),
            SecsItem::F8(v) => write_elements(f, name, v),
        }
    }
}

fn write_elements<T: fmt::Display>(f: &mut fmt::Formatter<'_>, name: &str, values: &[T]) -> fmt::Result {
    write!(f, "<{}[{}]", name, values.len())?;
    for v in values {
        write!(f, " {}", v)?;
    }
    f.write_str(">")
}

/// SML rendering; `{:#}` breaks lists over indented lines
impl fmt::Display for SecsItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_sml(f, 0)
    }
}

impl From<&str> for SecsItem {
    fn from(value: &str) -> Self {
        SecsItem::ascii(value)
    }
}

impl From<String> for SecsItem {
    fn from(value: String) -> Self {
        SecsItem::Ascii(value)
    }
}

impl From<Vec<SecsItem>> for SecsItem {
    fn from(value: Vec<SecsItem>) -> Self {
        SecsItem::List(value)
    }
}
