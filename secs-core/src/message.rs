//! SECS-II message envelope

use crate::error::{SecsError, SecsResult};
use crate::item::SecsItem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest stream number representable in the 7-bit stream field
pub const MAX_STREAM: u8 = 0x7F;

/// A SECS-II data message
///
/// Messages are plain values: a sender builds one, the session assigns
/// its system bytes on transmission, and the receiver gets a fresh copy
/// rebuilt from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecsMessage {
    pub stream: u8,
    pub function: u8,
    /// Reply expected
    pub w_bit: bool,
    pub session_id: u16,
    pub system_bytes: u32,
    /// Message body, absent for header-only messages such as S1F1
    pub body: Option<SecsItem>,
}

impl SecsMessage {
    /// Create a message without body
    ///
    /// # Errors
    /// Returns `SecsError::InvalidData` if `stream` does not fit in 7 bits
    pub fn new(stream: u8, function: u8, w_bit: bool) -> SecsResult<Self> {
        if stream > MAX_STREAM {
            return Err(SecsError::InvalidData(format!(
                "Stream {} exceeds maximum {}",
                stream, MAX_STREAM
            )));
        }
        Ok(Self {
            stream,
            function,
            w_bit,
            session_id: 0,
            system_bytes: 0,
            body: None,
        })
    }

    /// Attach a body
    pub fn with_body(mut self, body: SecsItem) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_session_id(mut self, session_id: u16) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_system_bytes(mut self, system_bytes: u32) -> Self {
        self.system_bytes = system_bytes;
        self
    }

    /// Primary messages carry an odd function number
    pub fn is_primary(&self) -> bool {
        self.function % 2 == 1
    }

    /// Secondary (reply) messages carry an even, non-zero function number
    pub fn is_reply(&self) -> bool {
        self.function != 0 && self.function % 2 == 0
    }

    /// Function number of the reply to this primary, if it has one
    pub fn reply_function(&self) -> Option<u8> {
        if self.is_primary() {
            self.function.checked_add(1)
        } else {
            None
        }
    }

    /// `S1F1` style name
    pub fn name(&self) -> String {
        format!("S{}F{}", self.stream, self.function)
    }
}

impl fmt::Display for SecsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}F{}", self.stream, self.function)?;
        if self.w_bit {
            f.write_str(" W")?;
        }
        write!(f, " [sys=0x{:08X}]", self.system_bytes)?;
        if let Some(body) = &self.body {
            if f.alternate() {
                write!(f, "\n{:#}", body)?;
            } else {
                write!(f, " {}", body)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_range() {
        assert!(SecsMessage::new(127, 1, true).is_ok());
        assert!(SecsMessage::new(128, 1, true).is_err());
    }

    #[test]
    fn test_primary_and_reply() {
        let s1f1 = SecsMessage::new(1, 1, true).unwrap();
        assert!(s1f1.is_primary());
        assert_eq!(s1f1.reply_function(), Some(2));

        let s1f2 = SecsMessage::new(1, 2, false).unwrap();
        assert!(s1f2.is_reply());
        assert_eq!(s1f2.reply_function(), None);

        let s9f0 = SecsMessage::new(9, 0, false).unwrap();
        assert!(!s9f0.is_primary());
        assert!(!s9f0.is_reply());
    }

    #[test]
    fn test_display() {
        let msg = SecsMessage::new(1, 2, false)
            .unwrap()
            .with_system_bytes(0x10)
            .with_body(SecsItem::list(vec![SecsItem::ascii("EQ"), SecsItem::ascii("1.0")]));
        assert_eq!(msg.to_string(), "S1F2 [sys=0x00000010] <L[2] <A[2] \"EQ\"> <A[3] \"1.0\">>");
        assert_eq!(msg.name(), "S1F2");
    }
}
