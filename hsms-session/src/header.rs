//! HSMS message header

use secs_core::{SecsError, SecsMessage, SecsResult};

/// Size of the HSMS message header
pub const HEADER_LEN: usize = 10;

/// Size of the big-endian length field preceding the header
pub const LENGTH_PREFIX_LEN: usize = 4;

/// HSMS session type (header byte 5)
///
/// Control messages are written with PType equal to SType. On receipt a
/// control message is accepted with either that PType or PType 0, so peers
/// writing the SEMI E37 zero PType interoperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SType {
    Data = 0,
    SelectReq = 1,
    SelectRsp = 2,
    DeselectReq = 3,
    DeselectRsp = 4,
    LinktestReq = 5,
    LinktestRsp = 6,
    RejectReq = 7,
    SeparateReq = 9,
}

impl SType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// # Errors
    /// Returns `SecsError::Frame` for an SType outside the HSMS table
    pub fn from_u8(value: u8) -> SecsResult<Self> {
        match value {
            0 => Ok(SType::Data),
            1 => Ok(SType::SelectReq),
            2 => Ok(SType::SelectRsp),
            3 => Ok(SType::DeselectReq),
            4 => Ok(SType::DeselectRsp),
            5 => Ok(SType::LinktestReq),
            6 => Ok(SType::LinktestRsp),
            7 => Ok(SType::RejectReq),
            9 => Ok(SType::SeparateReq),
            _ => Err(SecsError::Frame(format!("Unknown SType: {}", value))),
        }
    }

    pub fn is_control(self) -> bool {
        self != SType::Data
    }

    /// Response type for a control request that expects one
    pub fn response(self) -> Option<SType> {
        match self {
            SType::SelectReq => Some(SType::SelectRsp),
            SType::DeselectReq => Some(SType::DeselectRsp),
            SType::LinktestReq => Some(SType::LinktestRsp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SType::Data => "Data",
            SType::SelectReq => "Select.req",
            SType::SelectRsp => "Select.rsp",
            SType::DeselectReq => "Deselect.req",
            SType::DeselectRsp => "Deselect.rsp",
            SType::LinktestReq => "Linktest.req",
            SType::LinktestRsp => "Linktest.rsp",
            SType::RejectReq => "Reject.req",
            SType::SeparateReq => "Separate.req",
        }
    }
}

/// HSMS 10-byte header
///
/// ```text
/// +-----------+--------+--------+-------+-------+-------------+
/// | SessionId | Byte 2 | Byte 3 | PType | SType | SystemBytes |
/// |  2 bytes  |        |        |       |       |   4 bytes   |
/// +-----------+--------+--------+-------+-------+-------------+
/// ```
///
/// For data messages byte 2 holds the W-bit and stream, byte 3 the
/// function. For control messages they are zero except for status codes
/// in responses and the reason code in Reject.req.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsmsHeader {
    pub session_id: u16,
    pub header_byte2: u8,
    pub header_byte3: u8,
    pub ptype: u8,
    pub stype: SType,
    pub system_bytes: u32,
}

impl HsmsHeader {
    /// Header of a control message
    pub fn control(stype: SType, session_id: u16, system_bytes: u32) -> Self {
        Self {
            session_id,
            header_byte2: 0,
            header_byte3: 0,
            ptype: stype.to_u8(),
            stype,
            system_bytes,
        }
    }

    /// Set the status byte of a Select.rsp/Deselect.rsp
    pub fn with_status(mut self, status: u8) -> Self {
        self.header_byte3 = status;
        self
    }

    /// Reject.req answering `rejected`, carrying `reason` in byte 3
    ///
    /// Byte 2 holds the SType of the rejected message (or its PType when
    /// the PType was the problem).
    pub fn reject(rejected: &HsmsHeader, reason: u8) -> Self {
        Self {
            session_id: rejected.session_id,
            header_byte2: if reason == REJECT_PTYPE_NOT_SUPPORTED {
                rejected.ptype
            } else {
                rejected.stype.to_u8()
            },
            header_byte3: reason,
            ptype: SType::RejectReq.to_u8(),
            stype: SType::RejectReq,
            system_bytes: rejected.system_bytes,
        }
    }

    /// Header of a SECS-II data message
    pub fn data(message: &SecsMessage) -> Self {
        let w_bit = if message.w_bit { 0x80 } else { 0x00 };
        Self {
            session_id: message.session_id,
            header_byte2: w_bit | (message.stream & 0x7F),
            header_byte3: message.function,
            ptype: 0,
            stype: SType::Data,
            system_bytes: message.system_bytes,
        }
    }

    pub fn stream(&self) -> u8 {
        self.header_byte2 & 0x7F
    }

    pub fn function(&self) -> u8 {
        self.header_byte3
    }

    pub fn w_bit(&self) -> bool {
        self.header_byte2 & 0x80 != 0
    }

    /// Whether the PType is acceptable for this message's SType
    pub fn has_valid_ptype(&self) -> bool {
        match self.stype {
            SType::Data => self.ptype == 0,
            stype => self.ptype == 0 || self.ptype == stype.to_u8(),
        }
    }

    /// Status byte of a control response
    pub fn status(&self) -> u8 {
        self.header_byte3
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..2].copy_from_slice(&self.session_id.to_be_bytes());
        bytes[2] = self.header_byte2;
        bytes[3] = self.header_byte3;
        bytes[4] = self.ptype;
        bytes[5] = self.stype.to_u8();
        bytes[6..10].copy_from_slice(&self.system_bytes.to_be_bytes());
        bytes
    }

    /// # Errors
    /// Returns `SecsError::Frame` if fewer than 10 bytes are given or the
    /// SType is unknown
    pub fn from_bytes(bytes: &[u8]) -> SecsResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SecsError::Frame(format!(
                "HSMS header needs {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            session_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            header_byte2: bytes[2],
            header_byte3: bytes[3],
            ptype: bytes[4],
            stype: SType::from_u8(bytes[5])?,
            system_bytes: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        })
    }
}

/// Select.rsp status: communication established
pub const SELECT_STATUS_OK: u8 = 0;
/// Select.rsp status: already selected
pub const SELECT_STATUS_ACTIVE: u8 = 1;

/// Reject.req reason: SType not supported
pub const REJECT_STYPE_NOT_SUPPORTED: u8 = 1;
/// Reject.req reason: PType not supported
pub const REJECT_PTYPE_NOT_SUPPORTED: u8 = 2;
/// Reject.req reason: transaction not open
pub const REJECT_TRANSACTION_NOT_OPEN: u8 = 3;
/// Reject.req reason: entity not selected
pub const REJECT_NOT_SELECTED: u8 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_header_layout() {
        let message = SecsMessage::new(1, 1, true)
            .unwrap()
            .with_session_id(0x0102)
            .with_system_bytes(0x0A0B0C0D);
        let bytes = HsmsHeader::data(&message).to_bytes();
        assert_eq!(bytes, [0x01, 0x02, 0x81, 0x01, 0x00, 0x00, 0x0A, 0x0B, 0x0C, 0x0D]);

        let header = HsmsHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.stream(), 1);
        assert_eq!(header.function(), 1);
        assert!(header.w_bit());
        assert_eq!(header.stype, SType::Data);
    }

    #[test]
    fn test_control_header_layout() {
        let header = HsmsHeader::control(SType::LinktestReq, 0xFFFF, 7);
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0, 0, 5, 5, 0, 0, 0, 7]);
        assert!(header.has_valid_ptype());
        assert_eq!(SType::LinktestReq.response(), Some(SType::LinktestRsp));
        assert_eq!(SType::SeparateReq.response(), None);
    }

    #[test]
    fn test_reject_header() {
        let bad = HsmsHeader {
            ptype: 3,
            ..HsmsHeader::control(SType::Data, 1, 42)
        };
        assert!(!bad.has_valid_ptype());
        let reject = HsmsHeader::reject(&bad, REJECT_PTYPE_NOT_SUPPORTED);
        assert_eq!(reject.stype, SType::RejectReq);
        assert_eq!(reject.header_byte2, 3);
        assert_eq!(reject.status(), REJECT_PTYPE_NOT_SUPPORTED);
        assert_eq!(reject.system_bytes, 42);
    }

    #[test]
    fn test_unknown_stype() {
        let bytes = [0, 0, 0, 0, 0, 8, 0, 0, 0, 1];
        assert!(matches!(HsmsHeader::from_bytes(&bytes), Err(SecsError::Frame(_))));
        assert!(HsmsHeader::from_bytes(&bytes[..9]).is_err());
    }
}
