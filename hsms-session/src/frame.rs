//! HSMS frame building and reading
//!
//! A frame on the wire is the 4-byte big-endian message length followed by
//! the 10-byte header and the SECS-II payload. The length counts the header
//! and payload, so a header-only control message has length 10.

use crate::header::{HEADER_LEN, HsmsHeader, LENGTH_PREFIX_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use secs_core::{SecsError, SecsMessage, SecsResult, Timer};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Length prefix plus header
pub const FRAME_PREFIX_LEN: usize = LENGTH_PREFIX_LEN + HEADER_LEN;

/// A received HSMS frame
#[derive(Debug, Clone, PartialEq)]
pub struct HsmsFrame {
    pub header: HsmsHeader,
    pub payload: Bytes,
}

impl HsmsFrame {
    /// Decode the payload into a data message
    ///
    /// # Errors
    /// Returns `SecsError::Decode` if the payload is not a well-formed item
    pub fn to_message(&self) -> SecsResult<SecsMessage> {
        let body = secs_codec::decode_body(&self.payload)?;
        Ok(SecsMessage {
            stream: self.header.stream(),
            function: self.header.function(),
            w_bit: self.header.w_bit(),
            session_id: self.header.session_id,
            system_bytes: self.header.system_bytes,
            body,
        })
    }
}

/// Build a complete frame from a header and payload
pub fn build_frame(header: &HsmsHeader, payload: &[u8]) -> Bytes {
    let length = (HEADER_LEN + payload.len()) as u32;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + length as usize);
    buf.put_u32(length);
    buf.put_slice(&header.to_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode the body of a data message, checking the message length limit
pub fn encode_payload(message: &SecsMessage, max_length: u32) -> SecsResult<Vec<u8>> {
    let payload = secs_codec::encode_body(message.body.as_ref())?;
    let length = HEADER_LEN + payload.len();
    if length > max_length as usize {
        return Err(SecsError::Encode(format!(
            "{} of {} bytes exceeds the maximum message length {}",
            message.name(),
            length,
            max_length
        )));
    }
    Ok(payload)
}

/// Parse the length prefix and header from the first 14 bytes of a frame
///
/// # Returns
/// The message length (header plus payload) and the header
pub fn parse_header(bytes: &[u8]) -> SecsResult<(u32, HsmsHeader)> {
    if bytes.len() < FRAME_PREFIX_LEN {
        return Err(SecsError::Frame(format!(
            "Frame prefix needs {} bytes, got {}",
            FRAME_PREFIX_LEN,
            bytes.len()
        )));
    }
    let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if (length as usize) < HEADER_LEN {
        return Err(SecsError::Frame(format!(
            "Message length {} is shorter than the header",
            length
        )));
    }
    let header = HsmsHeader::from_bytes(&bytes[LENGTH_PREFIX_LEN..FRAME_PREFIX_LEN])?;
    Ok((length, header))
}

/// Read one frame from `reader`
///
/// Waits without limit for the first byte of the frame; after that every
/// read must make progress within `t8`. Returns `Ok(None)` if the peer
/// closed the stream cleanly on a frame boundary.
///
/// # Errors
/// - `SecsError::Frame` on a short read, a corrupt length or an unknown SType
/// - `SecsError::Timeout(Timer::T8)` if the peer stalls mid-frame
pub async fn read_frame<R>(reader: &mut R, t8: Duration, max_length: u32) -> SecsResult<Option<HsmsFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    let first = reader.read(&mut prefix[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    read_within(reader, &mut prefix[1..], t8).await?;

    let (length, header) = parse_header(&prefix)?;
    if length > max_length {
        return Err(SecsError::Frame(format!(
            "Message length {} exceeds the maximum {}",
            length, max_length
        )));
    }

    let mut payload = BytesMut::zeroed(length as usize - HEADER_LEN);
    read_within(reader, &mut payload, t8).await?;

    log::trace!(
        "Frame in: {} sys=0x{:08X} length={}",
        header.stype.name(),
        header.system_bytes,
        length
    );
    Ok(Some(HsmsFrame {
        header,
        payload: payload.freeze(),
    }))
}

/// Fill `buf` completely, allowing at most `t8` between reads
async fn read_within<R>(reader: &mut R, buf: &mut [u8], t8: Duration) -> SecsResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let read = tokio::time::timeout(t8, reader.read(&mut buf[filled..]))
            .await
            .map_err(|_| SecsError::Timeout(Timer::T8))??;
        if read == 0 {
            return Err(SecsError::Frame(format!(
                "Stream closed after {} of {} bytes",
                filled,
                buf.len()
            )));
        }
        filled += read;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SType;
    use secs_core::SecsItem;
    use tokio_test::io::Builder;

    const T8: Duration = Duration::from_secs(5);
    const MAX: u32 = 1 << 24;

    #[test]
    fn test_frame_length_covers_header_and_payload() {
        let header = HsmsHeader::control(SType::SelectReq, 1, 9);
        let frame = build_frame(&header, &[]);
        assert_eq!(frame.len(), 14);
        assert_eq!(&frame[..4], &[0, 0, 0, 10]);

        let payload = [0x41, 0x02, b'O', b'K'];
        let frame = build_frame(&header, &payload);
        let (length, parsed) = parse_header(&frame[..FRAME_PREFIX_LEN]).unwrap();
        assert_eq!(length as usize, HEADER_LEN + payload.len());
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_parse_header_rejects_short_length() {
        let mut frame = build_frame(&HsmsHeader::control(SType::LinktestReq, 0, 1), &[]).to_vec();
        frame[3] = 9;
        assert!(matches!(parse_header(&frame), Err(SecsError::Frame(_))));
    }

    #[test]
    fn test_payload_length_limit() {
        let message = SecsMessage::new(6, 11, true)
            .unwrap()
            .with_body(SecsItem::binary(vec![0u8; 100]));
        assert_eq!(encode_payload(&message, 200).unwrap().len(), 102);
        assert!(matches!(encode_payload(&message, 50), Err(SecsError::Encode(_))));
        assert!(encode_payload(&SecsMessage::new(1, 1, true).unwrap(), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_across_partial_reads() {
        let message = SecsMessage::new(1, 2, false)
            .unwrap()
            .with_system_bytes(0x55)
            .with_body(SecsItem::list(vec![SecsItem::ascii("EQ"), SecsItem::ascii("1.0")]));
        let frame = build_frame(&HsmsHeader::data(&message), &encode_payload(&message, MAX).unwrap());

        let mut reader = Builder::new()
            .read(&frame[..3])
            .read(&frame[3..12])
            .read(&frame[12..])
            .build();
        let received = read_frame(&mut reader, T8, MAX).await.unwrap().unwrap();
        assert_eq!(received.header.system_bytes, 0x55);
        assert_eq!(received.to_message().unwrap(), message);
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut reader = Builder::new().build();
        assert!(read_frame(&mut reader, T8, MAX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_short_read_is_frame_error() {
        let frame = build_frame(&HsmsHeader::control(SType::LinktestReq, 0, 1), &[]);
        let mut reader = Builder::new().read(&frame[..8]).build();
        let result = read_frame(&mut reader, T8, MAX).await;
        assert!(matches!(result, Err(SecsError::Frame(_))));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_message() {
        let frame = build_frame(&HsmsHeader::control(SType::Data, 0, 1), &[0u8; 64]);
        let mut reader = Builder::new().read(&frame).build();
        let result = read_frame(&mut reader, T8, 32).await;
        assert!(matches!(result, Err(SecsError::Frame(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_frame_t8_expiry() {
        let frame = build_frame(&HsmsHeader::control(SType::LinktestReq, 0, 1), &[]);
        let mut reader = Builder::new()
            .read(&frame[..5])
            .wait(Duration::from_secs(10))
            .read(&frame[5..])
            .build();
        let result = read_frame(&mut reader, T8, MAX).await;
        assert!(matches!(result, Err(SecsError::Timeout(Timer::T8))));
    }

    #[test]
    fn test_undecodable_payload_is_decode_error() {
        let frame = HsmsFrame {
            header: HsmsHeader::control(SType::Data, 0, 1),
            payload: Bytes::from_static(&[0x41, 0x05, b'A']),
        };
        assert!(matches!(frame.to_message(), Err(SecsError::Decode(_))));
    }
}
