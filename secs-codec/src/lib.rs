//! SECS-II encoding/decoding for the HSMS stack
//!
//! Every item on the wire is self-describing:
//!
//! ```text
//! [format byte: (code << 2) | n][n length bytes, big-endian][payload]
//! ```
//!
//! For lists the length counts child items, which follow immediately;
//! for every other format it counts payload bytes.

pub mod secs2;

pub use secs2::{SecsDecoder, SecsEncoder};
pub use secs2::types::{FormatByte, LengthBytes, MAX_ITEM_LENGTH, MAX_NESTING_DEPTH};

use secs_core::{SecsError, SecsItem, SecsResult};

/// Encode a single item
pub fn encode_item(item: &SecsItem) -> SecsResult<Vec<u8>> {
    let mut encoder = SecsEncoder::new();
    encoder.encode_item(item)?;
    Ok(encoder.into_bytes())
}

/// Decode one item from the front of `data`
///
/// # Returns
/// The item and the number of bytes it occupied
pub fn decode_item(data: &[u8]) -> SecsResult<(SecsItem, usize)> {
    let mut decoder = SecsDecoder::new(data);
    let item = decoder.decode_item()?;
    Ok((item, decoder.position()))
}

/// Encode a message body; an absent body encodes to nothing
pub fn encode_body(body: Option<&SecsItem>) -> SecsResult<Vec<u8>> {
    match body {
        Some(item) => encode_item(item),
        None => Ok(Vec::new()),
    }
}

/// Decode a message body
///
/// An empty payload is a header-only message and decodes to `None`.
/// A body holds exactly one root item, so trailing bytes are rejected.
pub fn decode_body(data: &[u8]) -> SecsResult<Option<SecsItem>> {
    if data.is_empty() {
        return Ok(None);
    }
    let (item, consumed) = decode_item(data)?;
    if consumed != data.len() {
        return Err(SecsError::Decode(format!(
            "{} trailing bytes after root item",
            data.len() - consumed
        )));
    }
    Ok(Some(item))
}
