//! SECS-II item encoder and decoder

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::SecsDecoder;
pub use encoder::SecsEncoder;
pub use types::{FormatByte, LengthBytes, MAX_NESTING_DEPTH};
