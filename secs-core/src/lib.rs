//! Core types for the SECS-II / HSMS protocol stack
//!
//! This crate provides the types shared by every layer of the stack:
//! the SECS-II item model, the stream/function message envelope and the
//! error taxonomy.

pub mod error;
pub mod item;
pub mod message;

pub use error::{SecsError, SecsResult, Timer};
pub use item::{SecsFormat, SecsItem};
pub use message::SecsMessage;
