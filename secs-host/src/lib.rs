//! SECS/GEM host
//!
//! The host plays the active HSMS role: it connects to the equipment,
//! selects the session and then issues requests such as S1F1 or S2F17.
//! Alarm and event reports sent by the equipment are acknowledged
//! automatically unless disabled on the builder.

pub mod builder;
pub mod client;

pub use builder::{DEFAULT_PORT, HostClientBuilder};
pub use client::HostClient;
