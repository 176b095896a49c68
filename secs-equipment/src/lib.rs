//! SECS/GEM equipment
//!
//! [`EquipmentServer`] plays the passive HSMS role over TCP. It answers the
//! standard GEM requests from a [`GemStateManager`](secs_gem::GemStateManager)
//! and reports collection events (S6F11) and alarms (S5F1) to the selected
//! host.

pub mod bridge;
pub mod config;
pub mod handler;
pub mod server;

pub use bridge::HostReporter;
pub use config::EquipmentConfig;
pub use handler::{HandlerOutcome, MessageHandler, StandardHandler};
pub use server::EquipmentServer;
