//! GEM (SEMI E30) state model
//!
//! [`GemStateManager`] holds the control, communication and processing
//! states, the status variable table, the active alarm set and the
//! collection event catalogue. Every mutation runs under one lock and
//! raises [`GemNotification`]s after the lock is released.
//!
//! The [`messages`] module builds and parses the standard SECS-II messages
//! an equipment or host exchanges about this model.

pub mod alarm;
pub mod events;
mod jobs;
pub mod manager;
pub mod messages;
pub mod state;
pub mod variables;

pub use alarm::{Alarm, AlarmSeverity};
pub use events::{
    CallbackGemListener, ChannelGemListener, CollectionEvent, GemEventListener, GemNotification, ceid,
};
pub use jobs::SUBSTRATE_HISTORY_LIMIT;
pub use manager::GemStateManager;
pub use state::{CommunicationState, ControlState, ProcessingState};
pub use variables::{StatusValue, svid};
