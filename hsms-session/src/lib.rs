//! HSMS session layer
//!
//! This crate implements the HSMS (SEMI E37) single-session protocol on top
//! of a connected byte stream:
//! - **Framing**: 4-byte length prefix, 10-byte header, SECS-II payload
//! - **Control handshake**: Select, Deselect, Linktest, Reject, Separate
//! - **Supervision**: T3, T5, T6, T7 and T8 timers plus the linktest heartbeat
//! - **Correlation**: system bytes counter and reply matching
//!
//! # Architecture
//!
//! ```text
//! HsmsSession ──> outbound queue ──> writer task ──> stream
//!      ^                                               |
//!      └──── events / replies <──── reader task <──────┘
//! ```

pub mod config;
pub mod events;
pub mod frame;
pub mod header;
pub mod session;
pub mod state;
pub mod statistics;

pub use config::{ConnectionMode, HsmsConfig};
pub use events::{CallbackEventListener, ChannelEventListener, SessionEvent, SessionEventListener};
pub use frame::{HsmsFrame, build_frame, encode_payload, parse_header, read_frame};
pub use header::{HEADER_LEN, HsmsHeader, LENGTH_PREFIX_LEN, SType};
pub use session::{HsmsSession, WeakHsmsSession};
pub use state::ConnectionState;
pub use statistics::SessionStatistics;
