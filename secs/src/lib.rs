//! SECS-II / HSMS / GEM protocol stack
//!
//! This library lets a program act as a factory host or as equipment over
//! HSMS (SEMI E37), exchanging SECS-II (SEMI E5) messages and tracking the
//! GEM (SEMI E30) state model.
//!
//! # Architecture
//!
//! The workspace is split by protocol layer:
//!
//! - `secs-core`: item model, message envelope and error types
//! - `secs-codec`: SECS-II binary encoding and decoding
//! - `hsms-transport`: TCP connector and acceptor
//! - `hsms-session`: HSMS framing, control handshake, timers and correlation
//! - `secs-gem`: GEM state model and standard message builders
//! - `secs-host`: host client (active role)
//! - `secs-equipment`: equipment server (passive role)
//!
//! # Usage
//!
//! ```no_run
//! use secs::host::HostClientBuilder;
//!
//! # async fn demo() -> secs::SecsResult<()> {
//! let host = HostClientBuilder::new().tcp("127.0.0.1:5000").build()?;
//! host.connect().await?;
//! let identity = host.are_you_there().await?;
//! println!("{} {}", identity.model_name, identity.software_revision);
//! host.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! See the `examples/` directory of this crate for a runnable host and
//! equipment.

pub use secs_codec::{decode_body, decode_item, encode_body, encode_item};
pub use secs_core::{SecsError, SecsFormat, SecsItem, SecsMessage, SecsResult, Timer};

/// HSMS session layer
pub mod hsms {
    pub use hsms_session::*;
    pub use hsms_transport::{TcpAcceptor, TcpSettings, TcpTransport, TransportLayer};
}

/// GEM state model and messages
pub mod gem {
    pub use secs_gem::*;
}

/// Host role
pub mod host {
    pub use secs_host::*;
}

/// Equipment role
pub mod equipment {
    pub use secs_equipment::*;
}
