//! Transport layer module for HSMS
//!
//! HSMS runs over a single TCP stream per session. This crate opens that
//! stream, either actively (connect) or passively (accept), and hands it to
//! the session layer.

pub mod stream;
pub mod tcp;

pub use stream::{HsmsStream, TransportLayer};
pub use tcp::{TcpAcceptor, TcpSettings, TcpTransport};
