//! HSMS connection state machine

use secs_core::{SecsError, SecsResult};
use std::fmt;

/// HSMS connection state
///
/// # State Transitions
/// ```text
/// Disconnected -> Connecting    (connect())
/// Connecting   -> NotSelected   (TCP established)
/// NotSelected  -> Selected      (Select.rsp received, or Select.req answered)
/// Selected     -> NotSelected   (Deselect.req received)
/// any          -> Disconnected  (disconnect(), Separate.req, T7, I/O failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No TCP connection (initial and terminal state)
    Disconnected,
    /// TCP connection being opened
    Connecting,
    /// TCP connected, no HSMS session selected yet
    ///
    /// In this state:
    /// - Control messages can be exchanged
    /// - Data messages cannot be sent
    /// - T7 is running
    NotSelected,
    /// HSMS session selected, data messages flow in both directions
    Selected,
}

impl ConnectionState {
    /// Whether a TCP connection exists
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::NotSelected | ConnectionState::Selected)
    }

    pub fn is_selected(&self) -> bool {
        matches!(self, ConnectionState::Selected)
    }

    /// Validate that data messages may be sent
    ///
    /// # Errors
    /// Returns `SecsError::InvalidState` unless selected
    pub fn ensure_selected(&self) -> SecsResult<()> {
        if self.is_selected() {
            Ok(())
        } else {
            Err(SecsError::InvalidState(format!(
                "Cannot send data messages while {}",
                self
            )))
        }
    }

    /// Validate that control messages may be sent
    pub fn ensure_connected(&self) -> SecsResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SecsError::InvalidState(format!(
                "Cannot send control messages while {}",
                self
            )))
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::NotSelected => "NOT-SELECTED",
            ConnectionState::Selected => "SELECTED",
        };
        f.write_str(name)
    }
}
