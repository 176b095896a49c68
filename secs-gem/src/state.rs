//! GEM state enumerations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlState {
    Offline,
    /// Online, operator in control
    Local,
    /// Online, host in control
    Online,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlState::Offline => "OFFLINE",
            ControlState::Local => "LOCAL",
            ControlState::Online => "ONLINE",
        };
        f.write_str(name)
    }
}

/// Communication state, following the control state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationState {
    Offline,
    Online,
}

/// Processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingState {
    Idle,
    Setup,
    Processing,
    ProcessComplete,
    Paused,
    Aborted,
}

impl ProcessingState {
    /// Value mirrored into the `EqState` status variable
    pub fn eq_state_name(self) -> &'static str {
        match self {
            ProcessingState::Idle => "IDLE",
            ProcessingState::Setup => "SETUP",
            ProcessingState::Processing => "PROCESSING",
            ProcessingState::ProcessComplete => "PROCESSCOMPLETE",
            ProcessingState::Paused => "PAUSED",
            ProcessingState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.eq_state_name())
    }
}
