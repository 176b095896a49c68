//! Collection events and state model notifications

use crate::alarm::Alarm;
use crate::state::{ControlState, ProcessingState};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Collection event ids of the standard catalogue
pub mod ceid {
    pub const EQUIPMENT_OFFLINE: u32 = 1;
    pub const CONTROL_STATE_LOCAL: u32 = 2;
    pub const CONTROL_STATE_REMOTE: u32 = 3;
    pub const PROCESS_STARTED: u32 = 10;
    pub const PROCESS_COMPLETED: u32 = 11;
    pub const PROCESS_ABORTED: u32 = 12;
    pub const SUBSTRATE_PROCESSED: u32 = 20;
    pub const SUBSTRATE_REMOVED: u32 = 21;
    pub const RECIPE_CHANGED: u32 = 22;
    pub const PROCESS_JOB_CREATED: u32 = 30;
    pub const PROCESS_JOB_QUEUED: u32 = 31;
    pub const PROCESS_JOB_SETUP: u32 = 32;
    pub const PROCESS_JOB_EXECUTING: u32 = 33;
    pub const PROCESS_JOB_COMPLETED: u32 = 34;
    pub const PROCESS_JOB_ABORTED: u32 = 35;
    pub const SUBSTRATE_LOCATION_CHANGED: u32 = 40;
    pub const SUBSTRATE_STATE_CHANGED: u32 = 41;
    pub const CONTROL_JOB_CREATED: u32 = 50;
    pub const CONTROL_JOB_STARTED: u32 = 51;
    pub const CONTROL_JOB_COMPLETED: u32 = 52;

    /// Offset of the event raised when alarm `id` is set
    pub const ALARM_SET_BASE: u32 = 100;
    /// Offset of the event raised when alarm `id` is cleared
    pub const ALARM_CLEARED_BASE: u32 = 200;
}

/// A registered collection event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEvent {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Local>>,
    pub trigger_count: u64,
}

impl CollectionEvent {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            last_triggered: None,
            trigger_count: 0,
        }
    }
}

/// The catalogue every manager starts with, all enabled
pub fn standard_catalogue() -> Vec<CollectionEvent> {
    [
        (ceid::EQUIPMENT_OFFLINE, "Equipment Offline"),
        (ceid::CONTROL_STATE_LOCAL, "Control State Local"),
        (ceid::CONTROL_STATE_REMOTE, "Control State Remote"),
        (ceid::PROCESS_STARTED, "Process Started"),
        (ceid::PROCESS_COMPLETED, "Process Completed"),
        (ceid::PROCESS_ABORTED, "Process Aborted"),
        (ceid::SUBSTRATE_PROCESSED, "Substrate Processed"),
        (ceid::SUBSTRATE_REMOVED, "Substrate Removed"),
        (ceid::RECIPE_CHANGED, "Recipe Changed"),
        (ceid::PROCESS_JOB_CREATED, "Process Job Created"),
        (ceid::PROCESS_JOB_QUEUED, "Process Job Queued"),
        (ceid::PROCESS_JOB_SETUP, "Process Job Setup"),
        (ceid::PROCESS_JOB_EXECUTING, "Process Job Executing"),
        (ceid::PROCESS_JOB_COMPLETED, "Process Job Completed"),
        (ceid::PROCESS_JOB_ABORTED, "Process Job Aborted"),
        (ceid::SUBSTRATE_LOCATION_CHANGED, "Substrate Location Changed"),
        (ceid::SUBSTRATE_STATE_CHANGED, "Substrate State Changed"),
        (ceid::CONTROL_JOB_CREATED, "Control Job Created"),
        (ceid::CONTROL_JOB_STARTED, "Control Job Started"),
        (ceid::CONTROL_JOB_COMPLETED, "Control Job Completed"),
    ]
    .into_iter()
    .map(|(id, name)| CollectionEvent::new(id, name))
    .collect()
}

/// Change notification raised by the state model
#[derive(Debug, Clone, PartialEq)]
pub enum GemNotification {
    ControlStateChanged {
        previous: ControlState,
        current: ControlState,
    },
    ProcessingStateChanged {
        previous: ProcessingState,
        current: ProcessingState,
    },
    /// An enabled collection event fired
    EventTriggered {
        event_id: u32,
        name: String,
        description: String,
        timestamp: DateTime<Local>,
    },
    AlarmSet(Alarm),
    AlarmCleared(Alarm),
}

/// Listener for state model notifications
///
/// Called after the state lock is released; a listener may call back into
/// the manager.
pub trait GemEventListener: Send + Sync {
    fn on_notification(&self, notification: GemNotification);

    /// A closed listener is removed from the manager
    fn is_closed(&self) -> bool {
        false
    }
}

/// Callback-based listener
pub struct CallbackGemListener<F>
where
    F: Fn(GemNotification) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackGemListener<F>
where
    F: Fn(GemNotification) + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> GemEventListener for CallbackGemListener<F>
where
    F: Fn(GemNotification) + Send + Sync,
{
    fn on_notification(&self, notification: GemNotification) {
        (self.callback)(notification);
    }
}

/// Channel-based listener
pub struct ChannelGemListener {
    tx: UnboundedSender<GemNotification>,
}

impl ChannelGemListener {
    pub fn new() -> (Self, UnboundedReceiver<GemNotification>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl GemEventListener for ChannelGemListener {
    fn on_notification(&self, notification: GemNotification) {
        let _ = self.tx.send(notification);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
