//! GEM state manager

use crate::alarm::{Alarm, AlarmSeverity};
use crate::events::{
    ChannelGemListener, CollectionEvent, GemEventListener, GemNotification, ceid, standard_catalogue,
};
use crate::state::{CommunicationState, ControlState, ProcessingState};
use crate::variables::{StatusValue, svid};
use chrono::Local;
use secs_core::{SecsError, SecsResult};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;

/// Model name reported until the application sets its own
pub const DEFAULT_MODEL_NAME: &str = "VIRTUAL_HOST_EQ";
pub const DEFAULT_SOFTWARE_REVISION: &str = "1.0.0";

/// State guarded by the manager lock
pub(crate) struct GemInner {
    pub(crate) control: ControlState,
    pub(crate) communication: CommunicationState,
    pub(crate) processing: ProcessingState,
    pub(crate) variables: HashMap<String, StatusValue>,
    pub(crate) alarms: BTreeMap<u32, Alarm>,
    pub(crate) events: Vec<CollectionEvent>,
}

/// Notifications raised while the lock is held, dispatched after release
pub(crate) type Pending = Vec<GemNotification>;

impl GemInner {
    fn new(model_name: &str, software_revision: &str) -> Self {
        let now = Local::now();
        let variables: HashMap<String, StatusValue> = [
            (svid::MDLN, StatusValue::from(model_name)),
            (svid::SOFTREV, StatusValue::from(software_revision)),
            (
                svid::ECID,
                StatusValue::List((1u32..=5).map(StatusValue::from).collect()),
            ),
            (svid::CLOCK, StatusValue::from(now)),
            (svid::PPID, StatusValue::from("")),
            (svid::RCMD, StatusValue::from("")),
            (svid::CPNAME, StatusValue::from("")),
            (svid::PPPARM, StatusValue::List(Vec::new())),
            (svid::EQ_STATE, StatusValue::from(ProcessingState::Idle.eq_state_name())),
            (svid::PREVIOUS_TASK_NAME, StatusValue::from("")),
            (svid::PREVIOUS_TASK_TYPE, StatusValue::from("")),
            (svid::SUBST_COUNT, StatusValue::Unsigned(0)),
            (svid::SUBST_HISTORY, StatusValue::List(Vec::new())),
            (svid::CONTROL_JOB_ID, StatusValue::from("")),
            (svid::PROCESS_JOB_ID, StatusValue::from("")),
            (svid::CARRIER_INPUT_SPEC, StatusValue::from("")),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        Self {
            control: ControlState::Offline,
            communication: CommunicationState::Offline,
            processing: ProcessingState::Idle,
            variables,
            alarms: BTreeMap::new(),
            events: standard_catalogue(),
        }
    }

    pub(crate) fn set_variable(&mut self, name: &str, value: impl Into<StatusValue>) {
        self.variables.insert(name.to_string(), value.into());
    }

    fn stamp_clock(&mut self) {
        self.set_variable(svid::CLOCK, Local::now());
    }

    fn set_control(&mut self, new: ControlState, pending: &mut Pending) {
        let previous = self.control;
        self.control = new;
        self.communication = match new {
            ControlState::Online => CommunicationState::Online,
            ControlState::Offline => CommunicationState::Offline,
            ControlState::Local => self.communication,
        };
        self.stamp_clock();
        log::info!("Control state {} -> {}", previous, new);
        pending.push(GemNotification::ControlStateChanged {
            previous,
            current: new,
        });
    }

    pub(crate) fn go_online(&mut self, pending: &mut Pending) {
        if self.control == ControlState::Online {
            return;
        }
        self.set_control(ControlState::Online, pending);
        self.trigger(ceid::CONTROL_STATE_REMOTE, "Control State Remote", pending);
    }

    pub(crate) fn go_offline(&mut self, pending: &mut Pending) {
        if self.control == ControlState::Offline {
            return;
        }
        self.set_control(ControlState::Offline, pending);
        self.trigger(ceid::EQUIPMENT_OFFLINE, "Equipment Offline", pending);
    }

    pub(crate) fn set_local(&mut self, pending: &mut Pending) {
        self.set_control(ControlState::Local, pending);
        self.trigger(ceid::CONTROL_STATE_LOCAL, "Control State Local", pending);
    }

    /// Only entering Processing or Idle raises a collection event
    pub(crate) fn set_processing(&mut self, new: ProcessingState, pending: &mut Pending) {
        let previous = self.processing;
        if previous == new {
            return;
        }
        self.processing = new;
        self.set_variable(svid::EQ_STATE, new.eq_state_name());
        self.stamp_clock();
        log::info!("Processing state {} -> {}", previous, new);
        pending.push(GemNotification::ProcessingStateChanged {
            previous,
            current: new,
        });

        match new {
            ProcessingState::Processing => self.trigger(ceid::PROCESS_STARTED, "Process Started", pending),
            ProcessingState::Idle => self.trigger(ceid::PROCESS_COMPLETED, "Process Completed", pending),
            _ => false,
        };
    }

    /// # Returns
    /// `true` if the event is registered and enabled
    pub(crate) fn trigger(&mut self, event_id: u32, description: &str, pending: &mut Pending) -> bool {
        let Some(event) = self.events.iter_mut().find(|event| event.id == event_id) else {
            log::trace!("Ignoring unregistered event {}", event_id);
            return false;
        };
        if !event.enabled {
            log::debug!("Event {} ({}) is disabled", event_id, event.name);
            return false;
        }

        let timestamp = Local::now();
        event.last_triggered = Some(timestamp);
        event.trigger_count += 1;
        log::debug!("Event {} ({}) triggered: {}", event_id, event.name, description);
        pending.push(GemNotification::EventTriggered {
            event_id,
            name: event.name.clone(),
            description: description.to_string(),
            timestamp,
        });
        true
    }

    fn set_alarm(&mut self, alarm: Alarm, pending: &mut Pending) -> bool {
        if self.alarms.contains_key(&alarm.id) {
            log::debug!("Alarm {} already active", alarm.id);
            return false;
        }
        log::warn!("Alarm {} set: {}", alarm.id, alarm.text);
        let description = format!("Alarm Set: {}", alarm.text);
        let event_id = ceid::ALARM_SET_BASE.saturating_add(alarm.id);
        self.alarms.insert(alarm.id, alarm.clone());
        pending.push(GemNotification::AlarmSet(alarm));
        self.trigger(event_id, &description, pending);
        true
    }

    fn clear_alarm(&mut self, id: u32, pending: &mut Pending) -> Option<Alarm> {
        let alarm = self.alarms.remove(&id)?;
        log::info!("Alarm {} cleared", id);
        let description = format!("Alarm Cleared: {}", alarm.text);
        pending.push(GemNotification::AlarmCleared(alarm.clone()));
        self.trigger(ceid::ALARM_CLEARED_BASE.saturating_add(id), &description, pending);
        Some(alarm)
    }
}

/// GEM equipment state model
///
/// All reads and writes go through one mutex. Listeners are notified after
/// the mutex is released, in the order the changes happened.
pub struct GemStateManager {
    inner: Mutex<GemInner>,
    listeners: RwLock<Vec<Arc<dyn GemEventListener>>>,
}

impl GemStateManager {
    pub fn new() -> Self {
        Self::with_identity(DEFAULT_MODEL_NAME, DEFAULT_SOFTWARE_REVISION)
    }

    /// Create a manager reporting the given model name and software revision
    pub fn with_identity(model_name: &str, software_revision: &str) -> Self {
        Self {
            inner: Mutex::new(GemInner::new(model_name, software_revision)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GemInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `change` under the lock, then dispatch what it raised
    pub(crate) fn mutate<R>(&self, change: impl FnOnce(&mut GemInner, &mut Pending) -> R) -> R {
        let mut pending = Pending::new();
        let result = {
            let mut inner = self.lock();
            change(&mut inner, &mut pending)
        };
        self.dispatch(pending);
        result
    }

    fn dispatch(&self, pending: Pending) {
        if pending.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for notification in pending {
            for listener in listeners.iter().filter(|listener| !listener.is_closed()) {
                listener.on_notification(notification.clone());
            }
        }
        if listeners.iter().any(|listener| listener.is_closed()) {
            self.listeners
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|listener| !listener.is_closed());
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn GemEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Subscribe to notifications through a channel
    pub fn subscribe(&self) -> UnboundedReceiver<GemNotification> {
        let (listener, rx) = ChannelGemListener::new();
        self.add_listener(Arc::new(listener));
        rx
    }

    pub fn control_state(&self) -> ControlState {
        self.lock().control
    }

    pub fn communication_state(&self) -> CommunicationState {
        self.lock().communication
    }

    pub fn processing_state(&self) -> ProcessingState {
        self.lock().processing
    }

    /// Go online (remote); no-op if already online
    pub fn go_online(&self) {
        self.mutate(|inner, pending| inner.go_online(pending));
    }

    /// Go offline; no-op if already offline
    pub fn go_offline(&self) {
        self.mutate(|inner, pending| inner.go_offline(pending));
    }

    /// Switch to local control, raising the event even if already local
    pub fn set_local(&self) {
        self.mutate(|inner, pending| inner.set_local(pending));
    }

    pub fn set_processing_state(&self, state: ProcessingState) {
        self.mutate(|inner, pending| inner.set_processing(state, pending));
    }

    /// Raise an alarm
    ///
    /// # Returns
    /// `false` if an alarm with this id is already active; the existing
    /// entry is kept unchanged
    pub fn set_alarm(&self, id: u32, text: &str, severity: AlarmSeverity) -> bool {
        let alarm = Alarm::new(id, text, severity);
        self.mutate(|inner, pending| inner.set_alarm(alarm, pending))
    }

    /// Clear an alarm, returning it if it was active
    pub fn clear_alarm(&self, id: u32) -> Option<Alarm> {
        self.mutate(|inner, pending| inner.clear_alarm(id, pending))
    }

    pub fn is_alarm_active(&self, id: u32) -> bool {
        self.lock().alarms.contains_key(&id)
    }

    /// Active alarms ordered by id
    pub fn active_alarms(&self) -> Vec<Alarm> {
        self.lock().alarms.values().cloned().collect()
    }

    /// Trigger a collection event
    ///
    /// Unknown and disabled events are ignored.
    ///
    /// # Returns
    /// `true` if the event fired
    pub fn trigger_event(&self, event_id: u32, description: &str) -> bool {
        self.mutate(|inner, pending| inner.trigger(event_id, description, pending))
    }

    /// Register a collection event, or rename an existing one
    pub fn register_event(&self, event_id: u32, name: &str) {
        let mut inner = self.lock();
        match inner.events.iter_mut().find(|event| event.id == event_id) {
            Some(event) => event.name = name.to_string(),
            None => inner.events.push(CollectionEvent::new(event_id, name)),
        }
    }

    /// Enable or disable reporting of an event
    ///
    /// # Errors
    /// Returns `SecsError::InvalidData` if the event is not registered
    pub fn set_event_enabled(&self, event_id: u32, enabled: bool) -> SecsResult<()> {
        let mut inner = self.lock();
        let event = inner
            .events
            .iter_mut()
            .find(|event| event.id == event_id)
            .ok_or_else(|| SecsError::InvalidData(format!("Unknown collection event {}", event_id)))?;
        event.enabled = enabled;
        Ok(())
    }

    pub fn event(&self, event_id: u32) -> Option<CollectionEvent> {
        self.lock().events.iter().find(|event| event.id == event_id).cloned()
    }

    /// Snapshot of the event catalogue
    pub fn events(&self) -> Vec<CollectionEvent> {
        self.lock().events.clone()
    }

    pub fn update_status_variable(&self, name: &str, value: impl Into<StatusValue>) {
        self.lock().set_variable(name, value);
    }

    /// Look up a status variable; `None` if absent
    pub fn get_status_variable(&self, name: &str) -> Option<StatusValue> {
        self.lock().variables.get(name).cloned()
    }

    /// Look up a status variable that must exist
    ///
    /// # Errors
    /// Returns `SecsError::InvalidState` if absent
    pub fn require_status_variable(&self, name: &str) -> SecsResult<StatusValue> {
        self.get_status_variable(name)
            .ok_or_else(|| SecsError::InvalidState(format!("Status variable {} is not defined", name)))
    }

    /// Snapshot of the status variable table, sorted by name
    pub fn status_variables(&self) -> BTreeMap<String, StatusValue> {
        self.lock()
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl Default for GemStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GemStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("GemStateManager")
            .field("control", &inner.control)
            .field("communication", &inner.communication)
            .field("processing", &inner.processing)
            .field("active_alarms", &inner.alarms.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CallbackGemListener;

    fn triggered_ids(rx: &mut UnboundedReceiver<GemNotification>) -> Vec<u32> {
        let mut ids = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            if let GemNotification::EventTriggered { event_id, .. } = notification {
                ids.push(event_id);
            }
        }
        ids
    }

    #[test]
    fn test_initial_state() {
        let gem = GemStateManager::new();
        assert_eq!(gem.control_state(), ControlState::Offline);
        assert_eq!(gem.communication_state(), CommunicationState::Offline);
        assert_eq!(gem.processing_state(), ProcessingState::Idle);
        assert_eq!(gem.get_status_variable(svid::MDLN), Some(StatusValue::from(DEFAULT_MODEL_NAME)));
        assert_eq!(gem.status_variables().len(), 16);
        assert_eq!(gem.events().len(), 20);
    }

    #[test]
    fn test_go_online_fires_remote_event_once() {
        let gem = GemStateManager::new();
        let mut rx = gem.subscribe();

        gem.go_online();
        assert_eq!(gem.control_state(), ControlState::Online);
        assert_eq!(gem.communication_state(), CommunicationState::Online);
        assert_eq!(triggered_ids(&mut rx), vec![ceid::CONTROL_STATE_REMOTE]);

        gem.go_online();
        assert!(triggered_ids(&mut rx).is_empty());
        assert_eq!(gem.event(ceid::CONTROL_STATE_REMOTE).unwrap().trigger_count, 1);
    }

    #[test]
    fn test_offline_and_local_transitions() {
        let gem = GemStateManager::new();
        let mut rx = gem.subscribe();

        gem.go_offline();
        assert!(triggered_ids(&mut rx).is_empty());

        gem.set_local();
        gem.set_local();
        assert_eq!(gem.control_state(), ControlState::Local);
        assert_eq!(gem.communication_state(), CommunicationState::Offline);
        assert_eq!(
            triggered_ids(&mut rx),
            vec![ceid::CONTROL_STATE_LOCAL, ceid::CONTROL_STATE_LOCAL]
        );

        gem.go_online();
        gem.go_offline();
        assert_eq!(gem.communication_state(), CommunicationState::Offline);
        assert_eq!(
            triggered_ids(&mut rx),
            vec![ceid::CONTROL_STATE_REMOTE, ceid::EQUIPMENT_OFFLINE]
        );
    }

    #[test]
    fn test_processing_events_only_for_processing_and_idle() {
        let gem = GemStateManager::new();
        let mut rx = gem.subscribe();

        gem.set_processing_state(ProcessingState::Setup);
        gem.set_processing_state(ProcessingState::Processing);
        gem.set_processing_state(ProcessingState::Processing);
        gem.set_processing_state(ProcessingState::Paused);
        gem.set_processing_state(ProcessingState::Idle);

        assert_eq!(
            triggered_ids(&mut rx),
            vec![ceid::PROCESS_STARTED, ceid::PROCESS_COMPLETED]
        );
        assert_eq!(gem.get_status_variable(svid::EQ_STATE), Some(StatusValue::from("IDLE")));
    }

    #[test]
    fn test_alarm_idempotence() {
        let gem = GemStateManager::new();
        assert!(gem.set_alarm(101, "A", AlarmSeverity::Warning));
        assert!(!gem.set_alarm(101, "B", AlarmSeverity::Critical));

        let alarms = gem.active_alarms();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].text, "A");
        assert_eq!(alarms[0].severity, AlarmSeverity::Warning);

        assert_eq!(gem.clear_alarm(101).map(|alarm| alarm.text), Some("A".to_string()));
        assert!(gem.clear_alarm(101).is_none());
        assert!(!gem.is_alarm_active(101));
    }

    #[test]
    fn test_alarm_events_need_registration() {
        let gem = GemStateManager::new();
        let mut rx = gem.subscribe();

        gem.set_alarm(5, "Door open", AlarmSeverity::Error);
        let notifications: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(notifications.len(), 1);
        assert!(matches!(&notifications[0], GemNotification::AlarmSet(alarm) if alarm.id == 5));

        gem.register_event(205, "Door Alarm Cleared");
        gem.clear_alarm(5);
        assert_eq!(triggered_ids(&mut rx), vec![205]);
        assert_eq!(gem.event(205).unwrap().trigger_count, 1);
    }

    #[test]
    fn test_unknown_and_disabled_events() {
        let gem = GemStateManager::new();
        let before = gem.events();
        assert!(!gem.trigger_event(9999, "x"));
        assert_eq!(gem.events(), before);

        gem.set_event_enabled(ceid::RECIPE_CHANGED, false).unwrap();
        assert!(!gem.trigger_event(ceid::RECIPE_CHANGED, "disabled"));
        assert_eq!(gem.event(ceid::RECIPE_CHANGED).unwrap().trigger_count, 0);
        assert!(gem.set_event_enabled(9999, true).is_err());
    }

    #[test]
    fn test_status_variables() {
        let gem = GemStateManager::new();
        assert!(gem.get_status_variable("Missing").is_none());
        assert!(matches!(
            gem.require_status_variable("Missing"),
            Err(SecsError::InvalidState(_))
        ));

        gem.update_status_variable("Temperature", 21.5);
        assert_eq!(gem.get_status_variable("Temperature"), Some(StatusValue::Float(21.5)));
        gem.update_status_variable("Temperature", 22.0);
        assert_eq!(gem.require_status_variable("Temperature").unwrap(), StatusValue::Float(22.0));
    }

    #[test]
    fn test_listener_may_call_back_into_manager() {
        let gem = Arc::new(GemStateManager::new());
        let weak = Arc::downgrade(&gem);
        gem.add_listener(Arc::new(CallbackGemListener::new(move |notification| {
            if let (GemNotification::ControlStateChanged { .. }, Some(gem)) = (notification, weak.upgrade()) {
                gem.update_status_variable("LastChange", gem.control_state().to_string());
            }
        })));

        gem.go_online();
        assert_eq!(gem.get_status_variable("LastChange"), Some(StatusValue::from("ONLINE")));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let gem = GemStateManager::new();
        drop(gem.subscribe());
        let mut kept = gem.subscribe();

        gem.go_online();
        assert_eq!(triggered_ids(&mut kept), vec![ceid::CONTROL_STATE_REMOTE]);
        assert_eq!(gem.listeners.read().unwrap().len(), 1);
    }
}
