//! Forwards GEM notifications to the host
//!
//! Collection events become S6F11 event reports and alarm changes become
//! S5F1 alarm reports. Nothing is sent unless the session is selected.

use chrono::{DateTime, Local};
use hsms_session::WeakHsmsSession;
use secs_core::{SecsItem, SecsMessage};
use secs_gem::messages::{self, EventReport, Report};
use secs_gem::variables::CLOCK_FORMAT;
use secs_gem::{GemEventListener, GemNotification};
use std::sync::atomic::{AtomicU32, Ordering};

/// GEM listener that reports to the connected host
pub struct HostReporter {
    session: WeakHsmsSession,
    data_id: AtomicU32,
}

impl HostReporter {
    pub fn new(session: WeakHsmsSession) -> Self {
        Self {
            session,
            data_id: AtomicU32::new(0),
        }
    }

    fn next_data_id(&self) -> u32 {
        self.data_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Event report with a single report whose id is the CEID
    ///
    /// The report carries the event name, the description and the trigger
    /// time in `CLOCK` format.
    pub fn event_report(
        &self,
        event_id: u32,
        name: &str,
        description: &str,
        timestamp: DateTime<Local>,
    ) -> SecsMessage {
        messages::s6f11(&EventReport {
            data_id: self.next_data_id(),
            ceid: event_id,
            reports: vec![Report {
                id: event_id,
                values: vec![
                    SecsItem::ascii(name),
                    SecsItem::ascii(description),
                    SecsItem::ascii(timestamp.format(CLOCK_FORMAT).to_string()),
                ],
            }],
        })
    }
}

impl GemEventListener for HostReporter {
    fn on_notification(&self, notification: GemNotification) {
        let message = match notification {
            GemNotification::EventTriggered {
                event_id,
                name,
                description,
                timestamp,
            } => self.event_report(event_id, &name, &description, timestamp),
            GemNotification::AlarmSet(alarm) => messages::s5f1(&alarm, true),
            GemNotification::AlarmCleared(alarm) => messages::s5f1(&alarm, false),
            _ => return,
        };

        let Some(session) = self.session.upgrade() else {
            return;
        };
        if !session.is_selected() {
            log::trace!("No host selected, dropping {}", message.name());
            return;
        }
        if let Err(e) = session.send(message) {
            log::warn!("Failed to report to host: {}", e);
        }
    }
}
