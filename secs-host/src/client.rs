//! Host client

use chrono::NaiveDateTime;
use hsms_session::{
    ConnectionState, HsmsConfig, HsmsSession, SessionEvent, SessionEventListener, SessionStatistics,
    WeakHsmsSession,
};
use secs_core::{SecsItem, SecsMessage, SecsResult};
use secs_gem::messages::{self, ACK_ACCEPTED, OnlineData};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// SECS/GEM host
///
/// Wraps an active [`HsmsSession`] with helpers for the standard host
/// requests. Create one with [`HostClientBuilder`](crate::HostClientBuilder).
#[derive(Clone)]
pub struct HostClient {
    session: HsmsSession,
    host: String,
    port: u16,
}

impl HostClient {
    pub(crate) fn new(host: String, port: u16, config: HsmsConfig, auto_acknowledge: bool) -> Self {
        let session = HsmsSession::new(config);
        if auto_acknowledge {
            session.add_listener(Arc::new(AcknowledgeListener {
                session: session.downgrade(),
            }));
        }
        Self { session, host, port }
    }

    /// Equipment address as `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Underlying session, for raw transactions and listeners
    pub fn session(&self) -> &HsmsSession {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_selected(&self) -> bool {
        self.session.is_selected()
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.session.statistics()
    }

    /// Connect to the equipment and select the session
    ///
    /// # Errors
    /// See [`HsmsSession::connect`]
    pub async fn connect(&self) -> SecsResult<()> {
        let device_id = self.session.device_id();
        self.session.connect(&self.host, self.port, device_id).await
    }

    /// Deselect and close; a no-op when not connected
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    /// Subscribe to session events (state changes, unsolicited messages, timers)
    pub fn subscribe(&self) -> UnboundedReceiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.session.add_listener(listener);
    }

    /// Send a primary without waiting for a reply
    ///
    /// # Returns
    /// The system bytes assigned to the message
    pub fn send(&self, message: SecsMessage) -> SecsResult<u32> {
        self.session.send(message)
    }

    /// Send a primary and wait up to T3 for its reply
    pub async fn request(&self, message: SecsMessage) -> SecsResult<SecsMessage> {
        self.session.request(message).await
    }

    /// Reply to a primary received from the equipment
    pub fn reply(&self, request: &SecsMessage, message: SecsMessage) -> SecsResult<()> {
        self.session.reply(request, message)
    }

    /// S1F1 Are You There
    ///
    /// # Returns
    /// The equipment model name and software revision from S1F2
    pub async fn are_you_there(&self) -> SecsResult<OnlineData> {
        let reply = self.request(messages::s1f1()).await?;
        messages::parse_s1f2(&reply)
    }

    /// S1F13 Establish Communications
    ///
    /// # Returns
    /// COMMACK, 0 when accepted
    pub async fn establish_communications(&self) -> SecsResult<u8> {
        let reply = self.request(messages::s1f13()).await?;
        let (commack, data) = messages::parse_s1f14(&reply)?;
        if let Some(data) = data {
            log::info!(
                "Communication established with {} {} (COMMACK={})",
                data.model_name,
                data.software_revision,
                commack
            );
        }
        Ok(commack)
    }

    /// S1F3 Selected Equipment Status Request
    ///
    /// Values come back in request order; unknown names yield an empty list.
    pub async fn request_status(&self, names: &[&str]) -> SecsResult<Vec<SecsItem>> {
        let reply = self.request(messages::s1f3(names)).await?;
        messages::parse_s1f4(&reply)
    }

    /// S2F17 Date and Time Request
    pub async fn request_date_time(&self) -> SecsResult<NaiveDateTime> {
        let reply = self.request(messages::s2f17()).await?;
        messages::parse_s2f18(&reply)
    }

    /// S1F17 Request ON-LINE
    ///
    /// # Returns
    /// ONLACK: 0 accepted, 1 not allowed, 2 already online
    pub async fn request_online(&self) -> SecsResult<u8> {
        let reply = self.request(messages::s1f17()).await?;
        messages::parse_ack(&reply)
    }

    /// S1F15 Request OFF-LINE
    ///
    /// # Returns
    /// OFLACK, 0 when acknowledged
    pub async fn request_offline(&self) -> SecsResult<u8> {
        let reply = self.request(messages::s1f15()).await?;
        messages::parse_ack(&reply)
    }

    /// Run a Linktest and return the round-trip time
    pub async fn linktest(&self) -> SecsResult<Duration> {
        self.session.linktest().await
    }
}

impl fmt::Debug for HostClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClient")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

/// Acknowledges alarm and event reports as they arrive
struct AcknowledgeListener {
    session: WeakHsmsSession,
}

impl SessionEventListener for AcknowledgeListener {
    fn on_event(&self, event: SessionEvent) {
        let SessionEvent::MessageReceived(message) = event else {
            return;
        };
        if !message.w_bit {
            return;
        }
        let ack = match (message.stream, message.function) {
            (5, 1) => {
                match messages::parse_s5f1(&message) {
                    Ok(report) => log::info!(
                        "Alarm {} {}: {}",
                        report.alid,
                        if report.is_set() { "set" } else { "cleared" },
                        report.text
                    ),
                    Err(e) => log::warn!("Malformed alarm report: {}", e),
                }
                messages::s5f2(ACK_ACCEPTED)
            }
            (6, 11) => {
                match messages::parse_s6f11(&message) {
                    Ok(report) => log::info!("Event report CEID={} DATAID={}", report.ceid, report.data_id),
                    Err(e) => log::warn!("Malformed event report: {}", e),
                }
                messages::s6f12(ACK_ACCEPTED)
            }
            _ => return,
        };
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if let Err(e) = session.reply(&message, ack) {
            log::warn!("Failed to acknowledge {}: {}", message.name(), e);
        }
    }
}
