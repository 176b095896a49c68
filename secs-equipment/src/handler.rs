//! Primary message handlers

use async_trait::async_trait;
use chrono::Local;
use secs_core::{SecsMessage, SecsResult};
use secs_gem::messages::{
    self, COMMACK_ACCEPTED, OFLACK_ACKNOWLEDGED, ONLACK_ACCEPTED, ONLACK_ALREADY_ONLINE, OnlineData,
};
use secs_gem::{ControlState, GemStateManager, StatusValue, svid};
use std::sync::Arc;

/// What a handler did with a primary message
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Send this secondary back to the host
    Reply(SecsMessage),
    /// Handled; nothing to send
    Handled,
    /// Not recognized; a W-bit primary is answered with S9F5
    Unhandled,
}

/// Handles primary messages received from the host
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &SecsMessage) -> SecsResult<HandlerOutcome>;
}

/// Answers the standard GEM requests from the state model
///
/// | request | reply                                               |
/// |---------|-----------------------------------------------------|
/// | S1F1    | S1F2 with `MDLN` and `SOFTREV`                      |
/// | S1F3    | S1F4 with the requested status variables            |
/// | S1F13   | S1F14, COMMACK accepted                             |
/// | S1F15   | S1F16 after going offline                           |
/// | S1F17   | S1F18 after going online                            |
/// | S2F17   | S2F18 with the current time                         |
pub struct StandardHandler {
    gem: Arc<GemStateManager>,
}

impl StandardHandler {
    pub fn new(gem: Arc<GemStateManager>) -> Self {
        Self { gem }
    }

    fn online_data(&self) -> OnlineData {
        let text = |name: &str| {
            self.gem
                .get_status_variable(name)
                .and_then(|value| value.as_text().map(str::to_string))
                .unwrap_or_default()
        };
        OnlineData::new(text(svid::MDLN), text(svid::SOFTREV))
    }

    /// An empty request reports every variable, sorted by name
    fn status_values(&self, request: &SecsMessage) -> SecsResult<SecsMessage> {
        let names = messages::parse_s1f3(request)?;
        let values: Vec<Option<StatusValue>> = if names.is_empty() {
            self.gem.status_variables().into_values().map(Some).collect()
        } else {
            names.iter().map(|name| self.gem.get_status_variable(name)).collect()
        };
        Ok(messages::s1f4(&values))
    }

    fn online(&self) -> SecsMessage {
        if self.gem.control_state() == ControlState::Online {
            return messages::s1f18(ONLACK_ALREADY_ONLINE);
        }
        self.gem.go_online();
        messages::s1f18(ONLACK_ACCEPTED)
    }
}

#[async_trait]
impl MessageHandler for StandardHandler {
    async fn handle(&self, message: &SecsMessage) -> SecsResult<HandlerOutcome> {
        let reply = match (message.stream, message.function) {
            (1, 1) => messages::s1f2(&self.online_data()),
            (1, 3) => self.status_values(message)?,
            (1, 13) => messages::s1f14(COMMACK_ACCEPTED, &self.online_data()),
            (1, 15) => {
                self.gem.go_offline();
                messages::s1f16(OFLACK_ACKNOWLEDGED)
            }
            (1, 17) => self.online(),
            (2, 17) => messages::s2f18(Local::now()),
            _ => return Ok(HandlerOutcome::Unhandled),
        };
        Ok(HandlerOutcome::Reply(reply))
    }
}
