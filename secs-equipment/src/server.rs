//! Equipment server
//!
//! The server listens for a host, accepts one connection at a time and
//! waits for the host to select. Primary messages go to the
//! [`MessageHandler`]; replies go back with the request's system bytes.
//! W-bit primaries the handler does not recognize are answered with S9F5.

use crate::bridge::HostReporter;
use crate::config::EquipmentConfig;
use crate::handler::{HandlerOutcome, MessageHandler, StandardHandler};
use hsms_session::{ConnectionMode, HsmsHeader, HsmsSession, SessionEvent};
use hsms_transport::TcpAcceptor;
use secs_core::{SecsMessage, SecsResult};
use secs_gem::GemStateManager;
use secs_gem::messages;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// SECS/GEM equipment
///
/// # Usage Example
/// ```rust,no_run
/// use secs_equipment::{EquipmentConfig, EquipmentServer};
///
/// # async fn demo() -> secs_core::SecsResult<()> {
/// let server = EquipmentServer::new(EquipmentConfig::new("0.0.0.0:5000"));
/// server.gem().go_online();
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct EquipmentServer {
    config: EquipmentConfig,
    gem: Arc<GemStateManager>,
    handler: Arc<dyn MessageHandler>,
    session: HsmsSession,
    shutdown: CancellationToken,
}

impl EquipmentServer {
    /// Create a server answering with [`StandardHandler`]
    pub fn new(config: EquipmentConfig) -> Self {
        let gem = Arc::new(GemStateManager::with_identity(
            &config.model_name,
            &config.software_revision,
        ));
        let handler = Arc::new(StandardHandler::new(Arc::clone(&gem)));
        Self::with_handler(config, gem, handler)
    }

    /// Create a server with a custom handler over an existing state model
    pub fn with_handler(
        config: EquipmentConfig,
        gem: Arc<GemStateManager>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let mut hsms = config.hsms.clone();
        hsms.mode = ConnectionMode::Passive;
        let session = HsmsSession::new(hsms);
        gem.add_listener(Arc::new(HostReporter::new(session.downgrade())));

        Self {
            config,
            gem,
            handler,
            session,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EquipmentConfig {
        &self.config
    }

    pub fn gem(&self) -> &Arc<GemStateManager> {
        &self.gem
    }

    pub fn session(&self) -> &HsmsSession {
        &self.session
    }

    /// Bind the configured address and serve until [`shutdown`](Self::shutdown)
    ///
    /// # Errors
    /// Returns `SecsError::Connect` if the address cannot be bound
    pub async fn run(&self) -> SecsResult<()> {
        self.config.validate()?;
        let acceptor = TcpAcceptor::bind(&self.config.bind_address).await?;
        self.serve(acceptor).await
    }

    /// Serve hosts on an already bound listener until [`shutdown`](Self::shutdown)
    pub async fn serve(&self, acceptor: TcpAcceptor) -> SecsResult<()> {
        if let Ok(address) = acceptor.local_addr() {
            log::info!("Equipment listening on {}", address);
        }
        let dispatcher = tokio::spawn(dispatch_loop(
            self.session.clone(),
            Arc::clone(&self.handler),
            self.session.subscribe(),
            self.shutdown.child_token(),
        ));

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.session.accept(&acceptor) => accepted,
            };
            match accepted {
                Ok(peer) => log::info!("Host connected from {}", peer),
                Err(e) => {
                    log::error!("Error accepting connection: {}", e);
                    continue;
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.session.wait_disconnected() => log::info!("Host disconnected"),
            }
        }

        self.session.disconnect().await;
        if let Err(e) = dispatcher.await {
            log::error!("Message dispatcher failed: {}", e);
        }
        log::info!("Equipment server stopped");
        Ok(())
    }

    /// Stop serving and close the host connection
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_loop(
    session: HsmsSession,
    handler: Arc<dyn MessageHandler>,
    mut events: UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Some(SessionEvent::MessageReceived(message)) => {
                dispatch(&session, handler.as_ref(), message).await;
            }
            Some(_) => {}
            None => return,
        }
    }
}

async fn dispatch(session: &HsmsSession, handler: &dyn MessageHandler, message: SecsMessage) {
    if !message.is_primary() {
        log::trace!("Host acknowledged with {}", message.name());
        return;
    }

    let outcome = match handler.handle(&message).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("Handler failed on {}: {}", message.name(), e);
            HandlerOutcome::Unhandled
        }
    };

    let result = match outcome {
        HandlerOutcome::Reply(reply) => session.reply(&message, reply),
        HandlerOutcome::Handled => Ok(()),
        HandlerOutcome::Unhandled if message.w_bit => {
            log::info!("Unrecognized {}, answering S9F5", message.name());
            messages::s9f5(&HsmsHeader::data(&message).to_bytes())
                .and_then(|error| session.send(error))
                .map(|_| ())
        }
        HandlerOutcome::Unhandled => {
            log::debug!("Ignoring unrecognized {}", message.name());
            Ok(())
        }
    };
    if let Err(e) = result {
        log::warn!("Failed to answer {}: {}", message.name(), e);
    }
}
