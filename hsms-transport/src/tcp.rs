//! TCP transport implementation

use crate::stream::TransportLayer;
use async_trait::async_trait;
use secs_core::{SecsError, SecsResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    /// Bound on TCP connection establishment, `None` waits on the OS
    pub connect_timeout: Option<Duration>,
    /// Disable Nagle's algorithm; HSMS control messages are tiny
    pub nodelay: bool,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
        }
    }

    /// Create TCP settings with a connect timeout
    pub fn with_timeout(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..Self::new(host, port)
        }
    }

    fn validate(&self) -> SecsResult<()> {
        if self.host.trim().is_empty() {
            return Err(SecsError::Connect("Empty host address".to_string()));
        }
        if self.port == 0 {
            return Err(SecsError::Connect("Port 0 is not a valid remote port".to_string()));
        }
        Ok(())
    }
}

/// Active TCP transport: connects out to a passive peer
#[derive(Debug, Clone)]
pub struct TcpTransport {
    settings: TcpSettings,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self { settings }
    }

    /// Create TCP transport from an `host:port` string
    pub fn from_address(address: &str) -> SecsResult<Self> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| SecsError::Connect(format!("Invalid TCP address: {}", address)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| SecsError::Connect(format!("Invalid TCP port in {}: {}", address, e)))?;
        Ok(Self::new(TcpSettings::new(host, port)))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    type Stream = TcpStream;

    async fn open(&self) -> SecsResult<TcpStream> {
        self.settings.validate()?;
        let target = (self.settings.host.as_str(), self.settings.port);

        let stream = match self.settings.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(target))
                .await
                .map_err(|_| {
                    SecsError::Connect(format!(
                        "Connecting to {} timed out after {:?}",
                        self.endpoint(),
                        timeout
                    ))
                })?,
            None => TcpStream::connect(target).await,
        }
        .map_err(|e| SecsError::Connect(format!("Connecting to {} failed: {}", self.endpoint(), e)))?;

        if self.settings.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                log::warn!("Failed to set TCP_NODELAY on {}: {}", self.endpoint(), e);
            }
        }
        log::debug!("TCP connected to {}", self.endpoint());
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}

/// Passive TCP side: listens for the active peer
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to a local address such as `0.0.0.0:5000`
    pub async fn bind(address: &str) -> SecsResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| SecsError::Connect(format!("Bind to {} failed: {}", address, e)))?;
        log::info!("HSMS listener bound to {}", address);
        Ok(Self { listener })
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Wait for the next inbound connection
    pub async fn accept(&self) -> SecsResult<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        log::info!("Accepted HSMS connection from {}", peer);
        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> SecsResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
