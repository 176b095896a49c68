//! Host client builder
//!
//! ```rust,no_run
//! use secs_host::HostClientBuilder;
//! use std::time::Duration;
//!
//! # async fn demo() -> secs_core::SecsResult<()> {
//! let host = HostClientBuilder::new()
//!     .tcp("192.168.1.50:5000")
//!     .device_id(1)
//!     .t3(Duration::from_secs(30))
//!     .build()?;
//! host.connect().await?;
//! # Ok(())
//! # }
//! ```

use crate::client::HostClient;
use hsms_session::HsmsConfig;
use secs_core::{SecsError, SecsResult};
use std::time::Duration;

/// Default HSMS port
pub const DEFAULT_PORT: u16 = 5000;

/// Builder for [`HostClient`]
///
/// Only the equipment address is required; everything else starts from
/// [`HsmsConfig::default`].
#[derive(Debug, Clone)]
pub struct HostClientBuilder {
    host: Option<String>,
    port: u16,
    config: HsmsConfig,
    auto_acknowledge: bool,
}

impl HostClientBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            config: HsmsConfig::default(),
            auto_acknowledge: true,
        }
    }

    /// Equipment address as `host:port`
    ///
    /// A missing or unparsable port keeps the current one; `build` reports
    /// an empty host.
    pub fn tcp(mut self, address: &str) -> Self {
        match address.rsplit_once(':') {
            Some((host, port)) => {
                self.host = Some(host.to_string());
                if let Ok(port) = port.parse() {
                    self.port = port;
                }
            }
            None => self.host = Some(address.to_string()),
        }
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn device_id(mut self, device_id: u16) -> Self {
        self.config.device_id = device_id;
        self
    }

    pub fn t3(mut self, t3: Duration) -> Self {
        self.config = self.config.with_t3(t3);
        self
    }

    pub fn linktest_interval(mut self, interval: Option<Duration>) -> Self {
        self.config = self.config.with_linktest_interval(interval);
        self
    }

    /// Replace the whole session configuration
    ///
    /// The connection mode is forced to active when building.
    pub fn config(mut self, config: HsmsConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer S5F1 and S6F11 with an accepted acknowledge (on by default)
    pub fn auto_acknowledge(mut self, enabled: bool) -> Self {
        self.auto_acknowledge = enabled;
        self
    }

    /// Build the client without connecting
    ///
    /// # Errors
    /// - `SecsError::Connect` if no host or port 0 was given
    /// - `SecsError::InvalidData` if the session configuration is invalid
    pub fn build(self) -> SecsResult<HostClient> {
        let host = self
            .host
            .filter(|host| !host.is_empty())
            .ok_or_else(|| SecsError::Connect("No equipment address configured".to_string()))?;
        if self.port == 0 {
            return Err(SecsError::Connect(format!("Invalid port 0 for {}", host)));
        }
        let mut config = self.config;
        config.mode = hsms_session::ConnectionMode::Active;
        config.validate()?;
        Ok(HostClient::new(host, self.port, config, self.auto_acknowledge))
    }
}

impl Default for HostClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
