//! HSMS session configuration

use secs_core::{SecsError, SecsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which side opens the TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Connects out and sends Select.req (usually the host)
    Active,
    /// Listens and waits for Select.req (usually the equipment)
    Passive,
}

/// HSMS session configuration
///
/// Timer defaults follow common SEMI E37 practice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsmsConfig {
    /// Session id placed in outgoing data message headers
    pub device_id: u16,
    pub mode: ConnectionMode,
    /// Reply timeout
    pub t3: Duration,
    /// Minimum wait between a separation and the next connect
    pub t5: Duration,
    /// Control transaction timeout
    pub t6: Duration,
    /// Maximum time spent NOT-SELECTED before the connection is dropped
    pub t7: Duration,
    /// Maximum gap between reads inside one frame
    pub t8: Duration,
    /// Heartbeat period; `None` disables the linktest supervisor
    pub linktest_interval: Option<Duration>,
    pub connect_timeout: Duration,
    /// Largest accepted message length (header plus payload)
    pub max_message_length: u32,
    /// Consecutive T6 failures tolerated before the connection is dropped
    pub max_control_failures: u32,
}

impl Default for HsmsConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            mode: ConnectionMode::Active,
            t3: Duration::from_secs(45),
            t5: Duration::from_secs(10),
            t6: Duration::from_secs(5),
            t7: Duration::from_secs(10),
            t8: Duration::from_secs(6),
            linktest_interval: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
            max_message_length: 16 * 1024 * 1024,
            max_control_failures: 3,
        }
    }
}

impl HsmsConfig {
    pub fn active(device_id: u16) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }

    pub fn passive(device_id: u16) -> Self {
        Self {
            device_id,
            mode: ConnectionMode::Passive,
            ..Self::default()
        }
    }

    pub fn with_t3(mut self, t3: Duration) -> Self {
        self.t3 = t3;
        self
    }

    pub fn with_t5(mut self, t5: Duration) -> Self {
        self.t5 = t5;
        self
    }

    pub fn with_t6(mut self, t6: Duration) -> Self {
        self.t6 = t6;
        self
    }

    pub fn with_t7(mut self, t7: Duration) -> Self {
        self.t7 = t7;
        self
    }

    pub fn with_t8(mut self, t8: Duration) -> Self {
        self.t8 = t8;
        self
    }

    pub fn with_linktest_interval(mut self, interval: Option<Duration>) -> Self {
        self.linktest_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_message_length(mut self, length: u32) -> Self {
        self.max_message_length = length;
        self
    }

    pub fn with_max_control_failures(mut self, failures: u32) -> Self {
        self.max_control_failures = failures;
        self
    }

    /// Heartbeat period the session runs with
    ///
    /// A zero interval is treated as disabled.
    pub fn linktest_period(&self) -> Option<Duration> {
        self.linktest_interval.filter(|interval| !interval.is_zero())
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns `SecsError::InvalidData` for zero timers or a message limit
    /// smaller than the header
    pub fn validate(&self) -> SecsResult<()> {
        let timers = [
            ("T3", self.t3),
            ("T6", self.t6),
            ("T7", self.t7),
            ("T8", self.t8),
        ];
        for (name, value) in timers {
            if value.is_zero() {
                return Err(SecsError::InvalidData(format!("{} must be greater than zero", name)));
            }
        }
        if self.linktest_interval.is_some_and(|i| i.is_zero()) {
            return Err(SecsError::InvalidData(
                "Linktest interval must be greater than zero".to_string(),
            ));
        }
        if (self.max_message_length as usize) < crate::header::HEADER_LEN {
            return Err(SecsError::InvalidData(format!(
                "Maximum message length {} is smaller than the header",
                self.max_message_length
            )));
        }
        Ok(())
    }
}
