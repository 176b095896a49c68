//! HSMS session statistics

/// Session statistics
///
/// Counters accumulate over the lifetime of the session object, across
/// reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Frames written to the stream, control and data
    pub frames_sent: u64,
    /// Frames read from the stream, control and data
    pub frames_received: u64,
    pub data_messages_sent: u64,
    pub data_messages_received: u64,
    /// Linktest transactions completed
    pub linktests: u64,
    pub t3_timeouts: u64,
    pub t6_timeouts: u64,
    pub t7_timeouts: u64,
    pub t8_timeouts: u64,
    /// Data messages dropped because their payload did not decode
    pub decode_errors: u64,
    pub rejects_received: u64,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Total supervision timer expiries
    pub fn timeouts(&self) -> u64 {
        self.t3_timeouts + self.t6_timeouts + self.t7_timeouts + self.t8_timeouts
    }
}
