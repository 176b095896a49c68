//! Alarm records

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Alarm severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlarmSeverity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl AlarmSeverity {
    /// ALCD category bits (SEMI E5, bits 1-7)
    pub fn alarm_category(self) -> u8 {
        match self {
            AlarmSeverity::Info => 0,
            AlarmSeverity::Warning => 4,
            AlarmSeverity::Error => 5,
            AlarmSeverity::Critical => 2,
        }
    }
}

/// An active alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: u32,
    pub text: String,
    pub severity: AlarmSeverity,
    pub set_time: DateTime<Local>,
}

impl Alarm {
    pub fn new(id: u32, text: impl Into<String>, severity: AlarmSeverity) -> Self {
        Self {
            id,
            text: text.into(),
            severity,
            set_time: Local::now(),
        }
    }

    /// ALCD byte: bit 8 set while the alarm is active
    pub fn alcd(&self, set: bool) -> u8 {
        let state = if set { 0x80 } else { 0x00 };
        state | self.severity.alarm_category()
    }
}
