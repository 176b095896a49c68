//! Status variable values

use chrono::{DateTime, Local};
use secs_core::SecsItem;
use serde::{Deserialize, Serialize};

/// Names of the status variables every manager starts with
pub mod svid {
    pub const MDLN: &str = "MDLN";
    pub const SOFTREV: &str = "SOFTREV";
    pub const ECID: &str = "ECID";
    pub const CLOCK: &str = "CLOCK";
    pub const PPID: &str = "PPID";
    pub const RCMD: &str = "RCMD";
    pub const CPNAME: &str = "CPNAME";
    pub const PPPARM: &str = "PPPARM";
    pub const EQ_STATE: &str = "EqState";
    pub const PREVIOUS_TASK_NAME: &str = "PreviousTaskName";
    pub const PREVIOUS_TASK_TYPE: &str = "PreviousTaskType";
    pub const SUBST_COUNT: &str = "SubstCount";
    pub const SUBST_HISTORY: &str = "SubstHistory";
    pub const CONTROL_JOB_ID: &str = "ControlJobId";
    pub const PROCESS_JOB_ID: &str = "ProcessJobId";
    pub const CARRIER_INPUT_SPEC: &str = "CarrierInputSpec";
}

/// `CLOCK` and S2F18 time format
pub const CLOCK_FORMAT: &str = "%Y%m%d%H%M%S";

/// A typed status variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatusValue {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Local>),
    List(Vec<StatusValue>),
}

impl StatusValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StatusValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            StatusValue::Unsigned(value) => Some(*value),
            StatusValue::Integer(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StatusValue]> {
        match self {
            StatusValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// SECS-II representation used in S1F4 and event reports
    ///
    /// Unsigned values that fit use U4, timestamps use the `CLOCK` text form.
    pub fn to_secs_item(&self) -> SecsItem {
        match self {
            StatusValue::Text(text) => SecsItem::ascii(text.as_str()),
            StatusValue::Integer(value) => SecsItem::i8(*value),
            StatusValue::Unsigned(value) => match u32::try_from(*value) {
                Ok(value) => SecsItem::u4(value),
                Err(_) => SecsItem::u8(*value),
            },
            StatusValue::Float(value) => SecsItem::f8(*value),
            StatusValue::Boolean(value) => SecsItem::boolean(*value),
            StatusValue::Timestamp(time) => SecsItem::ascii(time.format(CLOCK_FORMAT).to_string()),
            StatusValue::List(items) => SecsItem::list(items.iter().map(StatusValue::to_secs_item).collect::<Vec<_>>()),
        }
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        StatusValue::Text(value.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        StatusValue::Text(value)
    }
}

impl From<i64> for StatusValue {
    fn from(value: i64) -> Self {
        StatusValue::Integer(value)
    }
}

impl From<i32> for StatusValue {
    fn from(value: i32) -> Self {
        StatusValue::Integer(i64::from(value))
    }
}

impl From<u64> for StatusValue {
    fn from(value: u64) -> Self {
        StatusValue::Unsigned(value)
    }
}

impl From<u32> for StatusValue {
    fn from(value: u32) -> Self {
        StatusValue::Unsigned(u64::from(value))
    }
}

impl From<f64> for StatusValue {
    fn from(value: f64) -> Self {
        StatusValue::Float(value)
    }
}

impl From<bool> for StatusValue {
    fn from(value: bool) -> Self {
        StatusValue::Boolean(value)
    }
}

impl From<DateTime<Local>> for StatusValue {
    fn from(value: DateTime<Local>) -> Self {
        StatusValue::Timestamp(value)
    }
}

impl From<Vec<StatusValue>> for StatusValue {
    fn from(value: Vec<StatusValue>) -> Self {
        StatusValue::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_secs_item() {
        assert_eq!(StatusValue::from("IDLE").to_secs_item(), SecsItem::ascii("IDLE"));
        assert_eq!(StatusValue::from(5u32).to_secs_item(), SecsItem::u4(5));
        assert_eq!(StatusValue::from(u64::MAX).to_secs_item(), SecsItem::u8(u64::MAX));
        assert_eq!(StatusValue::from(-1i32).to_secs_item(), SecsItem::i8(-1));

        let list = StatusValue::from(vec![StatusValue::from(true), StatusValue::from(1.5)]);
        assert_eq!(
            list.to_secs_item(),
            SecsItem::list(vec![SecsItem::boolean(true), SecsItem::f8(1.5)])
        );
    }

    #[test]
    fn test_timestamp_uses_clock_format() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(StatusValue::from(time).to_secs_item(), SecsItem::ascii("20240309070501"));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(StatusValue::from(3i64).as_unsigned(), Some(3));
        assert_eq!(StatusValue::from(-3i64).as_unsigned(), None);
        assert_eq!(StatusValue::from("x").as_text(), Some("x"));
        assert!(StatusValue::from(1u32).as_list().is_none());
    }
}
