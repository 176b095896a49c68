//! Standard GEM message builders and parsers
//!
//! Builders return messages with session id and system bytes zeroed; the
//! session fills them in on transmission (or copies them from the primary
//! when replying). Parsers check the body shape and fail with
//! `SecsError::InvalidData` when it does not match.

use crate::alarm::Alarm;
use crate::variables::{CLOCK_FORMAT, StatusValue};
use chrono::{DateTime, Local, NaiveDateTime};
use secs_core::{SecsError, SecsItem, SecsMessage, SecsResult};

/// S1F14 COMMACK: communication accepted
pub const COMMACK_ACCEPTED: u8 = 0;
/// S1F14 COMMACK: denied, try again
pub const COMMACK_DENIED: u8 = 1;
/// S1F16 OFLACK: offline acknowledged
pub const OFLACK_ACKNOWLEDGED: u8 = 0;
/// S1F18 ONLACK: online accepted
pub const ONLACK_ACCEPTED: u8 = 0;
/// S1F18 ONLACK: online not allowed
pub const ONLACK_NOT_ALLOWED: u8 = 1;
/// S1F18 ONLACK: already online
pub const ONLACK_ALREADY_ONLINE: u8 = 2;
/// S5F2 / S6F12 acknowledge code: accepted
pub const ACK_ACCEPTED: u8 = 0;
/// Length of the message header echoed in stream 9 errors
pub const MHEAD_LEN: usize = 10;

fn message(stream: u8, function: u8, w_bit: bool, body: Option<SecsItem>) -> SecsMessage {
    SecsMessage {
        stream,
        function,
        w_bit,
        session_id: 0,
        system_bytes: 0,
        body,
    }
}

fn invalid(message: &SecsMessage, expected: &str) -> SecsError {
    SecsError::InvalidData(format!("{}: expected {}", message.name(), expected))
}

fn expect_function(message: &SecsMessage, stream: u8, function: u8) -> SecsResult<()> {
    if message.stream == stream && message.function == function {
        Ok(())
    } else {
        Err(SecsError::InvalidData(format!(
            "Expected S{}F{}, got {}",
            stream,
            function,
            message.name()
        )))
    }
}

fn ascii_at(item: &SecsItem, index: usize) -> Option<String> {
    item.get(index).and_then(SecsItem::as_ascii).map(str::to_string)
}

/// Online identification carried by S1F2 and S1F14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineData {
    pub model_name: String,
    pub software_revision: String,
}

impl OnlineData {
    pub fn new(model_name: impl Into<String>, software_revision: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            software_revision: software_revision.into(),
        }
    }

    fn to_item(&self) -> SecsItem {
        SecsItem::list(vec![
            SecsItem::ascii(self.model_name.as_str()),
            SecsItem::ascii(self.software_revision.as_str()),
        ])
    }

    fn from_item(item: &SecsItem) -> Option<Self> {
        if item.len() != 2 {
            return None;
        }
        Some(Self::new(ascii_at(item, 0)?, ascii_at(item, 1)?))
    }
}

/// S1F1 Are You There
pub fn s1f1() -> SecsMessage {
    message(1, 1, true, None)
}

/// S1F2 On Line Data: `L[2] <A MDLN> <A SOFTREV>`
pub fn s1f2(data: &OnlineData) -> SecsMessage {
    message(1, 2, false, Some(data.to_item()))
}

pub fn parse_s1f2(reply: &SecsMessage) -> SecsResult<OnlineData> {
    expect_function(reply, 1, 2)?;
    reply
        .body
        .as_ref()
        .and_then(OnlineData::from_item)
        .ok_or_else(|| invalid(reply, "L[2] <A MDLN> <A SOFTREV>"))
}

/// S1F3 Selected Equipment Status Request: `L[n] <A SVID>`
pub fn s1f3(names: &[&str]) -> SecsMessage {
    let items: Vec<SecsItem> = names.iter().map(|name| SecsItem::ascii(*name)).collect();
    message(1, 3, true, Some(SecsItem::list(items)))
}

/// Requested variable names; an absent body requests nothing
pub fn parse_s1f3(request: &SecsMessage) -> SecsResult<Vec<String>> {
    expect_function(request, 1, 3)?;
    let Some(body) = request.body.as_ref() else {
        return Ok(Vec::new());
    };
    let items = body.as_list().ok_or_else(|| invalid(request, "L[n] <A SVID>"))?;
    items
        .iter()
        .map(|item| {
            item.as_ascii()
                .map(str::to_string)
                .ok_or_else(|| invalid(request, "ASCII SVID"))
        })
        .collect()
}

/// S1F4 Selected Equipment Status Data
///
/// Unknown variables are reported as a zero-length list.
pub fn s1f4(values: &[Option<StatusValue>]) -> SecsMessage {
    let items: Vec<SecsItem> = values
        .iter()
        .map(|value| match value {
            Some(value) => value.to_secs_item(),
            None => SecsItem::list(Vec::new()),
        })
        .collect();
    message(1, 4, false, Some(SecsItem::list(items)))
}

pub fn parse_s1f4(reply: &SecsMessage) -> SecsResult<Vec<SecsItem>> {
    expect_function(reply, 1, 4)?;
    reply
        .body
        .as_ref()
        .and_then(SecsItem::as_list)
        .map(<[SecsItem]>::to_vec)
        .ok_or_else(|| invalid(reply, "L[n] <SV>"))
}

/// S1F13 Establish Communications Request: `L[0]`
pub fn s1f13() -> SecsMessage {
    message(1, 13, true, Some(SecsItem::list(Vec::new())))
}

/// S1F14 Establish Communications Acknowledge: `L[2] <B COMMACK> L[2] <A MDLN> <A SOFTREV>`
pub fn s1f14(commack: u8, data: &OnlineData) -> SecsMessage {
    let body = SecsItem::list(vec![SecsItem::binary(vec![commack]), data.to_item()]);
    message(1, 14, false, Some(body))
}

/// COMMACK and the peer identification, if it sent one
pub fn parse_s1f14(reply: &SecsMessage) -> SecsResult<(u8, Option<OnlineData>)> {
    expect_function(reply, 1, 14)?;
    let body = reply.body.as_ref().ok_or_else(|| invalid(reply, "a body"))?;
    let commack = body
        .get(0)
        .and_then(SecsItem::first_unsigned)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| invalid(reply, "<B COMMACK>"))?;
    Ok((commack, body.get(1).and_then(OnlineData::from_item)))
}

/// S1F15 Request OFF-LINE
pub fn s1f15() -> SecsMessage {
    message(1, 15, true, None)
}

/// S1F16 OFF-LINE Acknowledge: `<B OFLACK>`
pub fn s1f16(oflack: u8) -> SecsMessage {
    message(1, 16, false, Some(SecsItem::binary(vec![oflack])))
}

/// S1F17 Request ON-LINE
pub fn s1f17() -> SecsMessage {
    message(1, 17, true, None)
}

/// S1F18 ON-LINE Acknowledge: `<B ONLACK>`
pub fn s1f18(onlack: u8) -> SecsMessage {
    message(1, 18, false, Some(SecsItem::binary(vec![onlack])))
}

/// Acknowledge code of a single-item reply (S1F16, S1F18, S5F2, S6F12)
pub fn parse_ack(reply: &SecsMessage) -> SecsResult<u8> {
    reply
        .body
        .as_ref()
        .and_then(SecsItem::first_unsigned)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| invalid(reply, "<B ACK>"))
}

/// S2F17 Date and Time Request
pub fn s2f17() -> SecsMessage {
    message(2, 17, true, None)
}

/// S2F18 Date and Time Data: `<A YYYYMMDDhhmmss>`
pub fn s2f18(time: DateTime<Local>) -> SecsMessage {
    message(2, 18, false, Some(SecsItem::ascii(time.format(CLOCK_FORMAT).to_string())))
}

pub fn parse_s2f18(reply: &SecsMessage) -> SecsResult<NaiveDateTime> {
    expect_function(reply, 2, 18)?;
    let text = reply
        .body
        .as_ref()
        .and_then(SecsItem::as_ascii)
        .ok_or_else(|| invalid(reply, "<A TIME>"))?;
    NaiveDateTime::parse_from_str(text, CLOCK_FORMAT)
        .map_err(|e| SecsError::InvalidData(format!("Invalid time '{}': {}", text, e)))
}

/// Alarm report carried by S5F1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmReport {
    pub alcd: u8,
    pub alid: u32,
    pub text: String,
}

impl AlarmReport {
    /// Bit 8 of ALCD
    pub fn is_set(&self) -> bool {
        self.alcd & 0x80 != 0
    }
}

/// S5F1 Alarm Report Send: `L[3] <B ALCD> <U4 ALID> <A ALTX>`
pub fn s5f1(alarm: &Alarm, set: bool) -> SecsMessage {
    let body = SecsItem::list(vec![
        SecsItem::binary(vec![alarm.alcd(set)]),
        SecsItem::u4(alarm.id),
        SecsItem::ascii(alarm.text.as_str()),
    ]);
    message(5, 1, true, Some(body))
}

pub fn parse_s5f1(request: &SecsMessage) -> SecsResult<AlarmReport> {
    expect_function(request, 5, 1)?;
    let shape = "L[3] <B ALCD> <U4 ALID> <A ALTX>";
    let body = request.body.as_ref().ok_or_else(|| invalid(request, shape))?;
    let alcd = body
        .get(0)
        .and_then(SecsItem::first_unsigned)
        .and_then(|value| u8::try_from(value).ok());
    let alid = body
        .get(1)
        .and_then(SecsItem::first_unsigned)
        .and_then(|value| u32::try_from(value).ok());
    match (alcd, alid, ascii_at(body, 2)) {
        (Some(alcd), Some(alid), Some(text)) => Ok(AlarmReport { alcd, alid, text }),
        _ => Err(invalid(request, shape)),
    }
}

/// S5F2 Alarm Report Acknowledge: `<B ACKC5>`
pub fn s5f2(ackc5: u8) -> SecsMessage {
    message(5, 2, false, Some(SecsItem::binary(vec![ackc5])))
}

/// A report attached to an event: report id and its variable values
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: u32,
    pub values: Vec<SecsItem>,
}

/// Event report carried by S6F11
#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub data_id: u32,
    pub ceid: u32,
    pub reports: Vec<Report>,
}

/// S6F11 Event Report Send
///
/// `L[3] <U4 DATAID> <U4 CEID> L[a] L[2] <U4 RPTID> L[b] <V>`
pub fn s6f11(report: &EventReport) -> SecsMessage {
    let reports: Vec<SecsItem> = report
        .reports
        .iter()
        .map(|r| SecsItem::list(vec![SecsItem::u4(r.id), SecsItem::list(r.values.clone())]))
        .collect();
    let body = SecsItem::list(vec![
        SecsItem::u4(report.data_id),
        SecsItem::u4(report.ceid),
        SecsItem::list(reports),
    ]);
    message(6, 11, true, Some(body))
}

pub fn parse_s6f11(request: &SecsMessage) -> SecsResult<EventReport> {
    expect_function(request, 6, 11)?;
    let shape = "L[3] <U4 DATAID> <U4 CEID> L[a]";
    let body = request.body.as_ref().ok_or_else(|| invalid(request, shape))?;
    let u32_at = |item: &SecsItem, index: usize| {
        item.get(index)
            .and_then(SecsItem::first_unsigned)
            .and_then(|value| u32::try_from(value).ok())
    };
    let (Some(data_id), Some(ceid), Some(entries)) =
        (u32_at(body, 0), u32_at(body, 1), body.get(2).and_then(SecsItem::as_list))
    else {
        return Err(invalid(request, shape));
    };

    let reports = entries
        .iter()
        .map(|entry| {
            let id = u32_at(entry, 0);
            let values = entry.get(1).and_then(SecsItem::as_list);
            match (id, values) {
                (Some(id), Some(values)) => Ok(Report {
                    id,
                    values: values.to_vec(),
                }),
                _ => Err(invalid(request, "L[2] <U4 RPTID> L[b]")),
            }
        })
        .collect::<SecsResult<Vec<_>>>()?;

    Ok(EventReport { data_id, ceid, reports })
}

/// S6F12 Event Report Acknowledge: `<B ACKC6>`
pub fn s6f12(ackc6: u8) -> SecsMessage {
    message(6, 12, false, Some(SecsItem::binary(vec![ackc6])))
}

/// S7F1 Process Program Load Inquire: `L[2] <A PPID> <U4 LENGTH>`
pub fn s7f1(ppid: &str, length: u32) -> SecsMessage {
    let body = SecsItem::list(vec![SecsItem::ascii(ppid), SecsItem::u4(length)]);
    message(7, 1, true, Some(body))
}

/// S9F5 Unrecognized Function Type: `<B MHEAD>`
///
/// # Errors
/// Returns `SecsError::InvalidData` if `mhead` is not a 10-byte header
pub fn s9f5(mhead: &[u8]) -> SecsResult<SecsMessage> {
    if mhead.len() != MHEAD_LEN {
        return Err(SecsError::InvalidData(format!(
            "MHEAD must be {} bytes, got {}",
            MHEAD_LEN,
            mhead.len()
        )));
    }
    Ok(message(9, 5, false, Some(SecsItem::binary(mhead.to_vec()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmSeverity;
    use chrono::TimeZone;

    #[test]
    fn test_s1f1_s1f2() {
        let request = s1f1();
        assert!(request.w_bit);
        assert!(request.body.is_none());

        let reply = s1f2(&OnlineData::new("VIRTUAL_HOST_EQ", "1.0.0"));
        assert!(!reply.w_bit);
        let data = parse_s1f2(&reply).unwrap();
        assert_eq!(data.model_name, "VIRTUAL_HOST_EQ");
        assert_eq!(data.software_revision, "1.0.0");

        assert!(parse_s1f2(&s1f1()).is_err());
        let wrong = message(1, 2, false, Some(SecsItem::ascii("X")));
        assert!(matches!(parse_s1f2(&wrong), Err(SecsError::InvalidData(_))));
    }

    #[test]
    fn test_s1f3_s1f4() {
        let request = s1f3(&["MDLN", "SubstCount"]);
        assert_eq!(parse_s1f3(&request).unwrap(), vec!["MDLN", "SubstCount"]);
        assert!(parse_s1f3(&message(1, 3, true, None)).unwrap().is_empty());

        let reply = s1f4(&[Some(StatusValue::from("EQ")), None, Some(StatusValue::Unsigned(3))]);
        let values = parse_s1f4(&reply).unwrap();
        assert_eq!(values[0], SecsItem::ascii("EQ"));
        assert_eq!(values[1], SecsItem::list(Vec::new()));
        assert_eq!(values[2], SecsItem::u4(3));
    }

    #[test]
    fn test_s1f14() {
        let reply = s1f14(COMMACK_ACCEPTED, &OnlineData::new("EQ", "2.0"));
        let (commack, data) = parse_s1f14(&reply).unwrap();
        assert_eq!(commack, COMMACK_ACCEPTED);
        assert_eq!(data, Some(OnlineData::new("EQ", "2.0")));

        let bare = message(1, 14, false, Some(SecsItem::list(vec![SecsItem::binary(vec![1])])));
        assert_eq!(parse_s1f14(&bare).unwrap(), (COMMACK_DENIED, None));
    }

    #[test]
    fn test_acks() {
        assert_eq!(parse_ack(&s1f16(OFLACK_ACKNOWLEDGED)).unwrap(), 0);
        assert_eq!(parse_ack(&s1f18(ONLACK_ALREADY_ONLINE)).unwrap(), 2);
        assert_eq!(parse_ack(&s6f12(ACK_ACCEPTED)).unwrap(), 0);
        assert!(parse_ack(&s1f17()).is_err());
    }

    #[test]
    fn test_s2f18_clock_format() {
        let time = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let reply = s2f18(time);
        assert_eq!(reply.body, Some(SecsItem::ascii("20240305140709")));
        assert_eq!(parse_s2f18(&reply).unwrap(), time.naive_local());

        let garbage = message(2, 18, false, Some(SecsItem::ascii("yesterday")));
        assert!(parse_s2f18(&garbage).is_err());
    }

    #[test]
    fn test_s5f1_layout() {
        let alarm = Alarm::new(7, "Chamber pressure high", AlarmSeverity::Critical);
        let request = s5f1(&alarm, true);
        assert!(request.w_bit);

        let body = request.body.as_ref().unwrap();
        assert_eq!(body.get(0), Some(&SecsItem::binary(vec![0x82])));
        assert_eq!(body.get(1), Some(&SecsItem::u4(7)));

        let report = parse_s5f1(&request).unwrap();
        assert!(report.is_set());
        assert_eq!(report.alid, 7);
        assert_eq!(report.text, "Chamber pressure high");

        assert!(!parse_s5f1(&s5f1(&alarm, false)).unwrap().is_set());
    }

    #[test]
    fn test_s6f11_reports() {
        let report = EventReport {
            data_id: 1,
            ceid: 3,
            reports: vec![Report {
                id: 100,
                values: vec![SecsItem::ascii("ONLINE"), SecsItem::u4(12)],
            }],
        };
        let request = s6f11(&report);
        assert_eq!((request.stream, request.function, request.w_bit), (6, 11, true));
        assert_eq!(parse_s6f11(&request).unwrap(), report);

        let malformed = message(6, 11, true, Some(SecsItem::list(vec![SecsItem::u4(1)])));
        assert!(parse_s6f11(&malformed).is_err());
    }

    #[test]
    fn test_s7f1_and_s9f5() {
        let request = s7f1("RECIPE_A", 2048);
        assert_eq!(
            request.body,
            Some(SecsItem::list(vec![SecsItem::ascii("RECIPE_A"), SecsItem::u4(2048)]))
        );

        let mhead = [0u8, 1, 0x81, 99, 0, 0, 0, 0, 0, 42];
        let error = s9f5(&mhead).unwrap();
        assert_eq!((error.stream, error.function, error.w_bit), (9, 5, false));
        assert_eq!(error.body, Some(SecsItem::binary(mhead.to_vec())));
        assert!(s9f5(&mhead[..4]).is_err());
    }
}
