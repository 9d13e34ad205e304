//! Record encoders.
//!
//! Both encoders turn one [`LogRecord`] into exactly one newline-terminated
//! line, so a sink write always carries a whole record and nothing else.

use chrono::{DateTime, SecondsFormat, Utc};
use colored::Colorize;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write as _;

use crate::record::{FieldValue, LogRecord, Severity};

pub const TIME_KEY: &str = "time";
pub const LEVEL_KEY: &str = "level";
pub const CALLER_KEY: &str = "caller";
pub const MESSAGE_KEY: &str = "msg";

/// ISO-8601 timestamp with millisecond precision, e.g. `2026-10-19T08:30:00.125Z`.
pub fn iso8601(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Stateless transform from a record to the bytes of one line.
pub trait Encoder: Send + Sync {
    fn encode(&self, record: &LogRecord) -> Vec<u8>;
}

/// Encoder selection used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Console,
    Json,
}

impl EncoderKind {
    pub fn build(self, color: bool) -> Box<dyn Encoder> {
        match self {
            EncoderKind::Console => Box::new(ConsoleEncoder::new(color)),
            EncoderKind::Json => Box::new(JsonEncoder),
        }
    }
}

/// Human-readable, tab-separated layout:
/// `time  LEVEL  caller  message  key=value ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleEncoder {
    color: bool,
}

impl ConsoleEncoder {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn level(&self, severity: Severity) -> String {
        let name = severity.capital();
        if !self.color {
            return name.to_string();
        }
        match severity {
            Severity::Debug => name.magenta().to_string(),
            Severity::Info => name.blue().to_string(),
            Severity::Warn => name.yellow().to_string(),
            Severity::Error | Severity::Fatal => name.red().to_string(),
        }
    }
}

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"' || c.is_control())
}

/// Quote keys that would otherwise break the `key=value` layout.
fn console_key(key: &str) -> Cow<'_, str> {
    if needs_quotes(key) {
        Cow::Owned(format!("{:?}", key))
    } else {
        Cow::Borrowed(key)
    }
}

/// Quote values that would otherwise break the `key=value` layout.
fn console_value(value: &FieldValue) -> String {
    let text = value.to_string();
    if matches!(value, FieldValue::Str(_)) && needs_quotes(&text) {
        format!("{:?}", text)
    } else {
        text
    }
}

impl Encoder for ConsoleEncoder {
    fn encode(&self, record: &LogRecord) -> Vec<u8> {
        let mut line = String::with_capacity(128);
        line.push_str(&iso8601(&record.timestamp));
        line.push('\t');
        line.push_str(&self.level(record.severity));
        if let Some(caller) = &record.caller {
            line.push('\t');
            line.push_str(&caller.short());
        }
        line.push('\t');
        // Embedded newlines would split the record across lines.
        line.push_str(&record.message.replace('\n', "\\n"));

        for (idx, field) in record.fields.iter().enumerate() {
            line.push(if idx == 0 { '\t' } else { ' ' });
            let _ = write!(
                line,
                "{}={}",
                console_key(&field.key),
                console_value(&field.value)
            );
        }
        line.push('\n');
        line.into_bytes()
    }
}

/// One JSON object per line with stable lowercase keys:
/// `time`, `level`, `caller`, `msg`, then every attached field in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

struct JsonLine<'a>(&'a LogRecord);

impl Serialize for JsonLine<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = self.0;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(TIME_KEY, &iso8601(&record.timestamp))?;
        map.serialize_entry(LEVEL_KEY, record.severity.as_str())?;
        if let Some(caller) = &record.caller {
            map.serialize_entry(CALLER_KEY, &caller.short())?;
        }
        map.serialize_entry(MESSAGE_KEY, &record.message)?;
        for field in &record.fields {
            map.serialize_entry(field.key.as_ref(), &field.value)?;
        }
        map.end()
    }
}

impl Encoder for JsonEncoder {
    fn encode(&self, record: &LogRecord) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        match serde_json::to_writer(&mut buf, &JsonLine(record)) {
            Ok(()) => {}
            Err(e) => {
                // Keep the line parseable even if a field refused to serialize.
                buf.clear();
                let fallback = serde_json::json!({
                    "time": iso8601(&record.timestamp),
                    "level": record.severity.as_str(),
                    "msg": record.message,
                    "encode_error": e.to_string(),
                });
                buf.extend_from_slice(fallback.to_string().as_bytes());
            }
        }
        buf.push(b'\n');
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Caller, Field};
    use chrono::TimeZone;
    use std::time::Duration;

    fn sample() -> LogRecord {
        LogRecord::new(Severity::Info, "request")
            .at(Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap())
            .with_caller(Caller::new("/work/app/src/instrument.rs", 42))
            .with_fields([
                Field::duration("latency", Duration::from_millis(50)),
                Field::str("method", "GET"),
                Field::int("status", 200),
            ])
    }

    #[test]
    fn test_iso8601_millis_utc() {
        let t = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(iso8601(&t), "2026-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_console_layout() {
        let line = String::from_utf8(ConsoleEncoder::new(false).encode(&sample())).unwrap();
        assert_eq!(
            line,
            "2026-10-19T08:30:00.000Z\tINFO\tsrc/instrument.rs:42\trequest\tlatency=50ms method=GET status=200\n"
        );
    }

    #[test]
    fn test_console_quotes_values_with_spaces() {
        let record = LogRecord::new(Severity::Warn, "x").with_fields([Field::str("reason", "bad input")]);
        let line = String::from_utf8(ConsoleEncoder::new(false).encode(&record)).unwrap();
        assert!(line.ends_with("\treason=\"bad input\"\n"));
    }

    #[test]
    fn test_console_quotes_unsafe_keys() {
        let record = LogRecord::new(Severity::Warn, "x").with_fields([
            Field::str("user id", "7"),
            Field::str("a=b", "c"),
            Field::str("line\nbreak", "d"),
            Field::str("plain", "e"),
        ]);
        let line = String::from_utf8(ConsoleEncoder::new(false).encode(&record)).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with("\t\"user id\"=7 \"a=b\"=c \"line\\nbreak\"=d plain=e\n"));
    }

    #[test]
    fn test_console_single_line_for_multiline_message() {
        let record = LogRecord::new(Severity::Error, "first\nsecond");
        let line = ConsoleEncoder::new(false).encode(&record);
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_json_layout() {
        let line = String::from_utf8(JsonEncoder.encode(&sample())).unwrap();
        assert_eq!(
            line,
            "{\"time\":\"2026-10-19T08:30:00.000Z\",\"level\":\"info\",\"caller\":\"src/instrument.rs:42\",\"msg\":\"request\",\"latency\":50000000,\"method\":\"GET\",\"status\":200}\n"
        );
    }

    #[test]
    fn test_json_parses_back() {
        let record = sample().with_fields([Field::bool("cached", true), Field::float("ratio", 0.5)]);
        let line = JsonEncoder.encode(&record);
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["level"], "info");
        assert_eq!(value["msg"], "request");
        assert_eq!(value["method"], "GET");
        assert_eq!(value["status"], 200);
        assert_eq!(value["latency"], 50_000_000u64);
        assert_eq!(value["cached"], true);
        assert_eq!(value["ratio"], 0.5);
    }

    #[test]
    fn test_json_escapes_newlines() {
        let record = LogRecord::new(Severity::Debug, "a\nb");
        let line = JsonEncoder.encode(&record);
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_json_omits_missing_caller() {
        let record = LogRecord::new(Severity::Debug, "no caller");
        let value: serde_json::Value = serde_json::from_slice(&JsonEncoder.encode(&record)).unwrap();
        assert!(value.get("caller").is_none());
    }

    #[test]
    fn test_encoder_kind_from_config() {
        let kind: EncoderKind = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(kind, EncoderKind::Json);
    }
}
