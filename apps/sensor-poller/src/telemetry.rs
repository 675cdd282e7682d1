use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// One normalized, timestamped multi-channel sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub channels: BTreeMap<String, f64>,
}

impl Reading {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            channels: BTreeMap::new(),
        }
    }

    pub fn with_channel(mut self, name: impl Into<String>, value: f64) -> Self {
        self.channels.insert(name.into(), value);
        self
    }

    pub fn value(&self, channel: &str) -> Option<f64> {
        self.channels.get(channel).copied()
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        millis_to_dt(self.timestamp)
    }
}

/// A provider field value before channel parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    /// Maps a JSON scalar onto a raw value; objects, arrays, booleans and nulls have no
    /// channel meaning and are skipped.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(num) => num
                .as_i64()
                .map(RawValue::Int)
                .or_else(|| num.as_f64().map(RawValue::Float)),
            JsonValue::String(text) => Some(RawValue::Text(text.clone())),
            _ => None,
        }
    }

    pub fn to_millis(&self) -> Option<i64> {
        match self {
            RawValue::Int(ms) => Some(*ms),
            RawValue::Float(ms) if ms.is_finite() => Some(*ms as i64),
            RawValue::Float(_) => None,
            RawValue::Text(text) => parse_timestamp_text(text),
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// The shape every source adapter emits: a raw timestamp plus provider fields, keyed by
/// the provider's own field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub timestamp: Option<RawValue>,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(timestamp: impl Into<RawValue>) -> Self {
        Self {
            timestamp: Some(timestamp.into()),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Copies every scalar member of a JSON object into the record's fields.
    pub fn extend_from_json(&mut self, object: &serde_json::Map<String, JsonValue>) {
        for (key, value) in object {
            if let Some(raw) = RawValue::from_json(value) {
                self.fields.insert(key.clone(), raw);
            }
        }
    }
}

fn parse_timestamp_text(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp_millis());
    }
    // Weather observation times carry minute precision: 2024-06-30T21:40+08:00
    if let Ok(parsed) = DateTime::<FixedOffset>::parse_from_str(trimmed, "%Y-%m-%dT%H:%M%:z") {
        return Some(parsed.timestamp_millis());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc().timestamp_millis());
    }
    // Daily forecast entries only carry a date; they are stamped at UTC midnight.
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return parsed
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc().timestamp_millis());
    }
    trimmed.parse::<i64>().ok()
}

pub fn millis_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
