use crate::telemetry::{RawRecord, RawValue, Reading};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelParser {
    #[default]
    Float,
    /// Truncates toward zero, matching integer-string provider fields.
    Integer,
}

impl ChannelParser {
    pub fn parse(self, raw: &RawValue) -> Option<f64> {
        let value = match raw {
            RawValue::Int(value) => *value as f64,
            RawValue::Float(value) => *value,
            RawValue::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        if !value.is_finite() {
            return None;
        }
        match self {
            ChannelParser::Float => Some(value),
            ChannelParser::Integer => Some(value.trunc()),
        }
    }
}

/// Declares where a channel lives in the provider payload and how to parse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub field: String,
    #[serde(default)]
    pub parser: ChannelParser,
    #[serde(default)]
    pub unit: String,
}

impl ChannelSpec {
    pub fn new(name: &str, field: &str, parser: ChannelParser, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            parser,
            unit: unit.to_string(),
        }
    }
}

/// Converts raw records into readings, preserving input order. A record with an
/// unparseable timestamp or any unparseable channel is dropped whole.
pub fn normalize(raw: &[RawRecord], channels: &[ChannelSpec]) -> Vec<Reading> {
    let readings: Vec<Reading> = raw
        .iter()
        .filter_map(|record| normalize_record(record, channels))
        .collect();

    let dropped = raw.len() - readings.len();
    if dropped > 0 {
        tracing::debug!(
            dropped,
            kept = readings.len(),
            "dropped malformed records during normalization"
        );
    }
    readings
}

fn normalize_record(record: &RawRecord, channels: &[ChannelSpec]) -> Option<Reading> {
    let timestamp = record.timestamp.as_ref()?.to_millis()?;
    let mut reading = Reading::new(timestamp);
    for spec in channels {
        let value = spec.parser.parse(record.fields.get(&spec.field)?)?;
        reading.channels.insert(spec.name.clone(), value);
    }
    Some(reading)
}
