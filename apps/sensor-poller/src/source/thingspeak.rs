use super::{read_json, SourceAdapter};
use crate::error::FetchError;
use crate::telemetry::{RawRecord, RawValue};
use reqwest::Client;
use serde_json::Value as JsonValue;

pub const DEFAULT_BASE_URL: &str = "https://api.thingspeak.com";

#[derive(Debug, Clone)]
pub struct ThingSpeakSettings {
    pub base_url: String,
    pub channel_id: String,
    pub read_key: Option<String>,
    pub results: usize,
}

/// Reads the most recent rows of a cloud IoT channel feed.
pub struct ThingSpeakSource {
    client: Client,
    settings: ThingSpeakSettings,
}

impl ThingSpeakSource {
    pub fn new(client: Client, settings: ThingSpeakSettings) -> Self {
        Self { client, settings }
    }

    fn feed_url(&self) -> String {
        format!(
            "{}/channels/{}/feeds.json",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.channel_id
        )
    }
}

impl SourceAdapter for ThingSpeakSource {
    fn name(&self) -> &'static str {
        "thingspeak"
    }

    async fn fetch_raw(&mut self) -> Result<Vec<RawRecord>, FetchError> {
        let mut query = vec![("results", self.settings.results.to_string())];
        if let Some(key) = &self.settings.read_key {
            query.push(("api_key", key.clone()));
        }
        let response = self.client.get(self.feed_url()).query(&query).send().await?;
        let payload = read_json(response).await?;
        feed_to_records(&payload)
    }
}

/// Each feed row becomes one record stamped with `created_at`; every other scalar member
/// (`field1`..`field8`, `entry_id`) is kept under its own name.
pub fn feed_to_records(payload: &JsonValue) -> Result<Vec<RawRecord>, FetchError> {
    let feeds = payload
        .get("feeds")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| FetchError::Decode("payload has no feeds array".to_string()))?;

    Ok(feeds
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|row| {
            let mut record = RawRecord {
                timestamp: row.get("created_at").and_then(RawValue::from_json),
                ..RawRecord::default()
            };
            record.extend_from_json(row);
            record.fields.remove("created_at");
            record
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{normalize, ChannelParser, ChannelSpec};

    #[test]
    fn converts_feed_rows() {
        let payload = serde_json::json!({
            "channel": { "id": 12345, "name": "greenhouse" },
            "feeds": [
                { "created_at": "2024-01-01T10:00:00Z", "entry_id": 1, "field1": "20.15", "field2": "55.4", "field3": "12" },
                { "created_at": "2024-01-01T10:10:00Z", "entry_id": 2, "field1": "20.3", "field2": null, "field3": "12" },
                { "entry_id": 3, "field1": "21.0", "field2": "56", "field3": "13" }
            ]
        });
        let records = feed_to_records(&payload).expect("records");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].fields.get("field1"), Some(&RawValue::from("20.15")));
        assert!(!records[0].fields.contains_key("created_at"));
        assert!(records[2].timestamp.is_none());

        let channels = vec![
            ChannelSpec::new("temperature", "field1", ChannelParser::Float, "°C"),
            ChannelSpec::new("humidity", "field2", ChannelParser::Float, "%"),
            ChannelSpec::new("waterLevel", "field3", ChannelParser::Float, "cm"),
        ];
        let readings = normalize(&records, &channels);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].timestamp, 1_704_103_200_000);
        assert_eq!(readings[0].value("waterLevel"), Some(12.0));
    }

    #[test]
    fn missing_feeds_is_a_decode_error() {
        let err = feed_to_records(&serde_json::json!({ "status": "-1" })).expect_err("no feeds");
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
