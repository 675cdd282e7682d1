use super::{read_json, SourceAdapter};
use crate::error::FetchError;
use crate::telemetry::{RawRecord, RawValue};
use reqwest::Client;
use serde_json::Value as JsonValue;

pub const DEFAULT_BASE_URL: &str = "https://devapi.qweather.com/v7";
pub const DEFAULT_GEO_URL: &str = "https://geoapi.qweather.com/v2";

const OK_CODE: &str = "200";

#[derive(Debug, Clone)]
pub struct QWeatherSettings {
    pub base_url: String,
    pub geo_url: String,
    pub api_key: String,
    /// City name, numeric location id, or `lon,lat`.
    pub location: String,
    pub include_air: bool,
    /// Poll the daily forecast instead of current conditions, one record per day.
    pub include_forecast: bool,
}

/// Current conditions for one location, optionally merged with air quality, or the
/// daily forecast as a multi-point series.
pub struct QWeatherSource {
    client: Client,
    settings: QWeatherSettings,
    resolved_location: Option<String>,
}

impl QWeatherSource {
    pub fn new(client: Client, settings: QWeatherSettings) -> Self {
        let resolved_location = if is_direct_location(&settings.location) {
            Some(settings.location.trim().to_string())
        } else {
            None
        };
        Self {
            client,
            settings,
            resolved_location,
        }
    }

    async fn location_id(&mut self) -> Result<String, FetchError> {
        if let Some(id) = &self.resolved_location {
            return Ok(id.clone());
        }
        let url = format!("{}/city/lookup", self.settings.geo_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(&[
                ("location", self.settings.location.as_str()),
                ("key", self.settings.api_key.as_str()),
            ])
            .send()
            .await?;
        let payload = read_json(response).await?;
        let id = lookup_to_location_id(&payload, &self.settings.location)?;
        tracing::info!(location = %self.settings.location, id = %id, "resolved weather location");
        self.resolved_location = Some(id.clone());
        Ok(id)
    }

    async fn get(&self, path: &str, location: &str) -> Result<JsonValue, FetchError> {
        let url = format!("{}/{path}", self.settings.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(&[("location", location), ("key", self.settings.api_key.as_str())])
            .send()
            .await?;
        read_json(response).await
    }
}

impl SourceAdapter for QWeatherSource {
    fn name(&self) -> &'static str {
        "qweather"
    }

    async fn fetch_raw(&mut self) -> Result<Vec<RawRecord>, FetchError> {
        let location = self.location_id().await?;
        if self.settings.include_forecast {
            let forecast = self.get("weather/7d", &location).await?;
            return forecast_to_records(&forecast);
        }
        let weather = self.get("weather/now", &location).await?;
        let mut record = weather_to_record(&weather)?;
        if self.settings.include_air {
            let air = self.get("air/now", &location).await?;
            merge_air(&mut record, &air)?;
        }
        Ok(vec![record])
    }
}

/// Numeric ids and `lon,lat` pairs are accepted by the weather endpoints as-is.
pub fn is_direct_location(location: &str) -> bool {
    let location = location.trim();
    if !location.is_empty() && location.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    match location.split_once(',') {
        Some((lon, lat)) => lon.trim().parse::<f64>().is_ok() && lat.trim().parse::<f64>().is_ok(),
        None => false,
    }
}

fn check_code(payload: &JsonValue) -> Result<(), FetchError> {
    match payload.get("code").and_then(JsonValue::as_str) {
        Some(OK_CODE) => Ok(()),
        Some(code) => Err(FetchError::Provider {
            code: code.to_string(),
        }),
        None => Err(FetchError::Decode("payload has no code".to_string())),
    }
}

pub fn lookup_to_location_id(payload: &JsonValue, query: &str) -> Result<String, FetchError> {
    check_code(payload)?;
    payload
        .get("location")
        .and_then(JsonValue::as_array)
        .and_then(|found| found.first())
        .and_then(|first| first.get("id"))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| FetchError::LocationNotFound(query.to_string()))
}

/// The `now` block becomes a single record stamped with its observation time.
pub fn weather_to_record(payload: &JsonValue) -> Result<RawRecord, FetchError> {
    check_code(payload)?;
    let now = payload
        .get("now")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| FetchError::Decode("weather payload has no now block".to_string()))?;
    let mut record = RawRecord {
        timestamp: now.get("obsTime").and_then(RawValue::from_json),
        ..RawRecord::default()
    };
    record.extend_from_json(now);
    record.fields.remove("obsTime");
    Ok(record)
}

/// Each `daily` entry becomes a record stamped with its `fxDate`.
pub fn forecast_to_records(payload: &JsonValue) -> Result<Vec<RawRecord>, FetchError> {
    check_code(payload)?;
    let daily = payload
        .get("daily")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| FetchError::Decode("forecast payload has no daily array".to_string()))?;
    Ok(daily
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|day| {
            let mut record = RawRecord {
                timestamp: day.get("fxDate").and_then(RawValue::from_json),
                ..RawRecord::default()
            };
            record.extend_from_json(day);
            record.fields.remove("fxDate");
            record
        })
        .collect())
}

pub fn merge_air(record: &mut RawRecord, payload: &JsonValue) -> Result<(), FetchError> {
    check_code(payload)?;
    let now = payload
        .get("now")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| FetchError::Decode("air payload has no now block".to_string()))?;
    for (key, value) in now {
        if key == "pubTime" {
            continue;
        }
        if let Some(raw) = RawValue::from_json(value) {
            record.fields.entry(key.clone()).or_insert(raw);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{normalize, ChannelParser, ChannelSpec};

    fn weather_fixture() -> JsonValue {
        serde_json::json!({
            "code": "200",
            "updateTime": "2024-01-01T18:02+08:00",
            "now": {
                "obsTime": "2024-01-01T18:00+08:00",
                "temp": "24",
                "feelsLike": "26",
                "text": "Cloudy",
                "humidity": "72",
                "windSpeed": "3.5"
            }
        })
    }

    #[test]
    fn classifies_locations() {
        assert!(is_direct_location("101010100"));
        assert!(is_direct_location("116.41,39.92"));
        assert!(!is_direct_location("Beijing"));
        assert!(!is_direct_location(""));
        assert!(!is_direct_location("116.41,north"));
    }

    #[test]
    fn weather_now_becomes_one_record() {
        let record = weather_to_record(&weather_fixture()).expect("record");
        assert_eq!(record.timestamp.as_ref().and_then(RawValue::to_millis), Some(1_704_103_200_000));
        assert_eq!(record.fields.get("temp"), Some(&RawValue::from("24")));
        assert_eq!(record.fields.get("windSpeed"), Some(&RawValue::from("3.5")));
        assert!(!record.fields.contains_key("obsTime"));
    }

    #[test]
    fn air_quality_merges_without_clobbering() {
        let mut record = weather_to_record(&weather_fixture()).expect("record");
        let air = serde_json::json!({
            "code": "200",
            "now": { "pubTime": "2024-01-01T18:00+08:00", "aqi": "46", "category": "Excellent", "temp": "99" }
        });
        merge_air(&mut record, &air).expect("merge");
        assert_eq!(record.fields.get("aqi"), Some(&RawValue::from("46")));
        assert_eq!(record.fields.get("temp"), Some(&RawValue::from("24")));
        assert!(!record.fields.contains_key("pubTime"));
    }

    #[test]
    fn daily_forecast_becomes_a_series() {
        let payload = serde_json::json!({
            "code": "200",
            "daily": [
                { "fxDate": "2024-01-01", "tempMax": "8", "tempMin": "-3", "humidity": "40", "textDay": "Sunny" },
                { "fxDate": "2024-01-02", "tempMax": "6", "tempMin": "-5", "humidity": "35" },
                { "fxDate": "2024-01-03", "tempMax": "9", "tempMin": "-1", "humidity": "52" }
            ]
        });
        let records = forecast_to_records(&payload).expect("records");
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[1].timestamp.as_ref().and_then(RawValue::to_millis),
            Some(1_704_153_600_000)
        );
        assert_eq!(records[0].fields.get("tempMin"), Some(&RawValue::from("-3")));
        assert!(!records[0].fields.contains_key("fxDate"));

        let channels = vec![
            ChannelSpec::new("temperature", "tempMax", ChannelParser::Float, "°C"),
            ChannelSpec::new("temperatureMin", "tempMin", ChannelParser::Float, "°C"),
            ChannelSpec::new("humidity", "humidity", ChannelParser::Integer, "%"),
        ];
        let readings = normalize(&records, &channels);
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[2].value("temperature"), Some(9.0));
        assert_eq!(readings[2].value("temperatureMin"), Some(-1.0));
    }

    #[test]
    fn forecast_without_daily_is_a_decode_error() {
        let err = forecast_to_records(&serde_json::json!({ "code": "200" })).expect_err("no daily");
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn provider_codes_fail_the_fetch() {
        let err = weather_to_record(&serde_json::json!({ "code": "401" })).expect_err("unauthorized");
        assert!(matches!(err, FetchError::Provider { ref code } if code == "401"));
    }

    #[test]
    fn lookup_picks_first_location() {
        let payload = serde_json::json!({
            "code": "200",
            "location": [
                { "name": "Beijing", "id": "101010100", "adm1": "Beijing" },
                { "name": "Beijing West", "id": "101010200" }
            ]
        });
        assert_eq!(
            lookup_to_location_id(&payload, "Beijing").expect("id"),
            "101010100"
        );
        let empty = serde_json::json!({ "code": "200", "location": [] });
        assert!(matches!(
            lookup_to_location_id(&empty, "Atlantis"),
            Err(FetchError::LocationNotFound(_))
        ));
    }
}
