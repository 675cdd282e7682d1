use super::classify::{
    classify, classify_aqi, classify_comfort, AirQualityCategory, AlertLevel, ComfortBand,
    ComfortLevel, ThresholdConfig,
};
use crate::error::PipelineError;
use crate::telemetry::Reading;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    fn from_delta(delta: Option<f64>) -> Self {
        match delta {
            Some(value) if value > 0.0 => Trend::Up,
            Some(value) if value < 0.0 => Trend::Down,
            _ => Trend::Flat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub current: f64,
    pub delta: Option<f64>,
    pub average: f64,
    pub alert: AlertLevel,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedSnapshot {
    pub timestamp: i64,
    pub channels: BTreeMap<String, ChannelSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comfort: Option<ComfortLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<AirQualityCategory>,
}

impl DerivedSnapshot {
    pub fn channel(&self, name: &str) -> Option<&ChannelSnapshot> {
        self.channels.get(name)
    }

    /// Most severe per-channel alert, for callers that want a single badge.
    pub fn worst_alert(&self) -> AlertLevel {
        self.channels
            .values()
            .map(|channel| channel.alert)
            .max()
            .unwrap_or(AlertLevel::Normal)
    }
}

/// Derives the snapshot for the latest reading of `series`.
///
/// Averages run over the whole series handed in; deltas compare against
/// `previous_latest`, the last reading of the series this one replaced. Channels without
/// configured thresholds resolve to [`AlertLevel::Normal`].
pub fn derive(
    series: &[Reading],
    previous_latest: Option<&Reading>,
    thresholds: &BTreeMap<String, ThresholdConfig>,
) -> Result<DerivedSnapshot, PipelineError> {
    let latest = series.last().ok_or(PipelineError::EmptySeries)?;

    let mut channels = BTreeMap::new();
    for (name, &current) in &latest.channels {
        let delta = previous_latest
            .and_then(|previous| previous.value(name))
            .map(|previous| current - previous);
        let average = series_average(series, name).unwrap_or(current);
        let alert = thresholds
            .get(name)
            .map(|config| classify(current, config))
            .unwrap_or(AlertLevel::Normal);
        channels.insert(
            name.clone(),
            ChannelSnapshot {
                current,
                delta,
                average,
                alert,
                trend: Trend::from_delta(delta),
            },
        );
    }

    Ok(DerivedSnapshot {
        timestamp: latest.timestamp,
        channels,
        comfort: None,
        air_quality: None,
    })
}

fn series_average(series: &[Reading], channel: &str) -> Option<f64> {
    let (sum, count) = series
        .iter()
        .filter_map(|reading| reading.value(channel))
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Thresholds plus the optional composite rules layered on top of [`derive`].
#[derive(Debug, Clone, Default)]
pub struct MetricEngine {
    pub thresholds: BTreeMap<String, ThresholdConfig>,
    pub comfort: Option<ComfortBand>,
    pub aqi_channel: Option<String>,
}

impl MetricEngine {
    pub fn derive(
        &self,
        series: &[Reading],
        previous_latest: Option<&Reading>,
    ) -> Result<DerivedSnapshot, PipelineError> {
        let mut snapshot = derive(series, previous_latest, &self.thresholds)?;
        // derive() already rejected an empty series
        if let Some(latest) = series.last() {
            snapshot.comfort = self
                .comfort
                .as_ref()
                .and_then(|band| classify_comfort(latest, band, &self.thresholds));
            snapshot.air_quality = self
                .aqi_channel
                .as_deref()
                .and_then(|channel| latest.value(channel))
                .map(classify_aqi);
        }
        Ok(snapshot)
    }
}

/// Signed change with one decimal and a unit suffix, e.g. `+4.0°C`.
pub fn format_change(delta: f64, unit: &str) -> String {
    let sign = if delta > 0.0 { "+" } else { "" };
    format!("{sign}{delta:.1}{unit}")
}
