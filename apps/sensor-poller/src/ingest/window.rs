use crate::telemetry::Reading;
use serde::Serialize;
use std::fmt;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LookbackWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl LookbackWindow {
    pub const ALL: [LookbackWindow; 5] = [
        LookbackWindow::OneHour,
        LookbackWindow::SixHours,
        LookbackWindow::OneDay,
        LookbackWindow::SevenDays,
        LookbackWindow::ThirtyDays,
    ];

    /// Unknown labels fall back to the six hour default.
    pub fn from_label(label: &str) -> Self {
        Self::parse(label).unwrap_or_default()
    }

    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|window| window.label().eq_ignore_ascii_case(label))
    }

    pub fn label(self) -> &'static str {
        match self {
            LookbackWindow::OneHour => "1h",
            LookbackWindow::SixHours => "6h",
            LookbackWindow::OneDay => "24h",
            LookbackWindow::SevenDays => "7d",
            LookbackWindow::ThirtyDays => "30d",
        }
    }

    pub fn as_millis(self) -> i64 {
        match self {
            LookbackWindow::OneHour => HOUR_MS,
            LookbackWindow::SixHours => 6 * HOUR_MS,
            LookbackWindow::OneDay => 24 * HOUR_MS,
            LookbackWindow::SevenDays => 7 * 24 * HOUR_MS,
            LookbackWindow::ThirtyDays => 30 * 24 * HOUR_MS,
        }
    }
}

impl fmt::Display for LookbackWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returns the suffix of a timestamp-ascending series with `timestamp >= now - lookback_ms`.
pub fn filter_window(series: &[Reading], lookback_ms: i64, now: i64) -> &[Reading] {
    let cutoff = now.saturating_sub(lookback_ms);
    let start = series.partition_point(|reading| reading.timestamp < cutoff);
    &series[start..]
}

pub fn filter_by_label<'a>(series: &'a [Reading], label: &str, now: i64) -> &'a [Reading] {
    filter_window(series, LookbackWindow::from_label(label).as_millis(), now)
}
