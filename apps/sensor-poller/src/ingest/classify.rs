use crate::telemetry::Reading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Warning,
    Danger,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct InvalidThresholds {
    message: String,
}

/// Bounds as they appear in settings files, before ordering is checked.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ThresholdBounds {
    #[serde(alias = "dangerLow")]
    pub danger_low: f64,
    #[serde(alias = "warningLow")]
    pub warning_low: f64,
    #[serde(alias = "warningHigh")]
    pub warning_high: f64,
    #[serde(alias = "dangerHigh")]
    pub danger_high: f64,
}

/// Per-channel alert bounds, guaranteed `danger_low <= warning_low <= warning_high <= danger_high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdConfig {
    danger_low: f64,
    warning_low: f64,
    warning_high: f64,
    danger_high: f64,
}

impl ThresholdConfig {
    pub fn new(
        danger_low: f64,
        warning_low: f64,
        warning_high: f64,
        danger_high: f64,
    ) -> Result<Self, InvalidThresholds> {
        let named = [
            ("dangerLow", danger_low),
            ("warningLow", warning_low),
            ("warningHigh", warning_high),
            ("dangerHigh", danger_high),
        ];
        if let Some((name, value)) = named.iter().find(|(_, value)| !value.is_finite()) {
            return Err(InvalidThresholds {
                message: format!("{name} must be a finite number, got {value}"),
            });
        }
        for pair in named.windows(2) {
            let (lower_name, lower) = pair[0];
            let (upper_name, upper) = pair[1];
            if lower > upper {
                return Err(InvalidThresholds {
                    message: format!(
                        "{lower_name} ({lower}) must not exceed {upper_name} ({upper})"
                    ),
                });
            }
        }
        Ok(Self {
            danger_low,
            warning_low,
            warning_high,
            danger_high,
        })
    }

    pub fn danger_low(&self) -> f64 {
        self.danger_low
    }

    pub fn warning_low(&self) -> f64 {
        self.warning_low
    }

    pub fn warning_high(&self) -> f64 {
        self.warning_high
    }

    pub fn danger_high(&self) -> f64 {
        self.danger_high
    }

    fn breaches_danger(&self, value: f64) -> bool {
        value <= self.danger_low || value >= self.danger_high
    }

    fn breaches_warning(&self, value: f64) -> bool {
        value <= self.warning_low || value >= self.warning_high
    }
}

impl TryFrom<ThresholdBounds> for ThresholdConfig {
    type Error = InvalidThresholds;

    fn try_from(bounds: ThresholdBounds) -> Result<Self, Self::Error> {
        ThresholdConfig::new(
            bounds.danger_low,
            bounds.warning_low,
            bounds.warning_high,
            bounds.danger_high,
        )
    }
}

/// Bounds are inclusive on the alerting side: a value sitting exactly on `warning_high`
/// is a warning, on `danger_high` a danger.
pub fn classify(value: f64, config: &ThresholdConfig) -> AlertLevel {
    if value.is_nan() || config.breaches_danger(value) {
        AlertLevel::Danger
    } else if config.breaches_warning(value) {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComfortLevel {
    Comfortable,
    Moderate,
    Uncomfortable,
}

/// Joint temperature/humidity band; both bounds inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComfortBand {
    #[serde(default = "default_temperature_channel")]
    pub temperature_channel: String,
    #[serde(default = "default_humidity_channel")]
    pub humidity_channel: String,
    #[serde(default = "default_temperature_low")]
    pub temperature_low: f64,
    #[serde(default = "default_temperature_high")]
    pub temperature_high: f64,
    #[serde(default = "default_humidity_low")]
    pub humidity_low: f64,
    #[serde(default = "default_humidity_high")]
    pub humidity_high: f64,
}

fn default_temperature_channel() -> String {
    "temperature".to_string()
}

fn default_humidity_channel() -> String {
    "humidity".to_string()
}

fn default_temperature_low() -> f64 {
    18.0
}

fn default_temperature_high() -> f64 {
    26.0
}

fn default_humidity_low() -> f64 {
    40.0
}

fn default_humidity_high() -> f64 {
    60.0
}

impl Default for ComfortBand {
    fn default() -> Self {
        Self {
            temperature_channel: default_temperature_channel(),
            humidity_channel: default_humidity_channel(),
            temperature_low: default_temperature_low(),
            temperature_high: default_temperature_high(),
            humidity_low: default_humidity_low(),
            humidity_high: default_humidity_high(),
        }
    }
}

impl ComfortBand {
    /// Both ranges must be finite with `low <= high`.
    pub fn check(&self) -> Result<(), InvalidThresholds> {
        let ranges = [
            ("temperature", self.temperature_low, self.temperature_high),
            ("humidity", self.humidity_low, self.humidity_high),
        ];
        for (name, low, high) in ranges {
            if !low.is_finite() || !high.is_finite() {
                return Err(InvalidThresholds {
                    message: format!("{name} range must be finite, got {low}..={high}"),
                });
            }
            if low > high {
                return Err(InvalidThresholds {
                    message: format!("{name} low ({low}) must not exceed high ({high})"),
                });
            }
        }
        Ok(())
    }
}

/// Three-way ladder: inside the joint band is comfortable, a danger breach on either
/// channel is uncomfortable, anything else is moderate. Returns `None` when the reading
/// lacks either channel.
pub fn classify_comfort(
    reading: &Reading,
    band: &ComfortBand,
    thresholds: &BTreeMap<String, ThresholdConfig>,
) -> Option<ComfortLevel> {
    let temperature = reading.value(&band.temperature_channel)?;
    let humidity = reading.value(&band.humidity_channel)?;

    let temperature_ok = (band.temperature_low..=band.temperature_high).contains(&temperature);
    let humidity_ok = (band.humidity_low..=band.humidity_high).contains(&humidity);
    if temperature_ok && humidity_ok {
        return Some(ComfortLevel::Comfortable);
    }

    let in_danger = |channel: &str, value: f64| {
        thresholds
            .get(channel)
            .map(|config| classify(value, config) == AlertLevel::Danger)
            .unwrap_or(false)
    };
    if in_danger(&band.temperature_channel, temperature)
        || in_danger(&band.humidity_channel, humidity)
    {
        return Some(ComfortLevel::Uncomfortable);
    }

    Some(ComfortLevel::Moderate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirQualityCategory {
    Excellent,
    Good,
    LightlyPolluted,
    ModeratelyPolluted,
    HeavilyPolluted,
    SeverelyPolluted,
}

pub fn classify_aqi(aqi: f64) -> AirQualityCategory {
    if aqi <= 50.0 {
        AirQualityCategory::Excellent
    } else if aqi <= 100.0 {
        AirQualityCategory::Good
    } else if aqi <= 150.0 {
        AirQualityCategory::LightlyPolluted
    } else if aqi <= 200.0 {
        AirQualityCategory::ModeratelyPolluted
    } else if aqi <= 300.0 {
        AirQualityCategory::HeavilyPolluted
    } else {
        AirQualityCategory::SeverelyPolluted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn temperature_bounds() -> ThresholdConfig {
        ThresholdConfig::new(10.0, 15.0, 30.0, 35.0).expect("valid bounds")
    }

    #[test]
    fn boundaries_fail_toward_caution() {
        let cfg = temperature_bounds();
        assert_eq!(classify(30.0, &cfg), AlertLevel::Warning);
        assert_eq!(classify(15.0, &cfg), AlertLevel::Warning);
        assert_eq!(classify(35.0, &cfg), AlertLevel::Danger);
        assert_eq!(classify(10.0, &cfg), AlertLevel::Danger);
        assert_eq!(classify(22.5, &cfg), AlertLevel::Normal);
        assert_eq!(classify(f64::NAN, &cfg), AlertLevel::Danger);
    }

    #[test]
    fn rejects_misordered_bounds() {
        let err = ThresholdConfig::new(10.0, 31.0, 30.0, 35.0).expect_err("misordered");
        assert!(err.to_string().contains("warningLow"));
        assert!(ThresholdConfig::new(f64::NAN, 15.0, 30.0, 35.0).is_err());
        assert!(ThresholdConfig::new(20.0, 20.0, 20.0, 20.0).is_ok());
    }

    #[test]
    fn comfort_ladder() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("temperature".to_string(), temperature_bounds());
        thresholds.insert(
            "humidity".to_string(),
            ThresholdConfig::new(30.0, 40.0, 70.0, 80.0).expect("valid bounds"),
        );
        let band = ComfortBand::default();
        let reading = |t: f64, h: f64| {
            Reading::new(0)
                .with_channel("temperature", t)
                .with_channel("humidity", h)
        };

        assert_eq!(
            classify_comfort(&reading(22.0, 50.0), &band, &thresholds),
            Some(ComfortLevel::Comfortable)
        );
        assert_eq!(
            classify_comfort(&reading(18.0, 60.0), &band, &thresholds),
            Some(ComfortLevel::Comfortable)
        );
        assert_eq!(
            classify_comfort(&reading(28.0, 50.0), &band, &thresholds),
            Some(ComfortLevel::Moderate)
        );
        assert_eq!(
            classify_comfort(&reading(22.0, 80.0), &band, &thresholds),
            Some(ComfortLevel::Uncomfortable)
        );
        assert_eq!(
            classify_comfort(&reading(9.0, 50.0), &band, &thresholds),
            Some(ComfortLevel::Uncomfortable)
        );
        let partial = Reading::new(0).with_channel("temperature", 22.0);
        assert_eq!(classify_comfort(&partial, &band, &thresholds), None);
    }

    #[test]
    fn aqi_ladder() {
        assert_eq!(classify_aqi(50.0), AirQualityCategory::Excellent);
        assert_eq!(classify_aqi(51.0), AirQualityCategory::Good);
        assert_eq!(classify_aqi(150.0), AirQualityCategory::LightlyPolluted);
        assert_eq!(classify_aqi(200.0), AirQualityCategory::ModeratelyPolluted);
        assert_eq!(classify_aqi(300.0), AirQualityCategory::HeavilyPolluted);
        assert_eq!(classify_aqi(301.0), AirQualityCategory::SeverelyPolluted);
    }

    fn ordered_bounds() -> impl Strategy<Value = ThresholdConfig> {
        prop::collection::vec(-1000.0f64..1000.0, 4).prop_map(|mut bounds| {
            bounds.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
            ThresholdConfig::new(bounds[0], bounds[1], bounds[2], bounds[3]).expect("sorted")
        })
    }

    proptest! {
        #[test]
        fn severity_never_drops_moving_away_from_band(
            cfg in ordered_bounds(),
            offset in 0.001f64..500.0,
            step in 0.0f64..500.0,
        ) {
            let above_near = cfg.warning_high() + offset;
            let above_far = above_near + step;
            prop_assert!(classify(above_far, &cfg) >= classify(above_near, &cfg));

            let below_near = cfg.warning_low() - offset;
            let below_far = below_near - step;
            prop_assert!(classify(below_far, &cfg) >= classify(below_near, &cfg));
        }

        #[test]
        fn midpoint_of_open_band_is_normal(cfg in ordered_bounds()) {
            prop_assume!(cfg.warning_high() - cfg.warning_low() > 1e-6);
            let midpoint = (cfg.warning_low() + cfg.warning_high()) / 2.0;
            prop_assert_eq!(classify(midpoint, &cfg), AlertLevel::Normal);
        }
    }
}
