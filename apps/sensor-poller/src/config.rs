use crate::export::TimeLabel;
use crate::ingest::{
    ChannelParser, ChannelSpec, ComfortBand, InvalidThresholds, LookbackWindow, MetricEngine,
    RetentionPolicy, ThresholdBounds, ThresholdConfig,
};
use crate::pipeline::SchedulerSettings;
use crate::source::{
    qweather, thingspeak, QWeatherSettings, SimulatedSettings, SourceSettings, ThingSpeakSettings,
};
use chrono::format::{Item, StrftimeItems};
use chrono::FixedOffset;
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid thresholds for channel {channel}: {source}")]
    InvalidThresholds {
        channel: String,
        source: InvalidThresholds,
    },
    #[error("invalid config value: {0}")]
    Validation(String),
}

/// Optional JSON settings file. Structured settings (channels, thresholds, comfort band)
/// only live here; scalars may also come from the environment, which wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub channels: Option<Vec<ChannelSpec>>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdBounds>,
    #[serde(default)]
    pub comfort: Option<ComfortBand>,
    #[serde(default)]
    pub aqi_channel: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub notice_ms: Option<u64>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub retention: Option<String>,
    #[serde(default)]
    pub retention_max: Option<usize>,
}

pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let contents = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut bytes = contents;
    simd_json::serde::from_slice(&mut bytes).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source: SourceSettings,
    pub channels: Vec<ChannelSpec>,
    pub thresholds: BTreeMap<String, ThresholdConfig>,
    pub comfort: Option<ComfortBand>,
    pub aqi_channel: Option<String>,
    pub poll_interval_ms: u64,
    pub notice_ms: u64,
    pub window: LookbackWindow,
    pub retention: RetentionPolicy,
    pub prime: bool,
    pub http_timeout_secs: u64,
    pub snapshot_path: Option<PathBuf>,
    pub time_format: String,
    pub utc_offset_minutes: i32,
}

impl Config {
    /// Loads `.env`, the optional settings file, and `POLLER_*` variables, then validates.
    pub fn from_env(settings_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv().ok();

        let settings_path = settings_path.map(Path::to_path_buf).or_else(|| {
            env_value(|key| env::var(key).ok(), "POLLER_SETTINGS_PATH").map(PathBuf::from)
        });
        let settings = match settings_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading settings file");
                Some(load_settings_file(&path)?)
            }
            None => None,
        };

        Self::from_lookup(|key| env::var(key).ok(), settings)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        settings: Option<SettingsFile>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| env_value(&lookup, key);
        let settings = settings.unwrap_or_default();

        let source = source_from_lookup(&get)?;
        let channels = settings
            .channels
            .clone()
            .unwrap_or_else(|| default_channels(&source));

        let mut thresholds = BTreeMap::new();
        for (channel, bounds) in default_thresholds() {
            if channels.iter().any(|spec| spec.name == channel) {
                thresholds.insert(channel.to_string(), bounds);
            }
        }
        for (channel, bounds) in settings.thresholds.clone() {
            let config = ThresholdConfig::try_from(bounds).map_err(|source| {
                ConfigError::InvalidThresholds {
                    channel: channel.clone(),
                    source,
                }
            })?;
            thresholds.insert(channel, config);
        }

        let has_channel = |name: &str| channels.iter().any(|spec| spec.name == name);
        let comfort = settings.comfort.clone().or_else(|| {
            let band = ComfortBand::default();
            (has_channel(band.temperature_channel.as_str())
                && has_channel(band.humidity_channel.as_str()))
                .then_some(band)
        });
        let aqi_channel = settings
            .aqi_channel
            .clone()
            .or_else(|| has_channel("aqi").then(|| "aqi".to_string()));

        let poll_interval_ms = parse_or(&get, "POLLER_POLL_INTERVAL_MS")
            .or(settings.poll_interval_ms)
            .unwrap_or(60_000);
        let notice_ms = parse_or(&get, "POLLER_NOTICE_MS")
            .or(settings.notice_ms)
            .unwrap_or(3_000);

        let window_label = get("POLLER_WINDOW")
            .or(settings.window.clone())
            .unwrap_or_else(|| LookbackWindow::default().label().to_string());
        let window = window_from_label(&window_label);

        let retention_max = parse_or::<usize>(&get, "POLLER_RETENTION_MAX")
            .or(settings.retention_max)
            .map(|max| {
                NonZeroUsize::new(max).ok_or_else(|| {
                    ConfigError::Validation(
                        "POLLER_RETENTION_MAX must be greater than 0".to_string(),
                    )
                })
            })
            .transpose()?;
        let retention = match get("POLLER_RETENTION")
            .or(settings.retention.clone())
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("replace") => RetentionPolicy::Replace,
            Some("accumulate") => RetentionPolicy::Accumulate {
                max_readings: retention_max,
            },
            Some(other) => {
                return Err(ConfigError::Validation(format!(
                    "POLLER_RETENTION must be replace or accumulate, got {other}"
                )))
            }
        };

        let prime = get("POLLER_PRIME").map(|v| parse_bool(&v)).unwrap_or(true);
        let http_timeout_secs = parse_or(&get, "POLLER_HTTP_TIMEOUT_SECS").unwrap_or(12);
        let snapshot_path = get("POLLER_SNAPSHOT_PATH").map(PathBuf::from);
        let time_format = get("POLLER_TIME_FORMAT").unwrap_or_else(|| "%H:%M".to_string());
        let utc_offset_minutes = parse_or(&get, "POLLER_UTC_OFFSET_MINUTES").unwrap_or(0);

        let config = Self {
            source,
            channels,
            thresholds,
            comfort,
            aqi_channel,
            poll_interval_ms,
            notice_ms,
            window,
            retention,
            prime,
            http_timeout_secs,
            snapshot_path,
            time_format,
            utc_offset_minutes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        if self.notice_ms == 0 {
            return Err(ConfigError::Validation(
                "notice duration must be greater than 0".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "POLLER_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.channels.is_empty() {
            return Err(ConfigError::Validation(
                "at least one channel must be configured".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for spec in &self.channels {
            if spec.name.trim().is_empty() || spec.field.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "channel name and field must not be empty".to_string(),
                ));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "channel {} is configured twice",
                    spec.name
                )));
            }
        }
        if let Some(channel) = self.thresholds.keys().find(|name| !names.contains(name.as_str())) {
            return Err(ConfigError::Validation(format!(
                "thresholds reference unknown channel {channel}"
            )));
        }
        if let Some(band) = &self.comfort {
            band.check()
                .map_err(|err| ConfigError::Validation(format!("comfort band: {err}")))?;
            for channel in [&band.temperature_channel, &band.humidity_channel] {
                if !names.contains(channel.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "comfort band references unknown channel {channel}"
                    )));
                }
            }
        }
        if let Some(channel) = &self.aqi_channel {
            if !names.contains(channel.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "aqi_channel references unknown channel {channel}"
                )));
            }
        }

        if StrftimeItems::new(&self.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Validation(format!(
                "POLLER_TIME_FORMAT {:?} is not a valid strftime format",
                self.time_format
            )));
        }
        if self.utc_offset().is_none() {
            return Err(ConfigError::Validation(format!(
                "POLLER_UTC_OFFSET_MINUTES {} is out of range",
                self.utc_offset_minutes
            )));
        }

        match &self.source {
            SourceSettings::Simulated(_) => {}
            SourceSettings::ThingSpeak(settings) => {
                if settings.channel_id.is_empty() {
                    return Err(ConfigError::Validation(
                        "POLLER_THINGSPEAK_CHANNEL is required for the thingspeak source"
                            .to_string(),
                    ));
                }
                if settings.results == 0 {
                    return Err(ConfigError::Validation(
                        "POLLER_THINGSPEAK_RESULTS must be greater than 0".to_string(),
                    ));
                }
            }
            SourceSettings::QWeather(settings) => {
                if settings.api_key.is_empty() {
                    return Err(ConfigError::Validation(
                        "POLLER_QWEATHER_KEY is required for the qweather source".to_string(),
                    ));
                }
                if settings.location.is_empty() {
                    return Err(ConfigError::Validation(
                        "POLLER_QWEATHER_LOCATION is required for the qweather source"
                            .to_string(),
                    ));
                }
                if settings.include_air && settings.include_forecast {
                    return Err(ConfigError::Validation(
                        "POLLER_QWEATHER_AIR only applies to current conditions; \
                         it cannot be combined with POLLER_QWEATHER_FORECAST"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Overrides the lookback window, falling back to the default on unknown labels.
    pub fn set_window_label(&mut self, label: &str) {
        self.window = window_from_label(label);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn notice_duration(&self) -> Duration {
        Duration::from_millis(self.notice_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    pub fn time_label(&self) -> TimeLabel {
        let mut label = TimeLabel {
            format: self.time_format.clone(),
            ..TimeLabel::default()
        };
        if let Some(offset) = self.utc_offset() {
            label.offset = offset;
        }
        label
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: self.poll_interval(),
            notice_duration: self.notice_duration(),
            window: self.window,
            retention: self.retention,
            prime: self.prime,
        }
    }

    pub fn metric_engine(&self) -> MetricEngine {
        MetricEngine {
            thresholds: self.thresholds.clone(),
            comfort: self.comfort.clone(),
            aqi_channel: self.aqi_channel.clone(),
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|spec| spec.name.clone()).collect()
    }
}

fn env_value(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: std::str::FromStr>(get: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn window_from_label(label: &str) -> LookbackWindow {
    let window = LookbackWindow::from_label(label);
    if LookbackWindow::parse(label).is_none() {
        tracing::warn!(label = %label, fallback = %window, "unknown window label");
    }
    window
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

fn source_from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<SourceSettings, ConfigError> {
    let kind = get("POLLER_SOURCE")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "simulated".to_string());
    match kind.as_str() {
        "simulated" => Ok(SourceSettings::Simulated(SimulatedSettings {
            data_points: parse_or(&get, "POLLER_SIM_POINTS").unwrap_or(100),
            seed: parse_or(&get, "POLLER_SIM_SEED"),
        })),
        "thingspeak" => Ok(SourceSettings::ThingSpeak(ThingSpeakSettings {
            base_url: get("POLLER_THINGSPEAK_URL")
                .unwrap_or_else(|| thingspeak::DEFAULT_BASE_URL.to_string()),
            channel_id: get("POLLER_THINGSPEAK_CHANNEL").unwrap_or_default(),
            read_key: get("POLLER_THINGSPEAK_KEY"),
            results: parse_or(&get, "POLLER_THINGSPEAK_RESULTS").unwrap_or(100),
        })),
        "qweather" => Ok(SourceSettings::QWeather(QWeatherSettings {
            base_url: get("POLLER_QWEATHER_URL")
                .unwrap_or_else(|| qweather::DEFAULT_BASE_URL.to_string()),
            geo_url: get("POLLER_QWEATHER_GEO_URL")
                .unwrap_or_else(|| qweather::DEFAULT_GEO_URL.to_string()),
            api_key: get("POLLER_QWEATHER_KEY").unwrap_or_default(),
            location: get("POLLER_QWEATHER_LOCATION").unwrap_or_default(),
            include_air: get("POLLER_QWEATHER_AIR")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
            include_forecast: get("POLLER_QWEATHER_FORECAST")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
        })),
        other => Err(ConfigError::Validation(format!(
            "POLLER_SOURCE must be simulated, thingspeak or qweather, got {other}"
        ))),
    }
}

fn default_channels(source: &SourceSettings) -> Vec<ChannelSpec> {
    match source {
        SourceSettings::Simulated(_) => vec![
            ChannelSpec::new("temperature", "temperature", ChannelParser::Float, "°C"),
            ChannelSpec::new("humidity", "humidity", ChannelParser::Float, "%"),
            ChannelSpec::new("waterLevel", "waterLevel", ChannelParser::Float, "cm"),
        ],
        SourceSettings::ThingSpeak(_) => vec![
            ChannelSpec::new("temperature", "field1", ChannelParser::Float, "°C"),
            ChannelSpec::new("humidity", "field2", ChannelParser::Float, "%"),
            ChannelSpec::new("waterLevel", "field3", ChannelParser::Float, "cm"),
        ],
        SourceSettings::QWeather(settings) => {
            if settings.include_forecast {
                return vec![
                    ChannelSpec::new("temperature", "tempMax", ChannelParser::Float, "°C"),
                    ChannelSpec::new("temperatureMin", "tempMin", ChannelParser::Float, "°C"),
                    ChannelSpec::new("humidity", "humidity", ChannelParser::Integer, "%"),
                ];
            }
            let mut channels = vec![
                ChannelSpec::new("temperature", "temp", ChannelParser::Float, "°C"),
                ChannelSpec::new("humidity", "humidity", ChannelParser::Integer, "%"),
                ChannelSpec::new("windSpeed", "windSpeed", ChannelParser::Float, "km/h"),
            ];
            if settings.include_air {
                channels.push(ChannelSpec::new("aqi", "aqi", ChannelParser::Integer, ""));
            }
            channels
        }
    }
}

fn default_thresholds() -> Vec<(&'static str, ThresholdConfig)> {
    [
        ("temperature", (10.0, 15.0, 30.0, 35.0)),
        ("humidity", (30.0, 40.0, 70.0, 80.0)),
        ("waterLevel", (0.0, 5.0, 40.0, 50.0)),
    ]
    .into_iter()
    .filter_map(|(name, (danger_low, warning_low, warning_high, danger_high))| {
        ThresholdConfig::new(danger_low, warning_low, warning_high, danger_high)
            .ok()
            .map(|config| (name, config))
    })
    .collect()
}
