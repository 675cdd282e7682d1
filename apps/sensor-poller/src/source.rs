pub mod qweather;
pub mod simulated;
pub mod thingspeak;

pub use qweather::{QWeatherSettings, QWeatherSource};
pub use simulated::{SimulatedSettings, SimulatedSource};
pub use thingspeak::{ThingSpeakSettings, ThingSpeakSource};

use crate::error::FetchError;
use crate::telemetry::RawRecord;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

/// Pulls one batch of raw provider records. Implementations own their transport and
/// any per-source memory (resolved locations, previous-poll flags).
pub trait SourceAdapter {
    fn name(&self) -> &'static str;

    fn fetch_raw(&mut self) -> impl Future<Output = Result<Vec<RawRecord>, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub enum SourceSettings {
    Simulated(SimulatedSettings),
    ThingSpeak(ThingSpeakSettings),
    QWeather(QWeatherSettings),
}

impl SourceSettings {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceSettings::Simulated(_) => "simulated",
            SourceSettings::ThingSpeak(_) => "thingspeak",
            SourceSettings::QWeather(_) => "qweather",
        }
    }
}

pub enum ActiveSource {
    Simulated(SimulatedSource),
    ThingSpeak(ThingSpeakSource),
    QWeather(Box<QWeatherSource>),
}

impl ActiveSource {
    pub fn new(settings: &SourceSettings, http_timeout: Duration) -> Result<Self, FetchError> {
        Ok(match settings {
            SourceSettings::Simulated(settings) => {
                Self::Simulated(SimulatedSource::new(settings.clone()))
            }
            SourceSettings::ThingSpeak(settings) => Self::ThingSpeak(ThingSpeakSource::new(
                build_http_client(http_timeout)?,
                settings.clone(),
            )),
            SourceSettings::QWeather(settings) => Self::QWeather(Box::new(QWeatherSource::new(
                build_http_client(http_timeout)?,
                settings.clone(),
            ))),
        })
    }
}

impl SourceAdapter for ActiveSource {
    fn name(&self) -> &'static str {
        match self {
            ActiveSource::Simulated(source) => source.name(),
            ActiveSource::ThingSpeak(source) => source.name(),
            ActiveSource::QWeather(source) => source.name(),
        }
    }

    async fn fetch_raw(&mut self) -> Result<Vec<RawRecord>, FetchError> {
        match self {
            ActiveSource::Simulated(source) => source.fetch_raw().await,
            ActiveSource::ThingSpeak(source) => source.fetch_raw().await,
            ActiveSource::QWeather(source) => source.fetch_raw().await,
        }
    }
}

pub fn build_http_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("sensor-poller/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FetchError::from)
}

/// Fails non-2xx responses with their body attached, then decodes JSON.
async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, body = %body, "provider returned an error status");
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
