use crate::error::{ConfigError, HardwareFault};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The single environmental reading the safety gate cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Whether the station considers it safe to open.
    pub safe: bool,
    /// When the station took the reading.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WeatherData {
    safe: bool,
}

/// Message envelope `{type: "weather", data: {safe}, date}`.
#[derive(Debug, Serialize, Deserialize)]
struct WeatherMessage {
    #[serde(rename = "type")]
    kind: String,
    data: WeatherData,
    date: DateTime<Utc>,
}

impl WeatherRecord {
    pub fn new(safe: bool, timestamp: DateTime<Utc>) -> Self { Self { safe, timestamp } }

    /// Decodes a weather message.
    ///
    /// # Errors
    /// [`ConfigError::Json`] for malformed input and [`ConfigError::InvalidValue`] for any message
    /// type other than `weather`.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let msg: WeatherMessage = serde_json::from_str(raw)?;
        if msg.kind != "weather" {
            return Err(ConfigError::InvalidValue {
                key: "type",
                reason: format!("expected a weather message, got '{}'", msg.kind),
            });
        }
        Ok(Self { safe: msg.data.safe, timestamp: msg.date })
    }

    /// Encodes the record as a weather message.
    pub fn to_json(&self) -> String {
        let msg = WeatherMessage {
            kind: "weather".to_string(),
            data: WeatherData { safe: self.safe },
            date: self.timestamp,
        };
        serde_json::to_string(&msg).unwrap_or_default()
    }
}

/// Anything able to deliver the latest weather record. `Ok(None)` means no new data.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Human readable name for log lines.
    fn name(&self) -> &'static str;
    /// Fetches the current reading.
    async fn latest(&self) -> Result<Option<WeatherRecord>, HardwareFault>;
}

/// Reads the record an external weather station keeps overwriting in a JSON file.
pub struct FileWeatherSource {
    path: PathBuf,
}

impl FileWeatherSource {
    /// Source reading `path` on every poll. A missing file means no data yet.
    pub fn new(path: PathBuf) -> Self { Self { path } }
}

#[async_trait]
impl WeatherSource for FileWeatherSource {
    fn name(&self) -> &'static str { "weather file" }

    async fn latest(&self) -> Result<Option<WeatherRecord>, HardwareFault> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HardwareFault::device("weather read", e.to_string())),
        };
        WeatherRecord::from_json(&raw)
            .map(Some)
            .map_err(|e| HardwareFault::device("weather decode", e.to_string()))
    }
}

/// Fresh records on every poll, occasionally reporting bad weather.
pub struct SimulatedWeatherStation {
    unsafe_probability: f64,
}

impl SimulatedWeatherStation {
    /// Station reporting unsafe weather with the given probability, clamped to `[0, 1]`.
    pub fn new(unsafe_probability: f64) -> Self {
        Self { unsafe_probability: unsafe_probability.clamp(0.0, 1.0) }
    }
}

#[async_trait]
impl WeatherSource for SimulatedWeatherStation {
    fn name(&self) -> &'static str { "simulated weather station" }

    async fn latest(&self) -> Result<Option<WeatherRecord>, HardwareFault> {
        let safe = !rand::rng().random_bool(self.unsafe_probability);
        Ok(Some(WeatherRecord::new(safe, Utc::now())))
    }
}
