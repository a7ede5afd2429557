//! The decision record: one per completed cycle, appended to the cycle log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::forecast::ForecastResult;
use crate::sensor::SensorReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMode {
    Ml,
    Fallback,
    Manual,
}

impl PredictionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ml => "ml",
            Self::Fallback => "fallback",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ml" => Ok(Self::Ml),
            "fallback" => Ok(Self::Fallback),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("unknown prediction mode '{s}'")),
        }
    }
}

/// What happened to the gateway command for this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Command accepted by the gateway.
    Sent,
    /// Command attempted but the gateway write failed.
    Failed,
    /// Volume was zero; nothing written.
    Skipped,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("unknown command status '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub rain_sensor: f64,
    pub rainfall_24h: f64,
    pub rainfall_72h: f64,
    pub water_volume: f64,
    pub mode: PredictionMode,
    pub crop_id: String,
    pub is_manual: bool,
    pub command: CommandStatus,
}

impl DecisionRecord {
    pub fn new(
        reading: &SensorReading,
        forecast: &ForecastResult,
        water_volume: f64,
        mode: PredictionMode,
        crop_id: &str,
        command: CommandStatus,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            soil_moisture: reading.soil_moisture,
            temperature: reading.temperature,
            humidity: reading.humidity,
            rain_sensor: reading.rain_sensor,
            rainfall_24h: forecast.rainfall_24h,
            rainfall_72h: forecast.rainfall_72h,
            water_volume,
            mode,
            crop_id: crop_id.to_string(),
            is_manual: mode == PredictionMode::Manual,
            command,
        }
    }

    #[cfg(test)]
    pub fn reading(&self) -> SensorReading {
        SensorReading {
            soil_moisture: self.soil_moisture,
            temperature: self.temperature,
            humidity: self.humidity,
            rain_sensor: self.rain_sensor,
        }
    }
}
