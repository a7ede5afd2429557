//! Sensor readings and per-field sanitisation.
//!
//! Field nodes report raw values that may be missing, unparsable or
//! physically implausible.  Rather than reject a whole reading, each bad
//! field is replaced by a fixed default and a `warn!` event is emitted so a
//! defaulted 50% can be told apart from a measured one.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Full-scale value of the raindrop sensor ADC (1023 = bone dry).
pub const RAINDROP_ADC_MAX: f64 = 1023.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    SoilMoisture,
    Temperature,
    Humidity,
    RainSensor,
}

impl SensorField {
    /// Accepted closed range for this field.
    pub fn range(self) -> (f64, f64) {
        match self {
            Self::SoilMoisture => (0.0, 100.0),
            Self::Temperature => (-10.0, 50.0),
            Self::Humidity => (10.0, 100.0),
            Self::RainSensor => (0.0, 100.0),
        }
    }

    /// Substitute used when the reported value is missing or out of range.
    pub fn default_value(self) -> f64 {
        match self {
            Self::SoilMoisture => 50.0,
            Self::Temperature => 25.0,
            Self::Humidity => 60.0,
            Self::RainSensor => 0.0,
        }
    }

    /// Returns the value if plausible, otherwise the field default.
    pub fn sanitize(self, value: Option<f64>) -> (f64, bool) {
        let (lo, hi) = self.range();
        match value {
            Some(v) if v.is_finite() && (lo..=hi).contains(&v) => (v, false),
            _ => (self.default_value(), true),
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SoilMoisture => write!(f, "soil_moisture"),
            Self::Temperature => write!(f, "temperature"),
            Self::Humidity => write!(f, "humidity"),
            Self::RainSensor => write!(f, "rain_sensor"),
        }
    }
}

/// Values as reported by a node, before validation.  `None` means the field
/// was absent, null, or not a number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawReading {
    pub soil_moisture: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    /// Raindrop ADC count, 0–1023.
    pub raindrop_raw: Option<f64>,
}

impl RawReading {
    pub fn is_empty(&self) -> bool {
        self.soil_moisture.is_none()
            && self.temperature.is_none()
            && self.humidity.is_none()
            && self.raindrop_raw.is_none()
    }
}

/// Convert a raindrop ADC count into a wetness percentage (0 = dry, 100 = saturated).
pub fn normalize_raindrop(raw: f64) -> f64 {
    100.0 * (RAINDROP_ADC_MAX - raw) / RAINDROP_ADC_MAX
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub rain_sensor: f64,
}

impl SensorReading {
    /// All-zero reading attached to records when the sensors can't be read.
    pub const ZERO: SensorReading = SensorReading {
        soil_moisture: 0.0,
        temperature: 0.0,
        humidity: 0.0,
        rain_sensor: 0.0,
    };

    /// Validate each field independently, returning the reading and the list
    /// of fields that were replaced by defaults.
    pub fn from_raw(raw: &RawReading) -> (Self, Vec<SensorField>) {
        let rain = raw.raindrop_raw.map(normalize_raindrop);
        Self::from_values(raw.soil_moisture, raw.temperature, raw.humidity, rain)
    }

    /// Same as [`from_raw`](Self::from_raw) but for an already-normalised
    /// rain sensor percentage.
    pub fn from_values(
        soil_moisture: Option<f64>,
        temperature: Option<f64>,
        humidity: Option<f64>,
        rain_sensor: Option<f64>,
    ) -> (Self, Vec<SensorField>) {
        let mut defaulted = Vec::new();
        let mut check = |field: SensorField, value: Option<f64>| {
            let (v, was_defaulted) = field.sanitize(value);
            if was_defaulted {
                warn!(
                    field = %field,
                    raw = ?value,
                    default = v,
                    "sensor value missing or out of range, using default"
                );
                defaulted.push(field);
            }
            v
        };

        let reading = Self {
            soil_moisture: check(SensorField::SoilMoisture, soil_moisture),
            temperature: check(SensorField::Temperature, temperature),
            humidity: check(SensorField::Humidity, humidity),
            rain_sensor: check(SensorField::RainSensor, rain_sensor),
        };
        (reading, defaulted)
    }
}

/// Operator override as seen on the gateway's override channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualRequest {
    pub active: bool,
    pub volume: f64,
}

impl ManualRequest {
    pub const NONE: ManualRequest = ManualRequest {
        active: false,
        volume: 0.0,
    };

    /// An override is only acted on when active with a positive, finite volume.
    pub fn is_actionable(&self) -> bool {
        self.active && self.volume.is_finite() && self.volume > 0.0
    }
}
