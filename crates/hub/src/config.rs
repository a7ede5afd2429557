//! TOML config file loading and validation.
//!
//! Infrastructure endpoints (broker, database, web port) come from the
//! environment in `main`; everything about *how* the field is irrigated
//! lives here.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::crop::{CropProfile, CropRegistry};
use crate::predictor::LinearModel;
use crate::scheduler::Timing;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Active crop id; must be built in or listed under `[[crops]]`.
    #[serde(default = "default_crop")]
    pub crop: String,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub crops: Vec<CropEntry>,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub weather: WeatherSection,
    #[serde(default)]
    pub predictor: PredictorSection,
    #[serde(default)]
    pub alerts: AlertSection,
}

fn default_crop() -> String {
    "wheat".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub manual_check_sec: u64,
    pub auto_interval_sec: u64,
    pub manual_pause_sec: u64,
    pub idle_pause_sec: u64,
    pub cooldown_sec: u64,
    pub io_timeout_sec: u64,
    pub stale_reading_sec: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            manual_check_sec: 30,
            auto_interval_sec: 300,
            manual_pause_sec: 10,
            idle_pause_sec: 5,
            cooldown_sec: 60,
            io_timeout_sec: 10,
            stale_reading_sec: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CropEntry {
    pub crop_id: String,
    pub ideal_moisture: f64,
    pub max_temp: f64,
    pub water_per_percent: f64,
    pub max_water: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub node_id: String,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            node_id: "field-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    pub latitude: f64,
    pub longitude: f64,
    pub base_url: String,
    /// Overridden by `WEATHER_API_KEY`.  No key means no forecast.
    pub api_key: Option<String>,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            latitude: 28.3167,
            longitude: 76.9833,
            base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PredictorSection {
    Linear(LinearModel),
    Remote { url: String },
}

impl Default for PredictorSection {
    fn default() -> Self {
        Self::Linear(LinearModel::default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertSection {
    pub webhook_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    /// Built-in profiles plus `[[crops]]`; a config entry replaces a built-in
    /// of the same id.
    pub fn registry(&self) -> CropRegistry {
        self.crops
            .iter()
            .fold(CropRegistry::builtin(), |reg, c| {
                reg.with(
                    &c.crop_id,
                    CropProfile {
                        ideal_moisture: c.ideal_moisture,
                        max_temp: c.max_temp,
                        water_per_percent: c.water_per_percent,
                        max_water: c.max_water,
                    },
                )
            })
    }

    pub fn timing(&self) -> Timing {
        let e = &self.engine;
        Timing {
            manual_check: Duration::from_secs(e.manual_check_sec),
            auto_interval: Duration::from_secs(e.auto_interval_sec),
            manual_pause: Duration::from_secs(e.manual_pause_sec),
            idle_pause: Duration::from_secs(e.idle_pause_sec),
            cooldown: Duration::from_secs(e.cooldown_sec),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.io_timeout_sec)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.engine.stale_reading_sec)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_engine(&mut errors);
        self.validate_crops(&mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_weather(&mut errors);
        self.validate_predictor(&mut errors);
        self.validate_alerts(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_engine(&self, errors: &mut Vec<String>) {
        let e = &self.engine;
        for (name, value) in [
            ("manual_check_sec", e.manual_check_sec),
            ("auto_interval_sec", e.auto_interval_sec),
            ("manual_pause_sec", e.manual_pause_sec),
            ("idle_pause_sec", e.idle_pause_sec),
            ("cooldown_sec", e.cooldown_sec),
            ("io_timeout_sec", e.io_timeout_sec),
            ("stale_reading_sec", e.stale_reading_sec),
        ] {
            if value == 0 {
                errors.push(format!("engine: {name} must be positive"));
            }
        }
    }

    fn validate_crops(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, c) in self.crops.iter().enumerate() {
            let ctx = || {
                if c.crop_id.is_empty() {
                    format!("crops[{i}]")
                } else {
                    format!("crop '{}'", c.crop_id)
                }
            };

            if c.crop_id.trim().is_empty() {
                errors.push(format!("{}: crop_id is empty", ctx()));
            } else if !seen_ids.insert(&c.crop_id) {
                errors.push(format!("{}: duplicate crop_id", ctx()));
            }

            if !(0.0..=100.0).contains(&c.ideal_moisture) {
                errors.push(format!(
                    "{}: ideal_moisture {} out of range [0, 100]",
                    ctx(),
                    c.ideal_moisture
                ));
            }
            if !c.max_temp.is_finite() {
                errors.push(format!("{}: max_temp must be a number", ctx()));
            }
            if !(c.water_per_percent.is_finite() && c.water_per_percent > 0.0) {
                errors.push(format!(
                    "{}: water_per_percent must be positive, got {}",
                    ctx(),
                    c.water_per_percent
                ));
            }
            if !(c.max_water.is_finite() && c.max_water > 0.0) {
                errors.push(format!(
                    "{}: max_water must be positive, got {}",
                    ctx(),
                    c.max_water
                ));
            }
        }

        let registry = self.registry();
        if !registry.contains(&self.crop) {
            errors.push(format!(
                "crop '{}' is not registered (known: {})",
                self.crop,
                registry.ids().join(", ")
            ));
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let id = &self.mqtt.node_id;
        if id.trim().is_empty() {
            errors.push("mqtt: node_id is empty".to_string());
        } else if id.contains(['/', '+', '#']) {
            errors.push(format!(
                "mqtt: node_id '{id}' must not contain '/', '+' or '#'"
            ));
        }
    }

    fn validate_weather(&self, errors: &mut Vec<String>) {
        let w = &self.weather;
        if !(-90.0..=90.0).contains(&w.latitude) {
            errors.push(format!("weather: latitude {} out of range [-90, 90]", w.latitude));
        }
        if !(-180.0..=180.0).contains(&w.longitude) {
            errors.push(format!(
                "weather: longitude {} out of range [-180, 180]",
                w.longitude
            ));
        }
        if !is_http_url(&w.base_url) {
            errors.push(format!("weather: base_url '{}' is not an http(s) URL", w.base_url));
        }
    }

    fn validate_predictor(&self, errors: &mut Vec<String>) {
        match &self.predictor {
            PredictorSection::Linear(m) => {
                if !m.intercept.is_finite() || m.weights.iter().any(|w| !w.is_finite()) {
                    errors.push("predictor: linear coefficients must be numbers".to_string());
                }
            }
            PredictorSection::Remote { url } => {
                if !is_http_url(url) {
                    errors.push(format!("predictor: url '{url}' is not an http(s) URL"));
                }
            }
        }
    }

    fn validate_alerts(&self, errors: &mut Vec<String>) {
        if let Some(url) = &self.alerts.webhook_url {
            if !is_http_url(url) {
                errors.push(format!("alerts: webhook_url '{url}' is not an http(s) URL"));
            }
        }
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}
