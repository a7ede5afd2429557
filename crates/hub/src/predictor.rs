//! Learned water-requirement predictors.
//!
//! The engine never trains anything; it consumes a ready-made [`Predictor`].
//! Two are provided: a linear model whose coefficients come from config, and
//! a client for an external model server.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineError;
use crate::ports::Predictor;
use crate::sensor::SensorReading;

/// The six inputs every predictor sees, in training-column order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub rainfall_24h: f64,
    pub rainfall_72h: f64,
    pub rain_sensor: f64,
}

impl Features {
    pub fn new(reading: &SensorReading, rainfall_24h: f64, rainfall_72h: f64) -> Self {
        Self {
            soil_moisture: reading.soil_moisture,
            temperature: reading.temperature,
            humidity: reading.humidity,
            rainfall_24h,
            rainfall_72h,
            rain_sensor: reading.rain_sensor,
        }
    }

    pub fn as_array(&self) -> [f64; 6] {
        [
            self.soil_moisture,
            self.temperature,
            self.humidity,
            self.rainfall_24h,
            self.rainfall_72h,
            self.rain_sensor,
        ]
    }
}

/// Reject non-finite predictions and floor the rest at zero.
fn finish(value: f64) -> Result<f64, EngineError> {
    if value.is_finite() {
        Ok(value.max(0.0))
    } else {
        Err(EngineError::PredictionFailure(format!(
            "non-numeric prediction: {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Linear model
// ---------------------------------------------------------------------------

/// Missing coefficients in config fall back to [`LinearModel::default`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearModel {
    pub intercept: f64,
    /// Weights in [`Features::as_array`] order.
    pub weights: [f64; 6],
}

impl Default for LinearModel {
    /// Coefficients of the synthetic irrigation target:
    /// `(70 - sm)*0.6 + (t - 25)*0.2 - (h - 50)*0.1 - r24*0.3 - r72*0.1 - rain*0.2`.
    fn default() -> Self {
        Self {
            intercept: 42.0,
            weights: [-0.6, 0.2, -0.1, -0.3, -0.1, -0.2],
        }
    }
}

impl LinearModel {
    pub fn evaluate(&self, features: &Features) -> f64 {
        self.weights
            .iter()
            .zip(features.as_array())
            .fold(self.intercept, |acc, (w, x)| acc + w * x)
    }
}

#[async_trait]
impl Predictor for LinearModel {
    async fn predict(&self, features: &Features) -> Result<f64, EngineError> {
        finish(self.evaluate(features))
    }
}

// ---------------------------------------------------------------------------
// Remote model server
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RemotePrediction {
    water: f64,
}

/// POSTs the feature vector as JSON and expects `{"water": <litres>}` back.
#[derive(Clone)]
pub struct RemotePredictor {
    client: Client,
    url: String,
}

impl RemotePredictor {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Predictor for RemotePredictor {
    async fn predict(&self, features: &Features) -> Result<f64, EngineError> {
        let fail = |e: reqwest::Error| EngineError::PredictionFailure(e.to_string());

        let response = self
            .client
            .post(&self.url)
            .json(features)
            .send()
            .await
            .map_err(fail)?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::PredictionFailure(format!(
                "model server returned {status}"
            )));
        }
        let body: RemotePrediction = response.json().await.map_err(fail)?;
        finish(body.water)
    }
}
