//! Rainfall forecast: result type and the OpenWeatherMap provider.
//!
//! The 5-day forecast endpoint returns 3-hour slots; the first 8 slots make up
//! the next 24h and the first 24 slots the next 72h.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::ports::ForecastProvider;

const SLOTS_24H: usize = 8;
const SLOTS_72H: usize = 24;

/// Rain totals for the near-term outlook.
///
/// When `success` is false both totals are zero meaning "unknown", not
/// "dry": dispatch on the flag, never on the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub rainfall_24h: f64,
    pub rainfall_72h: f64,
    pub success: bool,
}

impl ForecastResult {
    pub fn ok(rainfall_24h: f64, rainfall_72h: f64) -> Self {
        Self {
            rainfall_24h,
            rainfall_72h,
            success: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            rainfall_24h: 0.0,
            rainfall_72h: 0.0,
            success: false,
        }
    }
}

// ---------------------------------------------------------------------------
// OpenWeatherMap wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OwmForecast {
    #[serde(default)]
    list: Vec<OwmSlot>,
}

#[derive(Debug, Deserialize)]
struct OwmSlot {
    rain: Option<OwmRain>,
}

#[derive(Debug, Deserialize)]
struct OwmRain {
    #[serde(rename = "3h")]
    three_hour: Option<f64>,
}

fn summarize(forecast: &OwmForecast) -> ForecastResult {
    let rain: Vec<f64> = forecast
        .list
        .iter()
        .map(|slot| {
            slot.rain
                .as_ref()
                .and_then(|r| r.three_hour)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(0.0)
        })
        .collect();

    let rainfall_24h = rain.iter().take(SLOTS_24H).sum();
    let rainfall_72h = rain.iter().take(SLOTS_72H).sum();
    ForecastResult::ok(rainfall_24h, rainfall_72h)
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenWeatherProvider {
    client: Client,
    url: String,
}

impl OpenWeatherProvider {
    pub fn new(
        base_url: &str,
        latitude: f64,
        longitude: f64,
        api_key: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let url = format!(
            "{}/forecast?lat={latitude}&lon={longitude}&appid={api_key}&units=metric",
            base_url.trim_end_matches('/')
        );
        Ok(Self { client, url })
    }

    async fn try_fetch(&self) -> anyhow::Result<ForecastResult> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("forecast API returned {status}");
        }
        let body: OwmForecast = response.json().await?;
        Ok(summarize(&body))
    }
}

#[async_trait]
impl ForecastProvider for OpenWeatherProvider {
    async fn fetch(&self) -> ForecastResult {
        match self.try_fetch().await {
            Ok(f) => {
                debug!(
                    rainfall_24h = f.rainfall_24h,
                    rainfall_72h = f.rainfall_72h,
                    "forecast fetched"
                );
                f
            }
            Err(e) => {
                warn!("forecast fetch failed: {e:#}");
                ForecastResult::unavailable()
            }
        }
    }
}

/// Stand-in when no API key is configured: always unavailable, so every
/// automatic cycle uses the rule-based estimate.
pub struct NoForecast;

#[async_trait]
impl ForecastProvider for NoForecast {
    async fn fetch(&self) -> ForecastResult {
        ForecastResult::unavailable()
    }
}
