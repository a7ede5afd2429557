//! Stateful field simulator for local development.
//!
//! Produces the four readings a field node reports:
//! - Soil moisture (%): evaporation drift that grows with temperature, a small
//!   random walk, rain gain, and a step up whenever water is delivered
//! - Air temperature (C): diurnal sine curve plus noise
//! - Relative humidity (%): inversely coupled to temperature, higher in rain
//! - Raindrop ADC (0-1023, 1023 = dry): drops low during rain events

use std::fmt;

/// Raindrop sensor full scale (10-bit ADC).
pub const RAINDROP_ADC_MAX: f64 = 1023.0;

/// Soil moisture points gained per litre delivered.
const WETTING_PER_LITRE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Hot and dry, moisture falls steadily.  Drives automatic irrigation.
    Drying,
    /// Mild, near the wheat target.  Little irrigation expected.
    Stable,
    /// Starts saturated, dries very slowly.  Expect zero-volume decisions.
    Wet,
    /// Frequent rain events; exercises the rain sensor penalty.
    Rainy,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "wet" => Self::Wet,
            "rainy" => Self::Rainy,
            _ => Self::Drying, // default
        }
    }

    fn params(self) -> Params {
        match self {
            Self::Drying => Params {
                start_moisture: 55.0,
                drying_per_min: 0.05,
                walk_sigma: 0.1,
                mean_temp: 30.0,
                temp_swing: 6.0,
                base_humidity: 45.0,
                rain_prob: 0.0,
                rain_minutes: (10.0, 30.0),
                rain_per_min: 0.2,
            },
            Self::Stable => Params {
                start_moisture: 60.0,
                drying_per_min: 0.005,
                walk_sigma: 0.05,
                mean_temp: 24.0,
                temp_swing: 4.0,
                base_humidity: 60.0,
                rain_prob: 0.0,
                rain_minutes: (10.0, 30.0),
                rain_per_min: 0.2,
            },
            Self::Wet => Params {
                start_moisture: 85.0,
                drying_per_min: 0.01,
                walk_sigma: 0.05,
                mean_temp: 20.0,
                temp_swing: 3.0,
                base_humidity: 75.0,
                rain_prob: 0.01,
                rain_minutes: (10.0, 30.0),
                rain_per_min: 0.2,
            },
            Self::Rainy => Params {
                start_moisture: 60.0,
                drying_per_min: 0.02,
                walk_sigma: 0.1,
                mean_temp: 18.0,
                temp_swing: 3.0,
                base_humidity: 80.0,
                rain_prob: 0.15,
                rain_minutes: (10.0, 40.0),
                rain_per_min: 0.3,
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Wet => write!(f, "wet"),
            Self::Rainy => write!(f, "rainy"),
        }
    }
}

struct Params {
    start_moisture: f64,
    /// Moisture points lost per minute at 20C.
    drying_per_min: f64,
    /// Random walk sigma per sqrt(minute).
    walk_sigma: f64,
    mean_temp: f64,
    /// Half the day/night temperature range.
    temp_swing: f64,
    base_humidity: f64,
    /// Chance per sample that a rain event starts.
    rain_prob: f64,
    rain_minutes: (f64, f64),
    rain_per_min: f64,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One sample, in the units the hub expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldReading {
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub raindrop_raw: f64,
}

pub struct FieldSim {
    params: Params,
    /// "True" soil moisture (%), before sensor noise.
    soil_moisture: f64,
    elapsed_s: f64,
    rain_left_s: f64,
    diurnal_period_s: f64,
}

impl FieldSim {
    /// `diurnal_period_s` is the day length: 86400 for real time, something
    /// like 3600 for fast dev iteration.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let params = scenario.params();
        Self {
            soil_moisture: params.start_moisture,
            params,
            elapsed_s: 0.0,
            rain_left_s: 0.0,
            diurnal_period_s,
        }
    }

    /// Apply delivered water to the soil.
    pub fn apply_water(&mut self, litres: f64) {
        if litres.is_finite() && litres > 0.0 {
            self.soil_moisture = (self.soil_moisture + litres * WETTING_PER_LITRE).min(100.0);
        }
    }

    pub fn is_raining(&self) -> bool {
        self.rain_left_s > 0.0
    }

    /// Advance the field by `dt_s` seconds and take a reading.
    pub fn step(&mut self, dt_s: f64) -> FieldReading {
        let p = &self.params;
        let minutes = dt_s / 60.0;
        self.elapsed_s += dt_s;

        // -- Weather --------------------------------------------------------
        if self.rain_left_s <= 0.0 && fastrand::f64() < p.rain_prob {
            let (lo, hi) = p.rain_minutes;
            self.rain_left_s = (lo + fastrand::f64() * (hi - lo)) * 60.0;
        }
        let raining = self.rain_left_s > 0.0;
        if raining {
            self.rain_left_s -= dt_s;
        }

        // Coldest at t=0 (dawn), warmest half a period later.
        let phase = 2.0 * std::f64::consts::PI * self.elapsed_s / self.diurnal_period_s;
        let temperature = p.mean_temp - p.temp_swing * phase.cos() + gaussian(0.0, 0.3);

        // -- Soil -----------------------------------------------------------
        let heat = (temperature - 20.0).max(0.0) * 0.05;
        let evaporation = p.drying_per_min * minutes * (1.0 + heat);
        let rain_gain = if raining { p.rain_per_min * minutes } else { 0.0 };
        let walk = gaussian(0.0, p.walk_sigma * minutes.sqrt());
        self.soil_moisture =
            (self.soil_moisture - evaporation + rain_gain + walk).clamp(0.0, 100.0);

        // -- Instantaneous readings -------------------------------------------
        let rain_humidity = if raining { 15.0 } else { 0.0 };
        let humidity = (p.base_humidity - (temperature - p.mean_temp) * 2.0
            + rain_humidity
            + gaussian(0.0, 1.0))
        .clamp(10.0, 100.0);

        let raindrop_raw = if raining {
            gaussian(250.0, 60.0)
        } else {
            gaussian(1010.0, 8.0)
        }
        .round()
        .clamp(0.0, RAINDROP_ADC_MAX);

        FieldReading {
            soil_moisture: round1((self.soil_moisture + gaussian(0.0, 0.5)).clamp(0.0, 100.0)),
            temperature: round1(temperature),
            humidity: round1(humidity),
            raindrop_raw,
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ===========================================================================
// Tests
// ===========================================================================
