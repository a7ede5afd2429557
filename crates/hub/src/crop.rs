//! Crop profiles: per-crop moisture targets and water limits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropProfile {
    /// Soil moisture (%) the crop should be kept at.
    pub ideal_moisture: f64,
    /// Temperature (°C) above which the crop needs extra water.
    pub max_temp: f64,
    /// Litres per percentage point of moisture deficit.
    pub water_per_percent: f64,
    /// Upper bound on a single cycle's water volume (litres).
    pub max_water: f64,
}

pub const WHEAT: CropProfile = CropProfile {
    ideal_moisture: 60.0,
    max_temp: 35.0,
    water_per_percent: 0.6,
    max_water: 60.0,
};

pub const RICE: CropProfile = CropProfile {
    ideal_moisture: 80.0,
    max_temp: 38.0,
    water_per_percent: 0.8,
    max_water: 80.0,
};

/// Immutable crop lookup table, built once at startup.
#[derive(Debug, Clone)]
pub struct CropRegistry {
    profiles: HashMap<String, CropProfile>,
}

impl CropRegistry {
    /// Registry pre-populated with the built-in profiles.
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("wheat".to_string(), WHEAT);
        profiles.insert("rice".to_string(), RICE);
        Self { profiles }
    }

    /// Builder-style insert; replaces a built-in profile of the same id.
    pub fn with(mut self, crop_id: &str, profile: CropProfile) -> Self {
        self.profiles.insert(crop_id.to_string(), profile);
        self
    }

    pub fn lookup(&self, crop_id: &str) -> Result<CropProfile, EngineError> {
        self.profiles
            .get(crop_id)
            .copied()
            .ok_or_else(|| EngineError::UnknownCrop(crop_id.to_string()))
    }

    pub fn contains(&self, crop_id: &str) -> bool {
        self.profiles.contains_key(crop_id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
