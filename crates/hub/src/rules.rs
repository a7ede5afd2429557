//! Rule-based water estimation and rainfall adjustment.
//!
//! Both functions are pure and total: they never fail for finite input and
//! never return a negative volume.  The fallback estimate keeps the system
//! irrigating when the learned predictor or the forecast is down.

use crate::crop::CropProfile;
use crate::sensor::SensorReading;

/// Extra litres when the air is hotter than the crop tolerates.
const HEAT_BONUS: f64 = 5.0;
/// Litres removed per humidity point above 50%.
const HUMIDITY_FACTOR: f64 = 0.1;
/// Rain sensor percentage above which the ground counts as wet.
const RAIN_SENSOR_WET: f64 = 50.0;
const RAIN_SENSOR_PENALTY: f64 = 10.0;

/// 24h rainfall (mm) above which imminent rain offsets the need.
const IMMINENT_RAIN_MM: f64 = 5.0;
/// Share of forecast rain assumed to reach the root zone.
const RAIN_EFFECTIVENESS: f64 = 0.5;
/// 72h rainfall (mm) below which the outlook counts as dry.
const DRY_OUTLOOK_MM: f64 = 5.0;
const DRY_OUTLOOK_BUFFER: f64 = 5.0;

/// Deterministic water need from sensor readings alone.
pub fn fallback_need(reading: &SensorReading, profile: &CropProfile) -> f64 {
    let mut need = (profile.ideal_moisture - reading.soil_moisture) * profile.water_per_percent;
    if reading.temperature > profile.max_temp {
        need += HEAT_BONUS;
    }
    need -= (reading.humidity - 50.0) * HUMIDITY_FACTOR;
    if reading.rain_sensor > RAIN_SENSOR_WET {
        need -= RAIN_SENSOR_PENALTY;
    }
    need.max(0.0)
}

/// Offset the need by forecast rain and clamp to the crop's single-cycle limit.
///
/// The two adjustments are independent; both may apply in one call.
pub fn adjust_for_rainfall(
    need: f64,
    rainfall_24h: f64,
    rainfall_72h: f64,
    profile: &CropProfile,
) -> f64 {
    let mut need = need;
    if rainfall_24h > IMMINENT_RAIN_MM {
        need -= rainfall_24h * RAIN_EFFECTIVENESS;
    }
    if rainfall_72h < DRY_OUTLOOK_MM {
        need += DRY_OUTLOOK_BUFFER;
    }
    clamp_volume(need, profile)
}

/// Restrict a volume to `[0, profile.max_water]`.  NaN maps to zero.
pub fn clamp_volume(volume: f64, profile: &CropProfile) -> f64 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, profile.max_water)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop::{RICE, WHEAT};
    use proptest::prelude::*;

    fn reading(sm: f64, t: f64, h: f64, rs: f64) -> SensorReading {
        SensorReading {
            soil_moisture: sm,
            temperature: t,
            humidity: h,
            rain_sensor: rs,
        }
    }

    // -- fallback_need ----------------------------------------------------

    #[test]
    fn fallback_wheat_moderate_deficit() {
        // (60 - 50) * 0.6 = 6, no other adjustment fires
        let need = fallback_need(&reading(50.0, 30.0, 50.0, 0.0), &WHEAT);
        assert!((need - 6.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_heat_adds_five() {
        let need = fallback_need(&reading(50.0, 36.0, 50.0, 0.0), &WHEAT);
        assert!((need - 11.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_humidity_reduces() {
        // 6 - (70 - 50) * 0.1 = 4
        let need = fallback_need(&reading(50.0, 30.0, 70.0, 0.0), &WHEAT);
        assert!((need - 4.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_dry_air_increases() {
        // 6 - (30 - 50) * 0.1 = 8
        let need = fallback_need(&reading(50.0, 30.0, 30.0, 0.0), &WHEAT);
        assert!((need - 8.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_wet_rain_sensor_reduces() {
        // rice: (80 - 50) * 0.8 = 24, minus 10
        let need = fallback_need(&reading(50.0, 30.0, 50.0, 80.0), &RICE);
        assert!((need - 14.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_rain_sensor_at_threshold_does_not_reduce() {
        let need = fallback_need(&reading(50.0, 30.0, 50.0, 50.0), &WHEAT);
        assert!((need - 6.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_saturated_soil_is_zero() {
        assert_eq!(fallback_need(&reading(95.0, 20.0, 90.0, 90.0), &WHEAT), 0.0);
    }

    // -- adjust_for_rainfall ----------------------------------------------

    #[test]
    fn adjust_both_rules_fire() {
        // 10 - 6 * 0.5 + 5 = 12
        let v = adjust_for_rainfall(10.0, 6.0, 2.0, &WHEAT);
        assert!((v - 12.0).abs() < 1e-9);
    }

    #[test]
    fn adjust_dry_outlook_only() {
        let v = adjust_for_rainfall(6.0, 0.0, 0.0, &WHEAT);
        assert!((v - 11.0).abs() < 1e-9);
    }

    #[test]
    fn adjust_wet_outlook_no_change() {
        let v = adjust_for_rainfall(6.0, 5.0, 20.0, &WHEAT);
        assert!((v - 6.0).abs() < 1e-9);
    }

    #[test]
    fn adjust_heavy_rain_floors_at_zero() {
        assert_eq!(adjust_for_rainfall(6.0, 40.0, 60.0, &WHEAT), 0.0);
    }

    #[test]
    fn adjust_caps_at_max_water() {
        assert_eq!(adjust_for_rainfall(500.0, 0.0, 0.0, &WHEAT), WHEAT.max_water);
    }

    #[test]
    fn clamp_nan_is_zero() {
        assert_eq!(clamp_volume(f64::NAN, &WHEAT), 0.0);
    }

    #[test]
    fn clamp_infinity_is_max() {
        assert_eq!(clamp_volume(f64::INFINITY, &RICE), RICE.max_water);
    }

    // -- properties -------------------------------------------------------

    proptest! {
        #[test]
        fn fallback_is_total_and_non_negative(
            sm in -1e6f64..1e6,
            t in -1e6f64..1e6,
            h in -1e6f64..1e6,
            rs in -1e6f64..1e6,
        ) {
            let need = fallback_need(&reading(sm, t, h, rs), &WHEAT);
            prop_assert!(need.is_finite());
            prop_assert!(need >= 0.0);
        }

        #[test]
        fn final_volume_within_crop_bounds(
            sm in 0f64..=100.0,
            t in -10f64..=50.0,
            h in 10f64..=100.0,
            rs in 0f64..=100.0,
            r24 in 0f64..200.0,
            r72 in 0f64..400.0,
            rice in proptest::bool::ANY,
        ) {
            let profile = if rice { RICE } else { WHEAT };
            let need = fallback_need(&reading(sm, t, h, rs), &profile);
            let v = adjust_for_rainfall(need, r24, r72, &profile);
            prop_assert!(v >= 0.0);
            prop_assert!(v <= profile.max_water);
        }

        #[test]
        fn adjust_bounds_any_need(need in proptest::num::f64::ANY, r24 in 0f64..100.0, r72 in 0f64..100.0) {
            let v = adjust_for_rainfall(need, r24, r72, &WHEAT);
            prop_assert!((0.0..=WHEAT.max_water).contains(&v));
        }
    }
}
