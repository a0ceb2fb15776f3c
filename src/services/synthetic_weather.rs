//! Plausible stand-in weather for when no provider answers.
//!
//! Deterministic per (location, hour): the generator is seeded from both, so a retried cycle
//! sees the same sky and forecasts stay reproducible.

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::models::telemetry::{Location, WeatherConditions};
use crate::services::solar;

const SEED_SALT: u64 = 0x6D65_7368_0BA7_7E21;
/// Used when the node has no position at all.
const MID_LATITUDE: Location = Location {
    latitude: 50.0,
    longitude: 10.0,
};

pub fn conditions_at(location: Option<Location>, at: DateTime<Utc>) -> WeatherConditions {
    let loc = location.filter(Location::is_valid).unwrap_or(MID_LATITUDE);
    let hour = at.duration_trunc(Duration::hours(1)).unwrap_or(at);
    let mut rng = SmallRng::seed_from_u64(seed_for(loc, hour));

    let annual_fraction = f64::from(hour.ordinal0()) / 365.0;
    let local_hour = solar::solar_hour(f64::from(hour.hour()), loc.longitude);

    let temperature_c = compute_temperature(loc.latitude, annual_fraction, local_hour, &mut rng);
    let cloud_cover_pct = compute_cloud_cover(annual_fraction, &mut rng);
    let condition = classify_sky(cloud_cover_pct, temperature_c, &mut rng);

    debug!(
        "Synthetic weather for ({:.3}, {:.3}) at {}: {} {:.0}% {:.1}C",
        loc.latitude, loc.longitude, hour, condition, cloud_cover_pct, temperature_c
    );

    WeatherConditions {
        cloud_cover_pct,
        temperature_c,
        condition,
        forecast_time: hour,
        synthetic: true,
    }
}

fn seed_for(loc: Location, hour: DateTime<Utc>) -> u64 {
    loc.latitude.to_bits().rotate_left(17) ^ loc.longitude.to_bits() ^ (hour.timestamp() as u64) ^ SEED_SALT
}

fn compute_temperature(latitude: f64, annual_fraction: f64, local_hour: f64, rng: &mut SmallRng) -> f64 {
    // peak around late July in the north, late January in the south
    let hemisphere = if latitude < 0.0 { -1.0 } else { 1.0 };
    let seasonal = ((annual_fraction - 0.57) * 2.0 * PI).cos() * 10.0 * hemisphere;
    let diurnal = ((local_hour - 15.0) / 24.0 * 2.0 * PI).cos() * 4.5;
    let base = 27.0 - latitude.abs() * 0.35;
    let random_variation = rng.random_range(-1.8..=1.8);
    let cold_front = if rng.random_bool(0.02) {
        -rng.random_range(2.0..=5.0)
    } else {
        0.0
    };
    (base + seasonal + diurnal + random_variation + cold_front).clamp(-30.0, 45.0)
}

fn compute_cloud_cover(annual_fraction: f64, rng: &mut SmallRng) -> f64 {
    // slightly cloudier in winter months
    let seasonal = ((annual_fraction - 0.04) * 2.0 * PI).cos() * 10.0;
    let base: f64 = rng.random_range(0.0..=90.0);
    let overcast_spell = if rng.random_bool(0.15) { 30.0 } else { 0.0 };
    (base + seasonal + overcast_spell).clamp(0.0, 100.0).round()
}

fn classify_sky(cloud_cover_pct: f64, temperature_c: f64, rng: &mut SmallRng) -> String {
    let precipitation_roll: f64 = rng.random_range(0.0..1.0);
    let sky = if cloud_cover_pct > 85.0 && precipitation_roll > 0.6 {
        if temperature_c < 0.0 { "light snow" } else { "light rain" }
    } else if cloud_cover_pct > 85.0 {
        "overcast clouds"
    } else if cloud_cover_pct > 50.0 {
        "broken clouds"
    } else if cloud_cover_pct > 25.0 {
        "scattered clouds"
    } else if cloud_cover_pct > 10.0 {
        "few clouds"
    } else {
        "clear sky"
    };
    sky.to_string()
}
