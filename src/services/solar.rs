//! Approximate solar charging efficiency for a node's panel.
//!
//! Pipeline:
//!  1. Geometry   – declination from day-of-year, sunrise/sunset hour angle from latitude
//!  2. Sun proxy  – cosine of the offset from solar noon, scaled to the half-day length
//!  3. Weather    – cloud transmission and panel temperature derating
//!
//! Precision is deliberately coarse: a few minutes of sunrise error do not matter for a
//! battery forecast measured in whole hours.

use std::f64::consts::PI;

const DEG: f64 = PI / 180.0;

/// Earth's axial tilt, degrees.
const OBLIQUITY_DEG: f64 = 23.45;
/// Efficiency reached with the sun at solar noon under a clear sky.
pub const MAX_BASE_EFFICIENCY: f64 = 0.8;
/// Panel reference temperature for the derating curve (°C).
const REFERENCE_TEMP_C: f64 = 25.0;
/// Efficiency loss per °C above the reference.
const HEAT_LOSS_PER_C: f64 = 0.004;
/// Efficiency gain per °C below freezing.
const COLD_GAIN_PER_C: f64 = 0.002;
const TEMP_FACTOR_RANGE: (f64, f64) = (0.5, 1.2);

/// Sunrise and sunset in local solar hours, `0.0..=24.0`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DaylightWindow {
    pub sunrise: f64,
    pub sunset: f64,
}

impl DaylightWindow {
    pub fn length(&self) -> f64 {
        self.sunset - self.sunrise
    }

    pub fn contains(&self, solar_hour: f64) -> bool {
        self.length() > 0.0 && solar_hour > self.sunrise && solar_hour < self.sunset
    }
}

fn valid_geometry(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0
}

/// Solar declination in degrees (Cooper's approximation).
pub fn declination_deg(day_of_year: u32) -> f64 {
    OBLIQUITY_DEG * (2.0 * PI * (284.0 + f64::from(day_of_year)) / 365.0).sin()
}

/// Daylight window for a latitude and day, or `None` for invalid geometry.
///
/// Polar day yields `0..24`, polar night an empty window at noon.
pub fn daylight_window(lat: f64, day_of_year: u32) -> Option<DaylightWindow> {
    if !valid_geometry(lat, 0.0) {
        return None;
    }
    let decl = declination_deg(day_of_year) * DEG;
    let cos_omega0 = (-(lat * DEG).tan() * decl.tan()).clamp(-1.0, 1.0);
    let half_day_hours = cos_omega0.acos() / DEG / 15.0;
    Some(DaylightWindow {
        sunrise: 12.0 - half_day_hours,
        sunset: 12.0 + half_day_hours,
    })
}

/// Local solar hour for a UTC hour at a given longitude (15° per hour).
pub fn solar_hour(utc_hour: f64, lon: f64) -> f64 {
    (utc_hour + lon / 15.0).rem_euclid(24.0)
}

pub fn is_daylight(lat: f64, lon: f64, utc_hour: f64, day_of_year: u32) -> bool {
    if !valid_geometry(lat, lon) || !utc_hour.is_finite() {
        return false;
    }
    daylight_window(lat, day_of_year).is_some_and(|w| w.contains(solar_hour(utc_hour, lon)))
}

/// Panel temperature derating factor.
pub fn temperature_factor(temperature_c: f64) -> f64 {
    let factor = if temperature_c > REFERENCE_TEMP_C {
        1.0 - HEAT_LOSS_PER_C * (temperature_c - REFERENCE_TEMP_C)
    } else if temperature_c < 0.0 {
        1.0 + COLD_GAIN_PER_C * (-temperature_c)
    } else {
        1.0
    };
    factor.clamp(TEMP_FACTOR_RANGE.0, TEMP_FACTOR_RANGE.1)
}

/// Fraction of the panel's clear-noon charging rate achievable at this hour, in `[0, 1]`.
///
/// `utc_hour` may be fractional. Invalid or non-finite input yields 0 rather than an error:
/// a missing solar term only makes the forecast more conservative.
pub fn efficiency(
    lat: f64,
    lon: f64,
    utc_hour: f64,
    cloud_cover_pct: f64,
    temperature_c: f64,
    day_of_year: u32,
) -> f64 {
    if !valid_geometry(lat, lon) || !utc_hour.is_finite() || !cloud_cover_pct.is_finite() || !temperature_c.is_finite()
    {
        return 0.0;
    }
    let Some(window) = daylight_window(lat, day_of_year) else {
        return 0.0;
    };
    let hour = solar_hour(utc_hour, lon);
    if !window.contains(hour) {
        return 0.0;
    }

    // -1 at sunrise, 0 at noon, +1 at sunset
    let offset = (hour - 12.0) / (window.length() / 2.0);
    let sun_proxy = (offset * PI / 2.0).cos().max(0.0);
    let base = MAX_BASE_EFFICIENCY * sun_proxy;

    let cloud_factor = (100.0 - cloud_cover_pct.clamp(0.0, 100.0)) / 100.0;

    (base * cloud_factor * temperature_factor(temperature_c)).clamp(0.0, 1.0)
}
