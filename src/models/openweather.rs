//! Subset of the OpenWeatherMap 5 day / 3 hour forecast response.
//!
//! Only the fields the solar model consumes are modelled; everything else is ignored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::telemetry::WeatherConditions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub list: Vec<ForecastEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    /// Unix seconds.
    pub dt: i64,
    pub main: MainReadings,
    #[serde(default)]
    pub weather: Vec<WeatherDescription>,
    #[serde(default)]
    pub clouds: Option<Clouds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainReadings {
    /// Celsius when requested with `units=metric`.
    pub temp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDescription {
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clouds {
    /// Cloudiness, %.
    pub all: f64,
}

impl ForecastEntry {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.dt, 0)
    }

    pub fn to_conditions(&self) -> Option<WeatherConditions> {
        let forecast_time = self.time()?;
        let condition = self
            .weather
            .first()
            .map(|w| if w.description.is_empty() { w.main.clone() } else { w.description.clone() })
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Some(WeatherConditions {
            cloud_cover_pct: self.clouds.as_ref().map_or(0.0, |c| c.all.clamp(0.0, 100.0)),
            temperature_c: self.main.temp,
            condition,
            forecast_time,
            synthetic: false,
        })
    }
}

impl ForecastResponse {
    /// Entry closest to `at`, provided it lies within `max_gap` of it.
    pub fn conditions_near(&self, at: DateTime<Utc>, max_gap: Duration) -> Option<WeatherConditions> {
        self.list
            .iter()
            .filter_map(|entry| entry.time().map(|t| (entry, (t - at).abs())))
            .filter(|(_, gap)| *gap <= max_gap)
            .min_by_key(|(_, gap)| *gap)
            .and_then(|(entry, _)| entry.to_conditions())
    }
}
