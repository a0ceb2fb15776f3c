//! Per-horizon weather for the forecast engine.
//!
//! The provider never fails: a missing key, missing location or any API error degrades to
//! synthetic conditions for the affected horizons.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::HashMap;

use crate::client::OpenWeatherClient;
use crate::models::forecast::Horizon;
use crate::models::openweather::ForecastResponse;
use crate::models::telemetry::{Location, WeatherConditions};
use crate::services::synthetic_weather;

/// Provider forecasts come in 3 hour steps; anything further away is not "this hour".
const MAX_ENTRY_GAP_HOURS: i64 = 3;

pub trait WeatherSource {
    fn conditions(&self, location: Option<Location>, now: DateTime<Utc>) -> HashMap<Horizon, WeatherConditions>;
}

/// OpenWeatherMap when configured, synthetic otherwise.
pub struct WeatherProvider {
    client: Option<OpenWeatherClient>,
}

impl WeatherProvider {
    pub fn new(client: Option<OpenWeatherClient>) -> Self {
        WeatherProvider { client }
    }

    pub fn synthetic_only() -> Self {
        WeatherProvider { client: None }
    }

    pub fn is_live(&self) -> bool {
        self.client.is_some()
    }

    fn fetch(&self, location: Option<Location>) -> Option<ForecastResponse> {
        let client = self.client.as_ref()?;
        let location = location.filter(Location::is_valid)?;
        match client.get_forecast(location) {
            Ok(resp) => Some(resp),
            Err(e) => {
                warn!(
                    "Weather: API failed for ({:.4}, {:.4}), using synthetic data: {}",
                    location.latitude, location.longitude, e
                );
                None
            }
        }
    }
}

impl WeatherSource for WeatherProvider {
    fn conditions(&self, location: Option<Location>, now: DateTime<Utc>) -> HashMap<Horizon, WeatherConditions> {
        let live = self.fetch(location);
        Horizon::ALL
            .into_iter()
            .map(|horizon| {
                let at = now + horizon.duration();
                let conditions = live
                    .as_ref()
                    .and_then(|resp| resp.conditions_near(at, Duration::hours(MAX_ENTRY_GAP_HOURS)))
                    .unwrap_or_else(|| {
                        if live.is_some() {
                            debug!("Weather: no provider entry near {}, using synthetic data", at);
                        }
                        synthetic_weather::conditions_at(location, at)
                    });
                (horizon, conditions)
            })
            .collect()
    }
}
