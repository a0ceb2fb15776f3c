//! Bounded 6/12/24 hour battery projections.
//!
//! `current + solar gain - baseline consumption - ledger bias`, clamped and classified per
//! horizon. The engine is pure: persisting the resulting prediction records is the cycle's job.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::collections::HashMap;

use crate::config::ForecastConfig;
use crate::models::forecast::{Horizon, HorizonForecast, NodeForecast, TrendClass, TrendEstimate};
use crate::models::telemetry::{Location, NodeId, WeatherConditions};
use crate::services::accuracy::AccuracyLedger;
use crate::services::solar;
use crate::utils::{clamp_pct, mean, round1};

const NO_WEATHER: &str = "no weather data";

/// Everything known about one node at forecast time.
#[derive(Debug, Clone)]
pub struct ForecastInput<'a> {
    pub node_id: &'a NodeId,
    pub current_battery: Option<f64>,
    pub trend: Option<TrendEstimate>,
    pub location: Option<Location>,
    pub weather: &'a HashMap<Horizon, WeatherConditions>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    cfg: ForecastConfig,
}

/// Daylight hours and mean solar efficiency over one horizon.
#[derive(Debug, Copy, Clone, PartialEq)]
struct SolarOutlook {
    daylight_hours: u32,
    mean_efficiency: f64,
}

impl ForecastEngine {
    pub fn new(cfg: ForecastConfig) -> Self {
        ForecastEngine { cfg }
    }

    /// `None` when the node has no usable current battery reading.
    pub fn forecast(&self, input: &ForecastInput<'_>, ledger: &AccuracyLedger) -> Option<NodeForecast> {
        let current = input.current_battery.filter(|b| b.is_finite()).map(clamp_pct)?;
        let location = input.location.filter(Location::is_valid);

        let horizons = Horizon::ALL
            .into_iter()
            .map(|horizon| {
                let weather = input.weather.get(&horizon);
                let outlook = self.solar_outlook(location, weather, input.now, horizon);

                let solar_rate = self.cfg.max_solar_generation_per_hour * outlook.mean_efficiency;
                let hours = f64::from(horizon.hours());
                let raw = current + solar_rate * f64::from(outlook.daylight_hours)
                    - self.cfg.base_consumption_per_hour * hours;
                let bias = ledger.bias(input.node_id, horizon);
                let corrected = clamp_pct(raw - bias);
                let class = self.classify(current, corrected);

                HorizonForecast {
                    horizon_hours: horizon.hours(),
                    predicted_pct: round1(corrected),
                    class,
                    icon: class.icon(),
                    daylight_hours: outlook.daylight_hours,
                    solar_efficiency: outlook.mean_efficiency,
                    bias,
                    accuracy_pct: ledger.accuracy_pct(input.node_id, horizon).map(round1),
                    weather_description: weather
                        .map(WeatherConditions::describe)
                        .unwrap_or_else(|| NO_WEATHER.to_string()),
                }
            })
            .collect();

        Some(NodeForecast {
            node_id: input.node_id.clone(),
            made_at: input.now,
            current_battery_pct: current,
            trend: input.trend,
            horizons,
        })
    }

    fn classify(&self, current: f64, predicted: f64) -> TrendClass {
        if predicted > current + self.cfg.charging_margin {
            TrendClass::Charging
        } else if predicted < current - self.cfg.draining_margin {
            TrendClass::DrainingFast
        } else {
            TrendClass::Stable
        }
    }

    /// Walk the next `horizon` hours from the current hour and collect the daylight ones.
    ///
    /// Without a valid location the fixed fallback window decides what counts as daylight and
    /// the solar term is zero; without weather the efficiency is zero as well.
    fn solar_outlook(
        &self,
        location: Option<Location>,
        weather: Option<&WeatherConditions>,
        now: DateTime<Utc>,
        horizon: Horizon,
    ) -> SolarOutlook {
        let mut daylight_hours = 0;
        let mut efficiencies = Vec::new();

        for step in 0..horizon.hours() {
            let at = now + Duration::hours(i64::from(step));
            let utc_hour = f64::from(at.hour()) + f64::from(at.minute()) / 60.0;
            let day_of_year = at.ordinal();

            match location {
                Some(loc) => {
                    if solar::is_daylight(loc.latitude, loc.longitude, utc_hour, day_of_year) {
                        daylight_hours += 1;
                        efficiencies.push(weather.map_or(0.0, |w| {
                            solar::efficiency(
                                loc.latitude,
                                loc.longitude,
                                utc_hour,
                                w.cloud_cover_pct,
                                w.temperature_c,
                                day_of_year,
                            )
                        }));
                    }
                }
                None => {
                    let (start, end) = self.cfg.fallback_daylight;
                    if (start..end).contains(&at.hour()) {
                        daylight_hours += 1;
                    }
                }
            }
        }

        SolarOutlook {
            daylight_hours,
            mean_efficiency: mean(&efficiencies).unwrap_or(0.0),
        }
    }
}
