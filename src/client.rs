//! Blocking OpenWeatherMap forecast client with an on-disk response cache.
//!
//! - Uses `ureq` (no async).
//! - Raw response bodies are cached per location under the configured directory and reused
//!   while younger than the TTL, so a short polling interval does not burn API quota.
//! - Decoding goes through `serde_path_to_error` so a schema mismatch names the offending field.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::WeatherConfig;
use crate::error::WeatherError;
use crate::models::openweather::ForecastResponse;
use crate::models::telemetry::Location;

const BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

pub struct OpenWeatherClient {
    agent: ureq::Agent,
    api_key: String,
    cache_dir: PathBuf,
    cache_ttl: Duration,
}

impl OpenWeatherClient {
    /// `None` when no API key is configured.
    pub fn from_config(cfg: &WeatherConfig) -> Option<Self> {
        let api_key = cfg.api_key.clone()?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(cfg.timeout))
            .build()
            .into();
        Some(OpenWeatherClient {
            agent,
            api_key,
            cache_dir: cfg.cache_dir.clone(),
            cache_ttl: cfg.cache_ttl,
        })
    }

    pub fn cache_path(&self, location: Location) -> PathBuf {
        cache_file(&self.cache_dir, location)
    }

    /// 5 day / 3 hour forecast for a location, served from cache when fresh.
    pub fn get_forecast(&self, location: Location) -> Result<ForecastResponse, WeatherError> {
        let cache_path = self.cache_path(location);
        if let Some(body) = read_fresh(&cache_path, self.cache_ttl)? {
            debug!("Weather: cache hit {}", cache_path.display());
            match decode::<ForecastResponse>(&body) {
                Ok(resp) => return Ok(resp),
                Err(e) => warn!("Weather: ignoring unreadable cache {}: {}", cache_path.display(), e),
            }
        }

        let body = self.get_body(
            "/forecast",
            &[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("units", "metric".to_string()),
            ],
        )?;
        let resp: ForecastResponse = decode(&body)?;
        if resp.list.is_empty() {
            return Err(WeatherError::Empty);
        }

        fs::create_dir_all(&self.cache_dir)?;
        fs::write(&cache_path, &body)?;
        debug!("Weather: cached {} entries in {}", resp.list.len(), cache_path.display());
        Ok(resp)
    }

    fn get_body(&self, path: &str, query: &[(&str, String)]) -> Result<String, WeatherError> {
        let url = format!("{}{}", BASE_URL, path);
        let mut req = self.agent.get(&url).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(k, v);
        }
        req = req.query("appid", &self.api_key);

        match req.call() {
            Ok(mut res) => res
                .body_mut()
                .read_to_string()
                .map_err(|e| WeatherError::Transport(e.to_string())),
            Err(ureq::Error::StatusCode(status)) => Err(WeatherError::Http {
                status,
                reason: http::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unknown status")
                    .to_string(),
            }),
            Err(e) => Err(WeatherError::Transport(e.to_string())),
        }
    }
}

/// One cache file per rounded location; 4 decimals is about 10 m.
pub fn cache_file(dir: &Path, location: Location) -> PathBuf {
    dir.join(format!("weather_{:.4}_{:.4}.json", location.latitude, location.longitude))
}

/// Cached body if the file exists and is younger than `ttl`.
fn read_fresh(path: &Path, ttl: Duration) -> Result<Option<String>, WeatherError> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let age = meta
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::MAX);
    if age >= ttl {
        return Ok(None);
    }
    Ok(Some(fs::read_to_string(path)?))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, WeatherError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    Ok(serde_path_to_error::deserialize(de)?)
}
