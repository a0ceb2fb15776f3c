//! Runtime configuration read from the environment (optionally seeded from a `.env` file).
//! Defaults match the file layout the mesh collector writes into its working directory.

use crate::error::ConfigError;
use crate::models::telemetry::{Location, NodeId};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLLING_SECS: u64 = 300;
pub const DEFAULT_TELEMETRY_CSV: &str = "telemetry_log.csv";
pub const DEFAULT_NODES_CSV: &str = "nodes_log.csv";
pub const DEFAULT_PREDICTIONS_CSV: &str = "power_predictions.csv";
pub const DEFAULT_ACCURACY_CSV: &str = "prediction_accuracy.csv";
pub const DEFAULT_REPORT_JSON: &str = "forecast_report.json";
pub const DEFAULT_MAX_HISTORY_RECORDS: usize = 1000;
pub const DEFAULT_WEATHER_CACHE_DIR: &str = "weather_cache";
pub const DEFAULT_WEATHER_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_WEATHER_TIMEOUT_SECS: u64 = 30;

/// Sample-window policy of the trend estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendConfig {
    /// Window used once `large_history_threshold` samples exist.
    pub large_window: usize,
    pub large_history_threshold: usize,
    /// Window used once `medium_history_threshold` samples exist.
    pub medium_window: usize,
    pub medium_history_threshold: usize,
    /// Endpoint method is skipped below this span.
    pub min_endpoint_hours: f64,
    /// Pairwise method ignores pairs at or below this gap.
    pub min_pair_hours: f64,
    pub high_confidence_window: usize,
    pub high_confidence_samples: usize,
    pub medium_confidence_window: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            large_window: 8,
            large_history_threshold: 10,
            medium_window: 5,
            medium_history_threshold: 5,
            min_endpoint_hours: 0.5,
            min_pair_hours: 0.1,
            high_confidence_window: 6,
            high_confidence_samples: 8,
            medium_confidence_window: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryLifeConfig {
    /// Below this drain rate (%/h) long countdowns are bucketed.
    pub slow_drain_rate: f64,
    /// Above this drain rate (%/h) the estimate is flagged as fast drain.
    pub fast_drain_rate: f64,
    pub one_month_hours: f64,
    pub three_months_hours: f64,
}

impl Default for BatteryLifeConfig {
    fn default() -> Self {
        BatteryLifeConfig {
            slow_drain_rate: 0.1,
            fast_drain_rate: 10.0,
            one_month_hours: 720.0,
            three_months_hours: 2160.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub trend: TrendConfig,
    pub life: BatteryLifeConfig,
    /// Device baseline drain (%/h), independent of trend data.
    pub base_consumption_per_hour: f64,
    /// Solar charge rate (%/h) at efficiency 1.0.
    pub max_solar_generation_per_hour: f64,
    /// Accuracy records considered per (node, horizon).
    pub bias_window: usize,
    /// How late after its due time a prediction may still be checked.
    pub match_tolerance: chrono::Duration,
    /// Prediction above `current + charging_margin` is shown as charging.
    pub charging_margin: f64,
    /// Prediction below `current - draining_margin` is shown as draining fast.
    pub draining_margin: f64,
    /// Daylight hours assumed when no valid location is known, `[start, end)` in local hours.
    pub fallback_daylight: (u32, u32),
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            trend: TrendConfig::default(),
            life: BatteryLifeConfig::default(),
            base_consumption_per_hour: 1.5,
            max_solar_generation_per_hour: 3.0,
            bias_window: 10,
            match_tolerance: chrono::Duration::minutes(30),
            charging_margin: 2.0,
            draining_margin: 5.0,
            fallback_daylight: (6, 18),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    /// Empty key means synthetic weather only.
    pub api_key: Option<String>,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Empty list means every node that appears in the telemetry.
    pub monitored_nodes: Vec<NodeId>,
    pub polling_interval: Duration,
    pub telemetry_csv: PathBuf,
    pub nodes_csv: PathBuf,
    pub predictions_csv: PathBuf,
    pub accuracy_csv: PathBuf,
    pub report_json: PathBuf,
    pub max_history_records: usize,
    /// Position assumed for nodes that never reported GPS.
    pub default_location: Option<Location>,
    pub weather: WeatherConfig,
    pub forecast: ForecastConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let path = |key: &str, default: &str| PathBuf::from(get(key).unwrap_or_else(|| default.to_string()));

        let monitored_nodes = get("MONITORED_NODES")
            .map(|raw| {
                raw.split(',')
                    .map(|addr| addr.trim().trim_matches(|c| c == '"' || c == '\''))
                    .filter(|addr| !addr.is_empty())
                    .map(NodeId::new)
                    .collect()
            })
            .unwrap_or_default();

        let polling_secs: u64 = parse_var(&get, "POLLING_INTERVAL", "a number of seconds", DEFAULT_POLLING_SECS)?;

        let default_location = match (get("DEFAULT_LATITUDE"), get("DEFAULT_LONGITUDE")) {
            (Some(lat), Some(lon)) => {
                let latitude = parse_value("DEFAULT_LATITUDE", "a latitude in degrees", &lat)?;
                let longitude = parse_value("DEFAULT_LONGITUDE", "a longitude in degrees", &lon)?;
                Some(Location::new(latitude, longitude))
            }
            _ => None,
        };

        let weather = WeatherConfig {
            api_key: get("WEATHER_API_KEY"),
            cache_dir: path("WEATHER_CACHE_DIR", DEFAULT_WEATHER_CACHE_DIR),
            cache_ttl: Duration::from_secs(parse_var(
                &get,
                "WEATHER_CACHE_TTL",
                "a number of seconds",
                DEFAULT_WEATHER_CACHE_TTL_SECS,
            )?),
            timeout: Duration::from_secs(parse_var(
                &get,
                "WEATHER_TIMEOUT",
                "a number of seconds",
                DEFAULT_WEATHER_TIMEOUT_SECS,
            )?),
        };

        let defaults = ForecastConfig::default();
        let tolerance_mins: i64 = parse_var(
            &get,
            "ACCURACY_MATCH_TOLERANCE_MINS",
            "a number of minutes",
            defaults.match_tolerance.num_minutes(),
        )?;
        let forecast = ForecastConfig {
            base_consumption_per_hour: parse_var(
                &get,
                "FORECAST_BASE_CONSUMPTION",
                "a rate in %/hour",
                defaults.base_consumption_per_hour,
            )?,
            max_solar_generation_per_hour: parse_var(
                &get,
                "FORECAST_MAX_SOLAR_GENERATION",
                "a rate in %/hour",
                defaults.max_solar_generation_per_hour,
            )?,
            bias_window: parse_var(&get, "ACCURACY_BIAS_WINDOW", "a record count", defaults.bias_window)?,
            match_tolerance: chrono::Duration::minutes(tolerance_mins),
            ..defaults
        };

        Ok(Config {
            monitored_nodes,
            polling_interval: Duration::from_secs(polling_secs),
            telemetry_csv: path("TELEMETRY_CSV", DEFAULT_TELEMETRY_CSV),
            nodes_csv: path("NODES_CSV", DEFAULT_NODES_CSV),
            predictions_csv: path("PREDICTIONS_CSV", DEFAULT_PREDICTIONS_CSV),
            accuracy_csv: path("ACCURACY_CSV", DEFAULT_ACCURACY_CSV),
            report_json: path("REPORT_JSON", DEFAULT_REPORT_JSON),
            max_history_records: parse_var(
                &get,
                "MAX_HISTORY_RECORDS",
                "a record count",
                DEFAULT_MAX_HISTORY_RECORDS,
            )?,
            default_location,
            weather,
            forecast,
        })
    }
}

fn parse_var<T, G>(get: &G, var: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => parse_value(var, expected, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &'static str, expected: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value: raw.to_string(),
    })
}

/// `DEBUG_MODE` is needed before the logger exists, so it is read apart from `Config`.
pub fn debug_mode_from_env() -> bool {
    debug_mode_from_lookup(|key| std::env::var(key).ok())
}

pub fn debug_mode_from_lookup<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup("DEBUG_MODE").is_some_and(|v| parse_bool(v.trim()))
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Read `KEY=value` assignments from a `.env` file.
///
/// Supports `export` prefixes, single/double quoted values and trailing `# comments`; blank and
/// comment lines are skipped. Returned in file order; the caller decides precedence.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::EnvFile(format!("failed to read {}: {}", path.display(), e)))?;

    let mut assignments = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let parsed = parse_env_line(line)
            .map_err(|e| ConfigError::EnvFile(format!("{}:{}: {}", path.display(), index + 1, e)))?;
        if let Some(pair) = parsed {
            assignments.push(pair);
        }
    }
    Ok(assignments)
}

fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let body = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw_value) = body.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }

    let raw_value = raw_value.trim();
    let value = match raw_value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let rest = &raw_value[1..];
            let end = rest
                .find(quote)
                .ok_or_else(|| format!("unterminated {} quoted value", quote))?;
            let remainder = rest[end + 1..].trim();
            if !(remainder.is_empty() || remainder.starts_with('#')) {
                return Err("unexpected characters after closing quote".to_string());
            }
            rest[..end].to_string()
        }
        _ => raw_value.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn debug_mode_accepts_common_truthy_values() {
        let debug = |value: Option<&str>| debug_mode_from_lookup(|_| value.map(str::to_string));
        assert!(debug(Some("TRUE")));
        assert!(debug(Some(" yes ")));
        assert!(debug(Some("1")));
        assert!(!debug(Some("false")));
        assert!(!debug(Some("")));
        assert!(!debug(None));
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config_from(&[]).unwrap();
        assert!(cfg.monitored_nodes.is_empty());
        assert_eq!(cfg.polling_interval, Duration::from_secs(300));
        assert_eq!(cfg.telemetry_csv, PathBuf::from("telemetry_log.csv"));
        assert_eq!(cfg.weather.api_key, None);
        assert_eq!(cfg.default_location, None);
        assert_eq!(cfg.forecast, ForecastConfig::default());
    }

    #[test]
    fn parses_nodes_and_overrides() {
        let cfg = config_from(&[
            ("MONITORED_NODES", "\"!9eed0410\", '!2c9e092b',,"),
            ("POLLING_INTERVAL", "60"),
            ("DEFAULT_LATITUDE", "50.1109"),
            ("DEFAULT_LONGITUDE", "8.6821"),
            ("FORECAST_BASE_CONSUMPTION", "2.0"),
            ("ACCURACY_BIAS_WINDOW", "5"),
            ("ACCURACY_MATCH_TOLERANCE_MINS", "45"),
        ])
        .unwrap();
        assert_eq!(cfg.monitored_nodes, vec![NodeId::new("!9eed0410"), NodeId::new("!2c9e092b")]);
        assert_eq!(cfg.polling_interval, Duration::from_secs(60));
        assert_eq!(cfg.default_location, Some(Location::new(50.1109, 8.6821)));
        assert_eq!(cfg.forecast.base_consumption_per_hour, 2.0);
        assert_eq!(cfg.forecast.bias_window, 5);
        assert_eq!(cfg.forecast.match_tolerance, chrono::Duration::minutes(45));
        assert_eq!(cfg.forecast.max_solar_generation_per_hour, 3.0);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = config_from(&[("POLLING_INTERVAL", "soon")]).unwrap_err();
        assert!(err.to_string().contains("POLLING_INTERVAL"));
    }

    #[test]
    fn env_lines_with_comments_and_quotes() {
        assert_eq!(
            parse_env_line("POLLING_INTERVAL=300          # Time between cycles").unwrap(),
            Some(("POLLING_INTERVAL".to_string(), "300".to_string()))
        );
        assert_eq!(
            parse_env_line("export MONITORED_NODES=\"!9eed0410,!2c9e092b\"").unwrap(),
            Some(("MONITORED_NODES".to_string(), "!9eed0410,!2c9e092b".to_string()))
        );
        assert_eq!(
            parse_env_line("WEATHER_API_KEY='a#b' # key").unwrap(),
            Some(("WEATHER_API_KEY".to_string(), "a#b".to_string()))
        );
        assert_eq!(parse_env_line("# comment").unwrap(), None);
        assert_eq!(parse_env_line("").unwrap(), None);
        assert!(parse_env_line("NO_EQUALS").is_err());
        assert!(parse_env_line("KEY=\"open").is_err());
    }

    #[test]
    fn reads_env_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# settings\nDEBUG_MODE=true\n\nTELEMETRY_CSV=data/telemetry.csv\n").unwrap();
        let pairs = read_env_file(&path).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("DEBUG_MODE".to_string(), "true".to_string()),
                ("TELEMETRY_CSV".to_string(), "data/telemetry.csv".to_string()),
            ]
        );
    }
}
