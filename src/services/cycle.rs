//! One collection cycle and the continuous loop around it.
//!
//! A cycle reloads every input from disk, checks due predictions, forecasts each node, appends
//! the new records and rewrites the report. Nothing is carried over in memory between cycles.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::AppError;
use crate::models::forecast::{AccuracyRecord, PredictionRecord};
use crate::models::report::{ForecastReport, NodeReport};
use crate::models::telemetry::{LocationTable, NodeId};
use crate::services::accuracy::AccuracyLedger;
use crate::services::battery_life::BatteryLifeEstimator;
use crate::services::forecast::{ForecastEngine, ForecastInput};
use crate::services::trend::TrendEstimator;
use crate::services::weather::WeatherSource;
use crate::store::append_log::AppendLog;
use crate::store::nodes::read_locations;
use crate::store::report::write_json;
use crate::store::telemetry::{TelemetryTable, read_telemetry};

const RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct ForecastCycle<W> {
    cfg: Config,
    weather: W,
    trend: TrendEstimator,
    engine: ForecastEngine,
    life: BatteryLifeEstimator,
    predictions: AppendLog<PredictionRecord>,
    accuracy: AppendLog<AccuracyRecord>,
}

/// Records produced for one node in one cycle.
struct NodeOutcome {
    report: NodeReport,
    predictions: Vec<PredictionRecord>,
    accuracy: Option<AccuracyRecord>,
}

impl<W: WeatherSource> ForecastCycle<W> {
    pub fn new(cfg: Config, weather: W) -> Self {
        ForecastCycle {
            trend: TrendEstimator::new(cfg.forecast.trend.clone()),
            engine: ForecastEngine::new(cfg.forecast.clone()),
            life: BatteryLifeEstimator::new(
                cfg.forecast.life.clone(),
                TrendEstimator::new(cfg.forecast.trend.clone()),
            ),
            predictions: AppendLog::new(cfg.predictions_csv.clone()),
            accuracy: AppendLog::new(cfg.accuracy_csv.clone()),
            cfg,
            weather,
        }
    }

    pub fn run_loop(&self, interval: Duration) {
        loop {
            let tick_start = Instant::now();

            if let Err(e) = self.run_once(Utc::now()) {
                error!("Cycle failed: {}; retrying in {}s", e, RETRY_DELAY.as_secs());
                thread::sleep(RETRY_DELAY);
                continue;
            }

            // Maintain steady cadence
            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }

    pub fn run_once(&self, now: DateTime<Utc>) -> Result<ForecastReport, AppError> {
        let cycle_start = Instant::now();
        let telemetry = read_telemetry(&self.cfg.telemetry_csv, self.cfg.max_history_records)?;
        let locations = match read_locations(&self.cfg.nodes_csv, self.cfg.default_location) {
            Ok(table) => table,
            Err(e) => {
                warn!("Node positions unavailable, continuing without them: {}", e);
                LocationTable::new(HashMap::new(), self.cfg.default_location)
            }
        };

        let mut past_predictions: HashMap<NodeId, Vec<PredictionRecord>> = HashMap::new();
        for record in self.predictions.read_all()? {
            past_predictions.entry(record.node_id.clone()).or_default().push(record);
        }
        let mut ledger = AccuracyLedger::from_records(
            self.accuracy.read_all()?,
            self.cfg.forecast.bias_window,
            self.cfg.forecast.match_tolerance,
        );
        debug!(
            "Loaded {} telemetry sample(s) for {} node(s), {} position(s), {} accuracy record(s)",
            telemetry.sample_count(),
            telemetry.node_count(),
            locations.len(),
            ledger.len()
        );

        let nodes = self.target_nodes(&telemetry);
        if nodes.is_empty() {
            warn!("No nodes to forecast: telemetry is empty and MONITORED_NODES is unset");
        }

        let mut reports = Vec::with_capacity(nodes.len());
        let mut new_predictions = Vec::new();
        let mut new_accuracy = Vec::new();
        for node in &nodes {
            let past = past_predictions.get(node).map(Vec::as_slice).unwrap_or_default();
            let outcome = self.process_node(node, &telemetry, &locations, past, &mut ledger, now);
            new_predictions.extend(outcome.predictions);
            new_accuracy.extend(outcome.accuracy);
            reports.push(outcome.report);
        }

        // Appends are at-most-once: a failed write is logged and the cycle carries on.
        if let Err(e) = self.accuracy.append(&new_accuracy) {
            error!("Failed to append {} accuracy record(s): {}", new_accuracy.len(), e);
        }
        if let Err(e) = self.predictions.append(&new_predictions) {
            error!("Failed to append {} prediction(s): {}", new_predictions.len(), e);
        }

        let report = ForecastReport {
            generated_at: now,
            generator: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            nodes: reports,
            predictions_logged: new_predictions.len(),
            accuracy_checks: new_accuracy.len(),
        };
        write_json(&self.cfg.report_json, &report)?;

        info!(
            "Cycle complete: nodes={}, forecasts={}, predictions_logged={}, accuracy_checks={}, took={}ms",
            report.nodes.len(),
            report.nodes.iter().filter(|n| !n.horizons.is_empty()).count(),
            report.predictions_logged,
            report.accuracy_checks,
            cycle_start.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Configured nodes in configured order, otherwise every node present in the telemetry.
    fn target_nodes(&self, telemetry: &TelemetryTable) -> Vec<NodeId> {
        if self.cfg.monitored_nodes.is_empty() {
            telemetry.node_ids().cloned().collect()
        } else {
            self.cfg.monitored_nodes.clone()
        }
    }

    fn process_node(
        &self,
        node: &NodeId,
        telemetry: &TelemetryTable,
        locations: &LocationTable,
        past_predictions: &[PredictionRecord],
        ledger: &mut AccuracyLedger,
        now: DateTime<Utc>,
    ) -> NodeOutcome {
        let history = telemetry.history(node);
        let latest_sample = telemetry.latest(node);
        let location = locations.get(node);
        let current = history.latest().map(|p| p.battery_pct);

        let accuracy = history
            .latest()
            .and_then(|reading| ledger.record(node, past_predictions, reading, now));
        let trend = self.trend.estimate(&history);

        let forecast = match current {
            Some(_) => {
                let weather = self.weather.conditions(location, now);
                self.engine.forecast(
                    &ForecastInput {
                        node_id: node,
                        current_battery: current,
                        trend,
                        location,
                        weather: &weather,
                        now,
                    },
                    ledger,
                )
            }
            None => {
                warn!(
                    "Node {}: no successful battery reading (last status {}), skipping forecast",
                    node,
                    latest_sample.map(|s| s.status.as_str()).unwrap_or("none")
                );
                None
            }
        };
        let battery_life = current.and_then(|c| self.life.hours_left(&history, c));

        if let Some(f) = &forecast {
            debug!(
                "Node {}: battery {:.1}%, trend {}, life {}, 6h/12h/24h = {}",
                node,
                f.current_battery_pct,
                trend
                    .map(|t| format!("{:.2}%/h ({})", t.rate_per_hour, t.confidence.as_str()))
                    .unwrap_or_else(|| "N/A".to_string()),
                battery_life.map(|l| l.to_string()).unwrap_or_else(|| "N/A".to_string()),
                f.horizons
                    .iter()
                    .map(|h| format!("{:.1}% {} {}", h.predicted_pct, h.icon, h.class.label()))
                    .collect::<Vec<_>>()
                    .join(" / ")
            );
        }

        let predictions = forecast.as_ref().map(|f| f.prediction_records()).unwrap_or_default();
        NodeOutcome {
            report: NodeReport::new(node.clone(), latest_sample, location, trend, battery_life, forecast),
            predictions,
            accuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForecastConfig, WeatherConfig};
    use crate::models::forecast::{Horizon, TrendClass};
    use crate::models::telemetry::{Location, WeatherConditions};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::fs;
    use std::path::Path;

    /// No weather at all: the solar term is always zero.
    struct NoWeather;

    impl WeatherSource for NoWeather {
        fn conditions(&self, _: Option<Location>, _: DateTime<Utc>) -> HashMap<Horizon, WeatherConditions> {
            HashMap::new()
        }
    }

    fn config(dir: &Path, monitored: &[&str]) -> Config {
        Config {
            monitored_nodes: monitored.iter().map(|n| NodeId::new(*n)).collect(),
            polling_interval: Duration::from_secs(300),
            telemetry_csv: dir.join("telemetry_log.csv"),
            nodes_csv: dir.join("nodes_log.csv"),
            predictions_csv: dir.join("power_predictions.csv"),
            accuracy_csv: dir.join("prediction_accuracy.csv"),
            report_json: dir.join("forecast_report.json"),
            max_history_records: 1000,
            default_location: None,
            weather: WeatherConfig {
                api_key: None,
                cache_dir: dir.join("weather_cache"),
                cache_ttl: Duration::from_secs(3600),
                timeout: Duration::from_secs(30),
            },
            forecast: ForecastConfig::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 21, 0, 0, 0).unwrap()
    }

    /// Hourly samples ending at `now()`.
    fn write_telemetry(dir: &Path, rows: &[(&str, &[f64])]) {
        let mut body = String::from("timestamp,address,status,battery,voltage,channel_util,tx_util,uptime\n");
        for (node, values) in rows {
            for (i, v) in values.iter().enumerate() {
                let at = now() - ChronoDuration::hours((values.len() - 1 - i) as i64);
                body.push_str(&format!(
                    "{},{},success,{},4.0,10,2,1000\n",
                    at.format("%Y-%m-%dT%H:%M:%S"),
                    node,
                    v
                ));
            }
        }
        fs::write(dir.join("telemetry_log.csv"), body).unwrap();
    }

    #[test]
    fn forecasts_and_logs_each_node() {
        let dir = tempfile::tempdir().unwrap();
        write_telemetry(dir.path(), &[("!9eed0410", &[90.0, 88.0, 86.0]), ("!2c9e092b", &[50.0])]);
        let cycle = ForecastCycle::new(config(dir.path(), &[]), NoWeather);

        let report = cycle.run_once(now()).unwrap();
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.predictions_logged, 6);
        assert_eq!(report.accuracy_checks, 0);

        let tower = report.nodes.iter().find(|n| n.node_id.0 == "!9eed0410").unwrap();
        assert_eq!(tower.current_battery_pct, Some(86.0));
        assert_eq!(tower.battery_life_label, "~43");
        assert_eq!(tower.horizons.len(), 3);
        // midnight, no solar: 86 - 1.5 * 6
        assert_eq!(tower.horizons[0].predicted_pct, 77.0);
        assert_eq!(tower.horizons[0].class, TrendClass::DrainingFast);

        let single = report.nodes.iter().find(|n| n.node_id.0 == "!2c9e092b").unwrap();
        assert_eq!(single.trend_label, "N/A");
        assert_eq!(single.battery_life_label, "N/A");
        assert_eq!(single.horizons.len(), 3);

        let logged = AppendLog::<PredictionRecord>::new(dir.path().join("power_predictions.csv"))
            .read_all()
            .unwrap();
        assert_eq!(logged.len(), 6);
        assert!(dir.path().join("forecast_report.json").exists());
    }

    #[test]
    fn monitored_node_without_data_is_reported_not_forecast() {
        let dir = tempfile::tempdir().unwrap();
        write_telemetry(dir.path(), &[("!9eed0410", &[90.0, 88.0])]);
        let cycle = ForecastCycle::new(config(dir.path(), &["!deadbeef"]), NoWeather);

        let report = cycle.run_once(now()).unwrap();
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.nodes[0].node_id, NodeId::new("!deadbeef"));
        assert!(report.nodes[0].horizons.is_empty());
        assert_eq!(report.predictions_logged, 0);
        assert!(!dir.path().join("power_predictions.csv").exists());
    }

    #[test]
    fn due_predictions_feed_back_into_the_next_forecast() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeId::new("!9eed0410");
        let made_at = now() - ChronoDuration::hours(6);
        AppendLog::new(dir.path().join("power_predictions.csv"))
            .append(&[PredictionRecord {
                made_at,
                node_id: node.clone(),
                horizon_hours: 6,
                predicted_pct: 80.0,
                current_battery_at_prediction: 89.0,
                weather_description: "clear sky".to_string(),
            }])
            .unwrap();
        write_telemetry(dir.path(), &[("!9eed0410", &[90.0, 88.0, 86.0, 84.0, 82.0, 80.0, 78.0])]);
        let cycle = ForecastCycle::new(config(dir.path(), &[]), NoWeather);

        let report = cycle.run_once(now()).unwrap();
        assert_eq!(report.accuracy_checks, 1);
        let six = &report.nodes[0].horizons[0];
        // error +2 => 78 - 9 - 2
        assert_eq!(six.bias, 2.0);
        assert_eq!(six.predicted_pct, 67.0);
        assert_eq!(six.accuracy_pct, Some(98.0));

        // a second run at the same instant finds nothing new to check
        let again = cycle.run_once(now()).unwrap();
        assert_eq!(again.accuracy_checks, 0);
        assert_eq!(again.nodes[0].horizons[0].predicted_pct, 67.0);

        let accuracy = AppendLog::<AccuracyRecord>::new(dir.path().join("prediction_accuracy.csv"))
            .read_all()
            .unwrap();
        assert_eq!(accuracy.len(), 1);
        assert_eq!(accuracy[0].error_6h, Some(2.0));
        assert_eq!(accuracy[0].prediction_made_at, made_at);
    }

    #[test]
    fn silent_node_is_not_scored_against_its_last_reading() {
        let dir = tempfile::tempdir().unwrap();
        let last_heard = now() - ChronoDuration::hours(10);
        fs::write(
            dir.path().join("telemetry_log.csv"),
            format!(
                "timestamp,address,status,battery,voltage,channel_util,tx_util,uptime\n{},!9eed0410,success,80,4.0,10,2,1000\n",
                last_heard.format("%Y-%m-%dT%H:%M:%S")
            ),
        )
        .unwrap();
        let cycle = ForecastCycle::new(config(dir.path(), &[]), NoWeather);

        let earlier = cycle.run_once(now() - ChronoDuration::hours(6)).unwrap();
        assert_eq!(earlier.predictions_logged, 3);

        // the 6h prediction is due now, but nothing has arrived since it was made
        let report = cycle.run_once(now()).unwrap();
        assert_eq!(report.accuracy_checks, 0);
        let six = &report.nodes[0].horizons[0];
        assert_eq!(six.bias, 0.0);
        assert_eq!(six.accuracy_pct, None);
        assert_eq!(six.predicted_pct, 71.0);
        assert!(!dir.path().join("prediction_accuracy.csv").exists());
    }

    #[test]
    fn missing_inputs_still_produce_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let cycle = ForecastCycle::new(config(dir.path(), &[]), NoWeather);
        let report = cycle.run_once(now()).unwrap();
        assert!(report.nodes.is_empty());
        assert!(dir.path().join("forecast_report.json").exists());
    }
}
