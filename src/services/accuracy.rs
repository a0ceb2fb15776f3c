//! Prediction-error feedback.
//!
//! Predictions that have come due are compared with the node's newest reading; the rolling mean
//! of the last `window` signed errors per (node, horizon) becomes the bias subtracted from the
//! next raw forecast. Older records fall out of the window entirely.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;

use crate::models::forecast::{AccuracyRecord, Horizon, PredictionRecord};
use crate::models::telemetry::{BatteryPoint, NodeId};
use crate::utils::{clamp_pct, mean};

#[derive(Debug, Clone)]
pub struct AccuracyLedger {
    window: usize,
    match_tolerance: Duration,
    /// Per node, in append order (oldest first).
    by_node: HashMap<NodeId, Vec<AccuracyRecord>>,
}

impl AccuracyLedger {
    pub fn new(window: usize, match_tolerance: Duration) -> Self {
        AccuracyLedger {
            window,
            match_tolerance,
            by_node: HashMap::new(),
        }
    }

    /// Rebuild from the persisted log, which is already in append order.
    pub fn from_records(records: impl IntoIterator<Item = AccuracyRecord>, window: usize, match_tolerance: Duration) -> Self {
        let mut ledger = Self::new(window, match_tolerance);
        for record in records {
            ledger.push(record);
        }
        ledger
    }

    pub fn push(&mut self, record: AccuracyRecord) {
        self.by_node.entry(record.node_id.clone()).or_default().push(record);
    }

    pub fn len(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    /// Most recent errors for this node and horizon, newest first, at most `window` of them.
    pub fn recent_errors(&self, node: &NodeId, horizon: Horizon) -> Vec<f64> {
        self.by_node
            .get(node)
            .map(|records| {
                records
                    .iter()
                    .rev()
                    .filter_map(|r| r.error(horizon).filter(|e| e.is_finite()))
                    .take(self.window)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Signed correction to subtract from a raw prediction; 0 without history.
    pub fn bias(&self, node: &NodeId, horizon: Horizon) -> f64 {
        mean(&self.recent_errors(node, horizon)).unwrap_or(0.0)
    }

    /// `100 - mean absolute error`, floored at 0.
    pub fn accuracy_pct(&self, node: &NodeId, horizon: Horizon) -> Option<f64> {
        let abs_errors: Vec<f64> = self.recent_errors(node, horizon).iter().map(|e| e.abs()).collect();
        mean(&abs_errors).map(|mae| (100.0 - mae).max(0.0))
    }

    pub fn last_checked(&self, node: &NodeId) -> Option<DateTime<Utc>> {
        self.by_node
            .get(node)
            .and_then(|records| records.iter().map(|r| r.checked_at).max())
    }

    /// Compare predictions that fell due since the node's previous check with `reading`.
    ///
    /// For each horizon the prediction whose due time is nearest to `now` (and no later than
    /// `now`, no earlier than `now - match_tolerance`) is used. The reading only counts as the
    /// outcome if it was taken after the prediction was made and within `match_tolerance` of the
    /// due time; a silent node is never scored against its old reading. The resulting record is
    /// added to the ledger and returned for persistence; `None` when nothing was due.
    pub fn record(
        &mut self,
        node: &NodeId,
        predictions: &[PredictionRecord],
        reading: &BatteryPoint,
        now: DateTime<Utc>,
    ) -> Option<AccuracyRecord> {
        let last_checked = self.last_checked(node);
        let actual = clamp_pct(reading.battery_pct);

        let matched: Vec<(Horizon, &PredictionRecord)> = Horizon::ALL
            .into_iter()
            .filter_map(|horizon| {
                predictions
                    .iter()
                    .filter(|p| &p.node_id == node && p.horizon() == Some(horizon))
                    .filter(|p| {
                        let due = p.due_at();
                        due <= now && due >= now - self.match_tolerance && last_checked.is_none_or(|last| due > last)
                    })
                    .filter(|p| {
                        reading.timestamp > p.made_at
                            && (reading.timestamp - p.due_at()).abs() <= self.match_tolerance
                    })
                    .max_by_key(|p| p.due_at())
                    .map(|p| (horizon, p))
            })
            .collect();

        let (_, anchor) = matched.first()?;
        let mut record = AccuracyRecord {
            checked_at: now,
            node_id: node.clone(),
            prediction_made_at: anchor.made_at,
            predicted_6h: None,
            actual_6h: None,
            predicted_12h: None,
            actual_12h: None,
            predicted_24h: None,
            actual_24h: None,
            error_6h: None,
            error_12h: None,
            error_24h: None,
            weather_description: anchor.weather_description.clone(),
        };

        for (horizon, prediction) in &matched {
            let predicted = clamp_pct(prediction.predicted_pct);
            let error = predicted - actual;
            let (p, a, e) = match horizon {
                Horizon::H6 => (&mut record.predicted_6h, &mut record.actual_6h, &mut record.error_6h),
                Horizon::H12 => (&mut record.predicted_12h, &mut record.actual_12h, &mut record.error_12h),
                Horizon::H24 => (&mut record.predicted_24h, &mut record.actual_24h, &mut record.error_24h),
            };
            *p = Some(predicted);
            *a = Some(actual);
            *e = Some(error);
            debug!(
                "Accuracy: node {} {}h predicted {:.1}% actual {:.1}% error {:+.1}",
                node,
                horizon.hours(),
                predicted,
                actual,
                error
            );
        }

        self.push(record.clone());
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn node() -> NodeId {
        NodeId::new("!9eed0410")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 18, 0, 0).unwrap()
    }

    fn ledger() -> AccuracyLedger {
        AccuracyLedger::new(10, Duration::minutes(30))
    }

    fn reading_at(timestamp: DateTime<Utc>, battery_pct: f64) -> BatteryPoint {
        BatteryPoint { timestamp, battery_pct }
    }

    fn reading(battery_pct: f64) -> BatteryPoint {
        reading_at(now(), battery_pct)
    }

    fn record_with_error(node: &NodeId, minutes: i64, error_6h: f64) -> AccuracyRecord {
        AccuracyRecord {
            checked_at: now() + Duration::minutes(minutes),
            node_id: node.clone(),
            prediction_made_at: now() + Duration::minutes(minutes) - Duration::hours(6),
            predicted_6h: Some(70.0 + error_6h),
            actual_6h: Some(70.0),
            predicted_12h: None,
            actual_12h: None,
            predicted_24h: None,
            actual_24h: None,
            error_6h: Some(error_6h),
            error_12h: None,
            error_24h: None,
            weather_description: "clear sky".to_string(),
        }
    }

    fn prediction(made_at: DateTime<Utc>, horizon_hours: u32, predicted_pct: f64) -> PredictionRecord {
        PredictionRecord {
            made_at,
            node_id: node(),
            horizon_hours,
            predicted_pct,
            current_battery_at_prediction: 80.0,
            weather_description: "few clouds".to_string(),
        }
    }

    #[test]
    fn new_nodes_have_zero_bias() {
        let ledger = ledger();
        for h in Horizon::ALL {
            assert_eq!(ledger.bias(&node(), h), 0.0);
            assert_eq!(ledger.accuracy_pct(&node(), h), None);
        }
    }

    #[test]
    fn bias_is_mean_of_signed_errors() {
        let n = node();
        let ledger = AccuracyLedger::from_records(
            [5.0, -3.0, 2.0]
                .iter()
                .enumerate()
                .map(|(i, e)| record_with_error(&n, i as i64 * 5, *e)),
            10,
            Duration::minutes(30),
        );
        let bias = ledger.bias(&n, Horizon::H6);
        assert!((bias - 4.0 / 3.0).abs() < 1e-9);
        assert!((70.0 - bias - 68.6667).abs() < 1e-3);
        assert_eq!(ledger.bias(&n, Horizon::H12), 0.0);
        assert!((ledger.accuracy_pct(&n, Horizon::H6).unwrap() - (100.0 - 10.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn only_the_newest_window_counts() {
        let n = node();
        let mut ledger = AccuracyLedger::new(3, Duration::minutes(30));
        for (i, e) in [50.0, 50.0, 1.0, 2.0, 3.0].iter().enumerate() {
            ledger.push(record_with_error(&n, i as i64, *e));
        }
        assert_eq!(ledger.recent_errors(&n, Horizon::H6), vec![3.0, 2.0, 1.0]);
        assert!((ledger.bias(&n, Horizon::H6) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn bias_is_scoped_per_node() {
        let mut ledger = ledger();
        ledger.push(record_with_error(&NodeId::new("!other"), 0, 9.0));
        assert_eq!(ledger.bias(&node(), Horizon::H6), 0.0);
    }

    #[test]
    fn accuracy_floors_at_zero() {
        let n = node();
        let mut ledger = ledger();
        ledger.push(record_with_error(&n, 0, -150.0));
        assert_eq!(ledger.accuracy_pct(&n, Horizon::H6), Some(0.0));
    }

    #[test]
    fn records_due_predictions_per_horizon() {
        let mut ledger = ledger();
        let predictions = vec![
            prediction(now() - Duration::hours(6) - Duration::minutes(5), 6, 72.0),
            prediction(now() - Duration::hours(12), 12, 60.0),
            // due in the future
            prediction(now() - Duration::hours(1), 24, 40.0),
            // due too long ago
            prediction(now() - Duration::hours(26), 24, 10.0),
        ];

        let record = ledger.record(&node(), &predictions, &reading(101.0), now()).expect("record");
        assert_eq!(record.prediction_made_at, predictions[0].made_at);
        assert_eq!(record.predicted_6h, Some(72.0));
        assert_eq!(record.actual_6h, Some(100.0));
        assert_eq!(record.error_6h, Some(-28.0));
        assert_eq!(record.error_12h, Some(-40.0));
        assert_eq!(record.predicted_24h, None);
        assert_eq!(record.error_24h, None);
        assert_eq!(ledger.len(), 1);
        assert!((ledger.bias(&node(), Horizon::H6) + 28.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_due_prediction_wins() {
        let mut ledger = ledger();
        let predictions = vec![
            prediction(now() - Duration::hours(6) - Duration::minutes(20), 6, 50.0),
            prediction(now() - Duration::hours(6) - Duration::minutes(2), 6, 55.0),
        ];
        let record = ledger.record(&node(), &predictions, &reading(50.0), now()).unwrap();
        assert_eq!(record.predicted_6h, Some(55.0));
    }

    #[test]
    fn predictions_are_checked_once() {
        let mut ledger = ledger();
        let predictions = vec![prediction(now() - Duration::hours(6), 6, 70.0)];
        assert!(ledger.record(&node(), &predictions, &reading(68.0), now()).is_some());
        let later = now() + Duration::minutes(5);
        assert!(ledger.record(&node(), &predictions, &reading_at(later, 67.0), later).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn stale_readings_are_not_scored() {
        let mut ledger = ledger();
        let made_at = now() - Duration::hours(6);
        let predictions = vec![prediction(made_at, 6, 71.0)];

        // taken before the prediction was made
        let before = reading_at(now() - Duration::hours(10), 80.0);
        assert!(ledger.record(&node(), &predictions, &before, now()).is_none());
        // after the prediction, but hours short of the due time
        let early = reading_at(made_at + Duration::hours(1), 79.0);
        assert!(ledger.record(&node(), &predictions, &early, now()).is_none());
        assert_eq!(ledger.len(), 0);

        // slightly ahead of the due time still counts
        let near_due = reading_at(now() - Duration::minutes(10), 70.0);
        let record = ledger.record(&node(), &predictions, &near_due, now()).expect("record");
        assert_eq!(record.error_6h, Some(1.0));
    }

    #[test]
    fn nothing_due_appends_nothing() {
        let mut ledger = ledger();
        assert!(ledger.record(&node(), &[], &reading(50.0), now()).is_none());
        assert_eq!(ledger.len(), 0);
    }
}
