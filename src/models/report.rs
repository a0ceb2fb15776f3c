//! JSON report consumed by the dashboard renderer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::forecast::{BatteryLife, HorizonForecast, NodeForecast, TrendEstimate};
use super::telemetry::{Location, NodeId, SampleStatus, TelemetrySample};

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastReport {
    pub generated_at: DateTime<Utc>,
    pub generator: String,
    pub nodes: Vec<NodeReport>,
    /// Prediction records appended this cycle.
    pub predictions_logged: usize,
    /// Accuracy records appended this cycle.
    pub accuracy_checks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub last_status: Option<SampleStatus>,
    pub last_seen: Option<DateTime<Utc>>,
    pub current_battery_pct: Option<f64>,
    pub voltage: Option<f64>,
    pub trend: Option<TrendEstimate>,
    /// `+2.0 %/h`-style text or `N/A`.
    pub trend_label: String,
    pub battery_life: Option<BatteryLife>,
    /// Hours left, `Stable/Charging`, `>1mo`, ... or `N/A`.
    pub battery_life_label: String,
    pub location: Option<Location>,
    /// Empty when no forecast could be made.
    pub horizons: Vec<HorizonForecast>,
}

impl NodeReport {
    pub fn new(
        node_id: NodeId,
        latest: Option<&TelemetrySample>,
        location: Option<Location>,
        trend: Option<TrendEstimate>,
        battery_life: Option<BatteryLife>,
        forecast: Option<NodeForecast>,
    ) -> Self {
        NodeReport {
            node_id,
            last_status: latest.map(|s| s.status),
            last_seen: latest.map(|s| s.timestamp),
            current_battery_pct: forecast.as_ref().map(|f| f.current_battery_pct),
            voltage: latest.and_then(|s| s.voltage),
            trend_label: trend
                .map(|t| format!("{:+.1} %/h", level_change(t.rate_per_hour)))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            trend,
            battery_life_label: battery_life
                .map(|l| l.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            battery_life,
            location,
            horizons: forecast.map(|f| f.horizons).unwrap_or_default(),
        }
    }
}

/// Drain rate as a signed level change; a flat trend shows as `+0.0`.
fn level_change(rate_per_hour: f64) -> f64 {
    if rate_per_hour == 0.0 { 0.0 } else { -rate_per_hour }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast::Confidence;

    #[test]
    fn missing_data_is_labelled_not_available() {
        let report = NodeReport::new(NodeId::new("!9eed0410"), None, None, None, None, None);
        assert_eq!(report.trend_label, NOT_AVAILABLE);
        assert_eq!(report.battery_life_label, NOT_AVAILABLE);
        assert!(report.horizons.is_empty());
        assert_eq!(report.current_battery_pct, None);
    }

    #[test]
    fn trend_label_shows_level_change() {
        let trend = TrendEstimate {
            rate_per_hour: 2.0,
            sample_count: 3,
            confidence: Confidence::Medium,
        };
        let report = NodeReport::new(
            NodeId::new("!9eed0410"),
            None,
            None,
            Some(trend),
            Some(BatteryLife::Numeric {
                hours: 43.0,
                confidence: Confidence::Medium,
            }),
            None,
        );
        assert_eq!(report.trend_label, "-2.0 %/h");
        assert_eq!(report.battery_life_label, "~43");
    }
}
