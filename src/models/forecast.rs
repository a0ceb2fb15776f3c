//! Forecast outputs and the two persisted append-only record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::telemetry::NodeId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEstimate {
    /// %/hour, positive = draining.
    pub rate_per_hour: f64,
    pub sample_count: usize,
    pub confidence: Confidence,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    H6,
    H12,
    H24,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::H6, Horizon::H12, Horizon::H24];

    pub fn hours(self) -> u32 {
        match self {
            Horizon::H6 => 6,
            Horizon::H12 => 12,
            Horizon::H24 => 24,
        }
    }

    pub fn from_hours(hours: u32) -> Option<Self> {
        match hours {
            6 => Some(Horizon::H6),
            12 => Some(Horizon::H12),
            24 => Some(Horizon::H24),
            _ => None,
        }
    }

    pub fn duration(self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.hours()))
    }
}

/// Display classification of a horizon prediction relative to the current level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendClass {
    Charging,
    Stable,
    DrainingFast,
}

impl TrendClass {
    pub fn icon(&self) -> &'static str {
        match self {
            TrendClass::Charging => "🔋⬆",
            TrendClass::Stable => "➡",
            TrendClass::DrainingFast => "🪫⬇",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrendClass::Charging => "charging",
            TrendClass::Stable => "stable",
            TrendClass::DrainingFast => "draining fast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonForecast {
    pub horizon_hours: u32,
    /// Clamped to [0, 100], one decimal.
    pub predicted_pct: f64,
    pub class: TrendClass,
    pub icon: &'static str,
    pub daylight_hours: u32,
    pub solar_efficiency: f64,
    pub bias: f64,
    /// `100 - mean_abs_error`, absent until the ledger has history for this horizon.
    pub accuracy_pct: Option<f64>,
    pub weather_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeForecast {
    pub node_id: NodeId,
    pub made_at: DateTime<Utc>,
    pub current_battery_pct: f64,
    pub trend: Option<TrendEstimate>,
    pub horizons: Vec<HorizonForecast>,
}

impl NodeForecast {
    pub fn horizon(&self, horizon: Horizon) -> Option<&HorizonForecast> {
        self.horizons.iter().find(|h| h.horizon_hours == horizon.hours())
    }

    pub fn prediction_records(&self) -> Vec<PredictionRecord> {
        self.horizons
            .iter()
            .map(|h| PredictionRecord {
                made_at: self.made_at,
                node_id: self.node_id.clone(),
                horizon_hours: h.horizon_hours,
                predicted_pct: h.predicted_pct,
                current_battery_at_prediction: self.current_battery_pct,
                weather_description: h.weather_description.clone(),
            })
            .collect()
    }
}

/// One line of the prediction log. Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub made_at: DateTime<Utc>,
    pub node_id: NodeId,
    pub horizon_hours: u32,
    pub predicted_pct: f64,
    pub current_battery_at_prediction: f64,
    pub weather_description: String,
}

impl PredictionRecord {
    pub fn horizon(&self) -> Option<Horizon> {
        Horizon::from_hours(self.horizon_hours)
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        self.made_at + chrono::Duration::hours(i64::from(self.horizon_hours))
    }
}

/// One line of the accuracy log. Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub checked_at: DateTime<Utc>,
    pub node_id: NodeId,
    pub prediction_made_at: DateTime<Utc>,
    pub predicted_6h: Option<f64>,
    pub actual_6h: Option<f64>,
    pub predicted_12h: Option<f64>,
    pub actual_12h: Option<f64>,
    pub predicted_24h: Option<f64>,
    pub actual_24h: Option<f64>,
    pub error_6h: Option<f64>,
    pub error_12h: Option<f64>,
    pub error_24h: Option<f64>,
    pub weather_description: String,
}

impl AccuracyRecord {
    pub fn error(&self, horizon: Horizon) -> Option<f64> {
        match horizon {
            Horizon::H6 => self.error_6h,
            Horizon::H12 => self.error_12h,
            Horizon::H24 => self.error_24h,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum LongHorizonBucket {
    OverOneMonth,
    OverThreeMonths,
}

/// Remaining battery life, rendered by matching on the variant.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatteryLife {
    Numeric { hours: f64, confidence: Confidence },
    Stable,
    LongHorizon { bucket: LongHorizonBucket },
    Anomalous { hours: f64 },
}

impl fmt::Display for BatteryLife {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryLife::Numeric { hours, confidence } => match confidence {
                Confidence::High => write!(f, "{:.0}", hours),
                Confidence::Medium => write!(f, "~{:.0}", hours),
                Confidence::Low => write!(f, "~{:.0}?", hours),
            },
            BatteryLife::Stable => f.write_str("Stable/Charging"),
            BatteryLife::LongHorizon { bucket } => match bucket {
                LongHorizonBucket::OverOneMonth => f.write_str(">1mo"),
                LongHorizonBucket::OverThreeMonths => f.write_str(">3mo"),
            },
            BatteryLife::Anomalous { hours } => write!(f, "{:.0} (fast drain)", hours),
        }
    }
}
