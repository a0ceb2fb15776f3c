//! Telemetry as delivered by the mesh collector, plus the per-node views derived from it.
//!
//! Notes
//! - Samples are immutable once read; histories are rebuilt every cycle.
//! - Battery values above 100 are legal on the wire (charging devices report 101) and are
//!   clamped only when a calculation consumes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::utils::clamp_pct;

// =====================
// Scalar ID newtype wrappers
// =====================

/// Radio hardware address, e.g. `!9eed0410`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Success,
    Timeout,
    Error,
    NoTelemetry,
}

impl SampleStatus {
    /// Lenient parse of the collector's status column. Anything unrecognised counts as an error.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => SampleStatus::Success,
            "timeout" => SampleStatus::Timeout,
            "no_telemetry" | "no-telemetry" => SampleStatus::NoTelemetry,
            _ => SampleStatus::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Success => "success",
            SampleStatus::Timeout => "timeout",
            SampleStatus::Error => "error",
            SampleStatus::NoTelemetry => "no_telemetry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub node_id: NodeId,
    pub status: SampleStatus,
    pub battery_pct: Option<f64>,
    pub voltage: Option<f64>,
    pub channel_util_pct: Option<f64>,
    pub tx_util_pct: Option<f64>,
    pub uptime_s: Option<f64>,
}

impl TelemetrySample {
    /// Battery reading usable for calculations: only successful samples with a finite value.
    pub fn usable_battery(&self) -> Option<f64> {
        if self.status != SampleStatus::Success {
            return None;
        }
        self.battery_pct.filter(|b| b.is_finite()).map(clamp_pct)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BatteryPoint {
    pub timestamp: DateTime<Utc>,
    /// Already clamped to [0, 100].
    pub battery_pct: f64,
}

/// Ordered successful battery readings of one node, most-recent-last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeHistory {
    points: Vec<BatteryPoint>,
}

impl NodeHistory {
    /// Build from a node's samples in arrival order.
    ///
    /// The sort is stable, so samples sharing a timestamp keep their arrival order.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a TelemetrySample>) -> Self {
        let mut points: Vec<BatteryPoint> = samples
            .into_iter()
            .filter_map(|s| {
                s.usable_battery().map(|battery_pct| BatteryPoint {
                    timestamp: s.timestamp,
                    battery_pct,
                })
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        NodeHistory { points }
    }

    pub fn from_points(mut points: Vec<BatteryPoint>) -> Self {
        for p in &mut points {
            p.battery_pct = clamp_pct(p.battery_pct);
        }
        points.sort_by_key(|p| p.timestamp);
        NodeHistory { points }
    }

    pub fn points(&self) -> &[BatteryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&BatteryPoint> {
        self.points.last()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Location { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Read-only `node -> position` lookup, rebuilt by the collector each cycle.
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    by_node: HashMap<NodeId, Location>,
    fallback: Option<Location>,
}

impl LocationTable {
    pub fn new(by_node: HashMap<NodeId, Location>, fallback: Option<Location>) -> Self {
        LocationTable { by_node, fallback }
    }

    pub fn get(&self, node: &NodeId) -> Option<Location> {
        self.by_node.get(node).copied().or(self.fallback)
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }
}

/// Weather for one location and forecast hour, as consumed by the solar model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherConditions {
    pub cloud_cover_pct: f64,
    pub temperature_c: f64,
    pub condition: String,
    pub forecast_time: DateTime<Utc>,
    pub synthetic: bool,
}

impl WeatherConditions {
    pub fn describe(&self) -> String {
        format!(
            "{}, {:.0}% clouds, {:.1}C{}",
            self.condition,
            self.cloud_cover_pct,
            self.temperature_c,
            if self.synthetic { " (synthetic)" } else { "" }
        )
    }
}
