//! Battery drain/charge rate from a node's recent history.
//!
//! Two estimates are taken over an adaptive window of the newest samples and averaged:
//! - endpoint: first-to-last slope, skipped when the span is too short to be meaningful
//! - pairwise: mean of consecutive-pair slopes, ignoring near-duplicate timestamps
//!
//! Sign convention: positive rate = battery draining.

use crate::config::TrendConfig;
use crate::models::forecast::{Confidence, TrendEstimate};
use crate::models::telemetry::{BatteryPoint, NodeHistory};
use crate::utils::{hours_between, mean};

#[derive(Debug, Clone, Default)]
pub struct TrendEstimator {
    cfg: TrendConfig,
}

impl TrendEstimator {
    pub fn new(cfg: TrendConfig) -> Self {
        TrendEstimator { cfg }
    }

    /// `None` when fewer than two samples exist or neither method yields a rate.
    pub fn estimate(&self, history: &NodeHistory) -> Option<TrendEstimate> {
        let points = history.points();
        let sample_count = points.len();
        if sample_count < 2 {
            return None;
        }

        let window_size = self.window_size(sample_count);
        let window = &points[sample_count - window_size..];

        let rates: Vec<f64> = [self.endpoint_rate(window), self.pairwise_rate(window)]
            .into_iter()
            .flatten()
            .collect();
        let rate_per_hour = mean(&rates)?;

        Some(TrendEstimate {
            rate_per_hour,
            sample_count,
            confidence: self.confidence(window_size, sample_count),
        })
    }

    fn window_size(&self, available: usize) -> usize {
        if available >= self.cfg.large_history_threshold {
            self.cfg.large_window.min(available)
        } else if available >= self.cfg.medium_history_threshold {
            self.cfg.medium_window.min(available)
        } else {
            available
        }
    }

    fn endpoint_rate(&self, window: &[BatteryPoint]) -> Option<f64> {
        let (first, last) = (window.first()?, window.last()?);
        let elapsed = hours_between(first.timestamp, last.timestamp);
        if elapsed < self.cfg.min_endpoint_hours {
            return None;
        }
        Some((first.battery_pct - last.battery_pct) / elapsed)
    }

    fn pairwise_rate(&self, window: &[BatteryPoint]) -> Option<f64> {
        let rates: Vec<f64> = window
            .windows(2)
            .filter_map(|pair| {
                let elapsed = hours_between(pair[0].timestamp, pair[1].timestamp);
                (elapsed > self.cfg.min_pair_hours).then(|| (pair[0].battery_pct - pair[1].battery_pct) / elapsed)
            })
            .collect();
        mean(&rates)
    }

    fn confidence(&self, window_size: usize, sample_count: usize) -> Confidence {
        if window_size >= self.cfg.high_confidence_window && sample_count >= self.cfg.high_confidence_samples {
            Confidence::High
        } else if window_size >= self.cfg.medium_confidence_window {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}
