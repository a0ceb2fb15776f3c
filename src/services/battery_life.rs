//! Weather-independent "hours until empty" countdown.

use crate::config::BatteryLifeConfig;
use crate::models::forecast::{BatteryLife, LongHorizonBucket, TrendEstimate};
use crate::models::telemetry::NodeHistory;
use crate::services::trend::TrendEstimator;
use crate::utils::clamp_pct;

#[derive(Debug, Clone, Default)]
pub struct BatteryLifeEstimator {
    cfg: BatteryLifeConfig,
    trend: TrendEstimator,
}

impl BatteryLifeEstimator {
    pub fn new(cfg: BatteryLifeConfig, trend: TrendEstimator) -> Self {
        BatteryLifeEstimator { cfg, trend }
    }

    /// `None` when the history is too short for a trend.
    pub fn hours_left(&self, history: &NodeHistory, current_battery: f64) -> Option<BatteryLife> {
        self.hours_left_for_trend(self.trend.estimate(history).as_ref(), current_battery)
    }

    /// `None` when there is no trend to extrapolate.
    pub fn hours_left_for_trend(&self, trend: Option<&TrendEstimate>, current_battery: f64) -> Option<BatteryLife> {
        let trend = trend?;
        let rate = trend.rate_per_hour;
        if !rate.is_finite() {
            return None;
        }
        if rate <= 0.0 {
            return Some(BatteryLife::Stable);
        }

        let hours = clamp_pct(current_battery) / rate;
        if rate < self.cfg.slow_drain_rate {
            if hours > self.cfg.three_months_hours {
                return Some(BatteryLife::LongHorizon {
                    bucket: LongHorizonBucket::OverThreeMonths,
                });
            }
            if hours > self.cfg.one_month_hours {
                return Some(BatteryLife::LongHorizon {
                    bucket: LongHorizonBucket::OverOneMonth,
                });
            }
        } else if rate > self.cfg.fast_drain_rate {
            return Some(BatteryLife::Anomalous { hours });
        }

        Some(BatteryLife::Numeric {
            hours,
            confidence: trend.confidence,
        })
    }
}
