// src/analyzer.rs
// Rolling per-itinerary statistics. A Baseline is a pure function of the
// snapshot history for its key; nothing here is persisted or hand-edited.

use crate::config::TrackerConfig;
use crate::store::SnapshotStore;
use crate::types::{Baseline, ItineraryKey, Snapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

pub struct TrendAnalyzer {
    store: Arc<SnapshotStore>,
    max_observations: usize,
    max_age_days: i64,
    min_sample_count: usize,
}

impl TrendAnalyzer {
    pub fn new(config: &TrackerConfig, store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            max_observations: config.baseline_max_observations,
            max_age_days: config.baseline_max_age_days,
            min_sample_count: config.min_sample_count,
        }
    }

    /// Baseline over the trailing window for `key`. With fewer than the
    /// minimum sample count the result is flagged `insufficient_data` and
    /// the detector treats it as "cannot evaluate".
    pub async fn baseline(&self, key: &ItineraryKey, now: DateTime<Utc>) -> Baseline {
        let window = self
            .store
            .recent_history(key, self.max_observations, self.max_age_days, now)
            .await;
        let baseline = compute_baseline(key, &window, self.min_sample_count, now);
        debug!(
            "📈 Baseline for {}: min {:.2}, mean {:.2}, stddev {:.2} over {} samples{}",
            key,
            baseline.rolling_minimum,
            baseline.mean,
            baseline.stddev,
            baseline.sample_count,
            if baseline.insufficient_data { " (insufficient)" } else { "" }
        );
        baseline
    }
}

/// The actual statistics, separated out so they are testable without a
/// store behind them.
pub fn compute_baseline(
    key: &ItineraryKey,
    window: &[Snapshot],
    min_sample_count: usize,
    now: DateTime<Utc>,
) -> Baseline {
    let sample_count = window.len();
    if sample_count == 0 {
        return Baseline {
            itinerary_key: key.clone(),
            rolling_minimum: 0.0,
            mean: 0.0,
            stddev: 0.0,
            sample_count: 0,
            insufficient_data: true,
            computed_at: now,
        };
    }

    let prices: Vec<f64> = window.iter().map(|s| s.price).collect();
    let rolling_minimum = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let mean = prices.iter().sum::<f64>() / sample_count as f64;
    let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / sample_count as f64;

    Baseline {
        itinerary_key: key.clone(),
        rolling_minimum,
        mean,
        stddev: variance.sqrt(),
        sample_count,
        insufficient_data: sample_count < min_sample_count,
        computed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CabinCategory, Currency};
    use chrono::Duration;

    fn snapshots(prices: &[f64], now: DateTime<Utc>) -> Vec<Snapshot> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| Snapshot {
                itinerary_key: ItineraryKey("k1".to_string()),
                price: *price,
                currency: Currency::Usd,
                ship: "Oasis of the Seas".to_string(),
                departure_port: "Miami, FL".to_string(),
                nights: 7,
                sail_date: None,
                cabin: CabinCategory::Interior,
                captured_at: now - Duration::days((prices.len() - i) as i64),
                source_strategy: "structured".to_string(),
            })
            .collect()
    }

    #[test]
    fn computes_minimum_mean_and_stddev() {
        let now = Utc::now();
        let key = ItineraryKey("k1".to_string());
        let window = snapshots(&[1000.0, 1100.0, 900.0, 1000.0], now);

        let baseline = compute_baseline(&key, &window, 3, now);
        assert!(!baseline.insufficient_data);
        assert_eq!(baseline.sample_count, 4);
        assert_eq!(baseline.rolling_minimum, 900.0);
        assert_eq!(baseline.mean, 1000.0);
        assert!((baseline.stddev - 70.710678).abs() < 1e-5);
    }

    #[test]
    fn below_minimum_samples_is_flagged_insufficient() {
        let now = Utc::now();
        let key = ItineraryKey("k1".to_string());
        let window = snapshots(&[1000.0, 950.0], now);

        let baseline = compute_baseline(&key, &window, 3, now);
        assert!(baseline.insufficient_data);
        assert_eq!(baseline.sample_count, 2);
    }

    #[test]
    fn empty_window_yields_empty_baseline() {
        let now = Utc::now();
        let key = ItineraryKey("k1".to_string());
        let baseline = compute_baseline(&key, &[], 3, now);
        assert!(baseline.insufficient_data);
        assert_eq!(baseline.sample_count, 0);
    }
}
