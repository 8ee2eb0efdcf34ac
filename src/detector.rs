// src/detector.rs
// Flags snapshots that undercut their baseline. Two independent triggers:
// a fixed ratio under the rolling minimum catches "record low ever seen",
// and a stddev rule catches unusual dips on naturally volatile itineraries
// that a fixed percentage would miss.

use crate::config::TrackerConfig;
use crate::types::{Baseline, DealEvent, Snapshot};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug)]
pub enum Evaluation {
    Deal(DealEvent),
    NoDeal,
}

pub struct DealDetector {
    threshold_ratio: f64,
    stddev_multiplier: f64,
}

impl DealDetector {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            threshold_ratio: config.threshold_ratio,
            stddev_multiplier: config.stddev_multiplier,
        }
    }

    pub fn with_thresholds(threshold_ratio: f64, stddev_multiplier: f64) -> Self {
        Self {
            threshold_ratio,
            stddev_multiplier,
        }
    }

    pub fn evaluate(&self, snapshot: &Snapshot, baseline: &Baseline) -> Evaluation {
        if baseline.insufficient_data {
            return Evaluation::NoDeal;
        }

        let ratio_trigger =
            snapshot.price <= baseline.rolling_minimum * (1.0 - self.threshold_ratio);
        let stddev_trigger = baseline.stddev > 0.0
            && snapshot.price <= baseline.mean - self.stddev_multiplier * baseline.stddev;

        if !ratio_trigger && !stddev_trigger {
            return Evaluation::NoDeal;
        }

        let drop_ratio = if baseline.rolling_minimum > 0.0 {
            (baseline.rolling_minimum - snapshot.price) / baseline.rolling_minimum
        } else {
            0.0
        };
        let score = drop_ratio.max(0.0);

        let event = DealEvent {
            id: Uuid::new_v4().to_string(),
            itinerary_key: snapshot.itinerary_key.clone(),
            triggering_snapshot: snapshot.clone(),
            baseline_at_detection: baseline.clone(),
            drop_ratio,
            score,
            detected_at: Utc::now(),
        };

        info!(
            "💰 Deal detected: {} {} @ {:.2} (rolling min {:.2}, score {:.3}, via {})",
            event.triggering_snapshot.ship,
            event.itinerary_key,
            event.triggering_snapshot.price,
            baseline.rolling_minimum,
            event.score,
            if ratio_trigger { "ratio" } else { "stddev" }
        );

        Evaluation::Deal(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CabinCategory, Currency, ItineraryKey};

    fn baseline(rolling_minimum: f64, mean: f64, stddev: f64, samples: usize) -> Baseline {
        Baseline {
            itinerary_key: ItineraryKey("k1".to_string()),
            rolling_minimum,
            mean,
            stddev,
            sample_count: samples,
            insufficient_data: samples < 3,
            computed_at: Utc::now(),
        }
    }

    fn snapshot(price: f64) -> Snapshot {
        Snapshot {
            itinerary_key: ItineraryKey("k1".to_string()),
            price,
            currency: Currency::Usd,
            ship: "Oasis of the Seas".to_string(),
            departure_port: "Miami, FL".to_string(),
            nights: 7,
            sail_date: None,
            cabin: CabinCategory::Interior,
            captured_at: Utc::now(),
            source_strategy: "structured".to_string(),
        }
    }

    #[test]
    fn ratio_rule_fires_at_documented_threshold() {
        let detector = DealDetector::with_thresholds(0.15, 2.0);
        let base = baseline(1000.0, 1050.0, 10.0, 10);

        match detector.evaluate(&snapshot(840.0), &base) {
            Evaluation::Deal(event) => {
                assert!(event.score >= 0.15);
                assert!((event.drop_ratio - 0.16).abs() < 1e-9);
            }
            Evaluation::NoDeal => panic!("840 under a 1000 minimum at 15% must fire"),
        }
    }

    #[test]
    fn nine_hundred_does_not_fire_via_ratio_rule() {
        // stddev disabled by a huge multiplier so only the ratio rule acts
        let detector = DealDetector::with_thresholds(0.15, 1000.0);
        let base = baseline(1000.0, 1050.0, 10.0, 10);
        assert!(matches!(detector.evaluate(&snapshot(900.0), &base), Evaluation::NoDeal));
    }

    #[test]
    fn stddev_rule_catches_volatile_itinerary_dips() {
        // 900 is not 15% under the 1000 minimum, but it is more than
        // 2 stddevs under the mean
        let detector = DealDetector::with_thresholds(0.15, 2.0);
        let base = baseline(1000.0, 1100.0, 80.0, 10);
        assert!(matches!(detector.evaluate(&snapshot(900.0), &base), Evaluation::Deal(_)));
    }

    #[test]
    fn insufficient_data_never_evaluates_to_a_deal() {
        let detector = DealDetector::with_thresholds(0.15, 2.0);
        let base = baseline(1000.0, 1000.0, 5.0, 2);
        assert!(matches!(detector.evaluate(&snapshot(1.0), &base), Evaluation::NoDeal));
    }

    #[test]
    fn score_is_clamped_non_negative() {
        // stddev trigger with a price above the rolling minimum
        let detector = DealDetector::with_thresholds(0.50, 1.0);
        let base = baseline(800.0, 1200.0, 100.0, 10);
        match detector.evaluate(&snapshot(1050.0), &base) {
            Evaluation::Deal(event) => {
                assert!(event.score >= 0.0);
                assert_eq!(event.score, 0.0);
            }
            Evaluation::NoDeal => panic!("stddev rule should fire at mean - 1.5 stddev"),
        }
    }
}
