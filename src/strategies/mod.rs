// src/strategies/mod.rs
// Ordered fallback chain of independent content-parsing strategies.
// Resilience to upstream markup drift comes from strategy diversity,
// not from one careful parser.

use crate::config::SelectorConfig;
use crate::errors::{ExtractionError, TrackerError};
use crate::types::{CabinCategory, Currency, ExtractedFields, RawCapture, Snapshot};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};

mod dom_path;
mod structured;
mod text_regex;

pub use dom_path::DomPathStrategy;
pub use structured::StructuredDataStrategy;
pub use text_regex::TextRegexStrategy;

/// One parsing method. Implementations are stateless per invocation and
/// independently testable against fixture content.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pull candidate fields out of the content, or None when this
    /// strategy cannot see its markers at all.
    fn attempt(&self, content: &str) -> Option<ExtractedFields>;
}

/// Parse "$799", "€1,234" or a bare "799.50" into amount + currency.
/// Currency defaults to USD when no symbol is present.
pub(crate) fn parse_price(raw: &str) -> Option<(f64, Currency)> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let (currency, rest) = match chars.next() {
        Some(c) => match Currency::from_symbol(c) {
            Some(cur) => (cur, chars.as_str()),
            None => (Currency::Usd, trimmed),
        },
        None => return None,
    };
    let cleaned: String = rest.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let amount: f64 = cleaned.parse().ok()?;
    Some((amount, currency))
}

pub(crate) fn parse_cabin(raw: &str) -> Option<CabinCategory> {
    let lower = raw.trim().to_lowercase();
    if lower.contains("interior") {
        Some(CabinCategory::Interior)
    } else if lower.contains("ocean") || lower.contains("outside") {
        Some(CabinCategory::OceanView)
    } else if lower.contains("balcony") {
        Some(CabinCategory::Balcony)
    } else if lower.contains("suite") || lower.contains("deluxe") {
        Some(CabinCategory::Suite)
    } else {
        None
    }
}

pub(crate) fn parse_sail_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    // ISO date, possibly with a trailing time component
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Self-validation predicate shared by all strategies: a strategy's output
/// only wins the chain if it passes this.
pub fn validate_fields(
    fields: &ExtractedFields,
    now: DateTime<Utc>,
    sail_date_horizon_days: i64,
) -> Result<(), String> {
    if !fields.price.is_finite() || fields.price <= 0.0 {
        return Err(format!("price {} is not positive", fields.price));
    }
    if fields.price > 100_000.0 {
        return Err(format!("price {} is implausibly high", fields.price));
    }
    if fields.ship.trim().is_empty() {
        return Err("ship name is empty".to_string());
    }
    if !(1..=60).contains(&fields.nights) {
        return Err(format!("nights {} outside [1,60]", fields.nights));
    }
    if let Some(date) = fields.sail_date {
        let today = now.date_naive();
        let horizon = today + Duration::days(sail_date_horizon_days);
        if date < today || date > horizon {
            return Err(format!("sail date {} outside the future window", date));
        }
    }
    Ok(())
}

/// Fixed, priority-ordered strategy sequence. Ordering is set once at
/// construction so fallback behavior is reviewable in one place.
pub struct StrategyChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    sail_date_horizon_days: i64,
}

impl StrategyChain {
    pub fn from_config(
        selectors: &SelectorConfig,
        sail_date_horizon_days: i64,
    ) -> Result<Self, TrackerError> {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(StructuredDataStrategy::new(&selectors.structured)?),
            Box::new(DomPathStrategy::new(&selectors.dom_path)?),
            Box::new(TextRegexStrategy::new(&selectors.text_regex)?),
        ];
        info!(
            "🧩 Strategy chain: {}",
            strategies.iter().map(|s| s.name()).collect::<Vec<_>>().join(" → ")
        );
        Ok(Self {
            strategies,
            sail_date_horizon_days,
        })
    }

    /// Run strategies in priority order and return the first validated
    /// result, tagged with the strategy that produced it. When every
    /// strategy misses or fails validation the caller gets
    /// `NoStrategyMatched` and no snapshot is emitted.
    pub fn extract(
        &self,
        raw: &RawCapture,
        captured_at: DateTime<Utc>,
    ) -> Result<Snapshot, ExtractionError> {
        for strategy in &self.strategies {
            match self.run_strategy(strategy.as_ref(), &raw.body, captured_at) {
                Ok(fields) => {
                    debug!(
                        "🧩 Strategy '{}' matched {} ({} @ {:.2})",
                        strategy.name(),
                        raw.target_slug,
                        fields.ship,
                        fields.price
                    );
                    return Ok(Snapshot::from_fields(fields, strategy.name(), captured_at));
                }
                Err(ExtractionError::ValidationFailed { strategy, reason }) => {
                    debug!("🧩 Strategy '{}' rejected for {}: {}", strategy, raw.target_slug, reason);
                }
                Err(_) => {}
            }
        }
        Err(ExtractionError::NoStrategyMatched)
    }

    /// Run a single strategy plus validation. Exposed so individual
    /// strategies can be exercised against fixtures.
    pub fn run_strategy(
        &self,
        strategy: &dyn ExtractionStrategy,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ExtractedFields, ExtractionError> {
        let fields = strategy
            .attempt(content)
            .ok_or(ExtractionError::NoStrategyMatched)?;
        validate_fields(&fields, now, self.sail_date_horizon_days).map_err(|reason| {
            ExtractionError::ValidationFailed {
                strategy: strategy.name().to_string(),
                reason,
            }
        })?;
        Ok(fields)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(price: f64, ship: &str, nights: u32) -> ExtractedFields {
        ExtractedFields {
            price,
            currency: Currency::Usd,
            ship: ship.to_string(),
            departure_port: "Miami, FL".to_string(),
            nights,
            sail_date: None,
            cabin: CabinCategory::Interior,
        }
    }

    #[test]
    fn parse_price_handles_symbols_and_separators() {
        assert_eq!(parse_price("$799"), Some((799.0, Currency::Usd)));
        assert_eq!(parse_price("€1,234"), Some((1234.0, Currency::Eur)));
        assert_eq!(parse_price("£2,049.50"), Some((2049.5, Currency::Gbp)));
        assert_eq!(parse_price("659.99"), Some((659.99, Currency::Usd)));
        assert_eq!(parse_price("call for price"), None);
    }

    #[test]
    fn parse_cabin_recognizes_site_vocabulary() {
        assert_eq!(parse_cabin("Interior"), Some(CabinCategory::Interior));
        assert_eq!(parse_cabin("OUTSIDE"), Some(CabinCategory::OceanView));
        assert_eq!(parse_cabin("Ocean View"), Some(CabinCategory::OceanView));
        assert_eq!(parse_cabin("DELUXE suite"), Some(CabinCategory::Suite));
        assert_eq!(parse_cabin("garden view"), None);
    }

    #[test]
    fn validation_rejects_out_of_range_fields() {
        let now = Utc::now();
        assert!(validate_fields(&fields(799.0, "Oasis of the Seas", 7), now, 730).is_ok());
        assert!(validate_fields(&fields(0.0, "Oasis of the Seas", 7), now, 730).is_err());
        assert!(validate_fields(&fields(-10.0, "Oasis of the Seas", 7), now, 730).is_err());
        assert!(validate_fields(&fields(799.0, "  ", 7), now, 730).is_err());
        assert!(validate_fields(&fields(799.0, "Oasis of the Seas", 0), now, 730).is_err());
        assert!(validate_fields(&fields(799.0, "Oasis of the Seas", 61), now, 730).is_err());
    }

    #[test]
    fn validation_enforces_future_sail_window() {
        let now = Utc::now();
        let mut f = fields(799.0, "Oasis of the Seas", 7);
        f.sail_date = Some(now.date_naive() + Duration::days(90));
        assert!(validate_fields(&f, now, 730).is_ok());

        f.sail_date = Some(now.date_naive() - Duration::days(1));
        assert!(validate_fields(&f, now, 730).is_err());

        f.sail_date = Some(now.date_naive() + Duration::days(3000));
        assert!(validate_fields(&f, now, 730).is_err());
    }

    #[test]
    fn chain_order_is_structured_first() {
        let chain = StrategyChain::from_config(&SelectorConfig::default(), 730).unwrap();
        assert_eq!(chain.strategy_names(), vec!["structured", "dom_path", "text_regex"]);
    }
}
