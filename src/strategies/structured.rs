// src/strategies/structured.rs
// Highest-priority strategy: key/value pairs embedded in the page as JSON
// (or JSON-shaped fragments). Key aliases come from the selector file.

use super::{parse_cabin, parse_price, parse_sail_date, ExtractionStrategy};
use crate::config::StructuredSelectors;
use crate::errors::TrackerError;
use crate::types::{CabinCategory, ExtractedFields};
use regex::Regex;

pub struct StructuredDataStrategy {
    price_re: Regex,
    ship_re: Regex,
    port_re: Regex,
    nights_re: Regex,
    sail_date_re: Regex,
    cabin_re: Regex,
}

/// Matches `"key": "value"` or `"key": 123` for any of the aliases.
fn key_regex(keys: &[String]) -> Result<Regex, TrackerError> {
    let alternatives = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r#""(?:{})"\s*:\s*(?:"([^"]*)"|(\d[\d.,]*))"#,
        alternatives
    ))
    .map_err(|e| TrackerError::Config(format!("bad structured selector: {}", e)))
}

fn first_capture<'a>(re: &Regex, content: &'a str) -> Option<String> {
    let caps = re.captures(content)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

impl StructuredDataStrategy {
    pub fn new(selectors: &StructuredSelectors) -> Result<Self, TrackerError> {
        Ok(Self {
            price_re: key_regex(&selectors.price_keys)?,
            ship_re: key_regex(&selectors.ship_keys)?,
            port_re: key_regex(&selectors.departure_port_keys)?,
            nights_re: key_regex(&selectors.nights_keys)?,
            sail_date_re: key_regex(&selectors.sail_date_keys)?,
            cabin_re: key_regex(&selectors.cabin_keys)?,
        })
    }
}

impl ExtractionStrategy for StructuredDataStrategy {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn attempt(&self, content: &str) -> Option<ExtractedFields> {
        let (price, currency) = parse_price(&first_capture(&self.price_re, content)?)?;
        let ship = first_capture(&self.ship_re, content)?;
        let nights: u32 = first_capture(&self.nights_re, content)?
            .trim()
            .parse()
            .ok()?;

        let departure_port = first_capture(&self.port_re, content).unwrap_or_default();
        let sail_date = first_capture(&self.sail_date_re, content)
            .as_deref()
            .and_then(parse_sail_date);
        let cabin = first_capture(&self.cabin_re, content)
            .as_deref()
            .and_then(parse_cabin)
            .unwrap_or(CabinCategory::Interior);

        Some(ExtractedFields {
            price,
            currency,
            ship,
            departure_port,
            nights,
            sail_date,
            cabin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::types::Currency;

    fn strategy() -> StructuredDataStrategy {
        StructuredDataStrategy::new(&SelectorConfig::default().structured).unwrap()
    }

    #[test]
    fn extracts_the_documented_fixture() {
        let content = r#"{"price": "$799", "ship": "Oasis of the Seas", "departure_port": "Cape Liberty, NJ", "nights": 7}"#;
        let fields = strategy().attempt(content).unwrap();
        assert_eq!(fields.price, 799.0);
        assert_eq!(fields.currency, Currency::Usd);
        assert_eq!(fields.ship, "Oasis of the Seas");
        assert_eq!(fields.departure_port, "Cape Liberty, NJ");
        assert_eq!(fields.nights, 7);
        assert_eq!(fields.cabin, CabinCategory::Interior);
    }

    #[test]
    fn reads_numeric_prices_and_alias_keys() {
        let content = r#""base_price": 1249, "ship_name": "Wonder of the Seas", "departure": "Port Canaveral, FL", "nights": "9", "room_type": "BALCONY""#;
        let fields = strategy().attempt(content).unwrap();
        assert_eq!(fields.price, 1249.0);
        assert_eq!(fields.ship, "Wonder of the Seas");
        assert_eq!(fields.nights, 9);
        assert_eq!(fields.cabin, CabinCategory::Balcony);
    }

    #[test]
    fn reads_sail_date_with_time_suffix() {
        let content = r#""price": "€899", "ship": "Symphony of the Seas", "nights": 7, "sail_date": "2099-03-14T00:00:00Z""#;
        let fields = strategy().attempt(content).unwrap();
        assert_eq!(fields.currency, Currency::Eur);
        assert_eq!(
            fields.sail_date,
            chrono::NaiveDate::from_ymd_opt(2099, 3, 14)
        );
    }

    #[test]
    fn missing_required_keys_yield_none() {
        assert!(strategy().attempt(r#""ship": "Oasis of the Seas", "nights": 7"#).is_none());
        assert!(strategy().attempt(r#""price": "$799", "nights": 7"#).is_none());
        assert!(strategy().attempt("<html>no data here</html>").is_none());
    }
}

