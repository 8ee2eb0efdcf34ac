// src/strategies/text_regex.rs
// Last-resort strategy: pattern matching over the page text with all
// markup ignored. Coarse, but it keeps observations flowing when both
// structured data and testid markers disappear in a redesign.

use super::{parse_sail_date, ExtractionStrategy};
use crate::config::TextRegexSelectors;
use crate::errors::TrackerError;
use crate::types::{CabinCategory, Currency, ExtractedFields};
use regex::Regex;

pub struct TextRegexStrategy {
    price_re: Regex,
    ship_re: Regex,
    port_re: Regex,
    nights_re: Regex,
    date_re: Regex,
    tag_re: Regex,
}

fn compile(name: &str, pattern: &str) -> Result<Regex, TrackerError> {
    Regex::new(pattern)
        .map_err(|e| TrackerError::Config(format!("bad text_regex pattern '{}': {}", name, e)))
}

impl TextRegexStrategy {
    pub fn new(selectors: &TextRegexSelectors) -> Result<Self, TrackerError> {
        Ok(Self {
            price_re: compile("price", &selectors.price_pattern)?,
            ship_re: compile("ship", &selectors.ship_pattern)?,
            port_re: compile("port", &selectors.port_pattern)?,
            nights_re: compile("nights", &selectors.nights_pattern)?,
            date_re: compile("date", &selectors.date_pattern)?,
            tag_re: Regex::new(r"<[^>]*>").map_err(|e| TrackerError::Config(e.to_string()))?,
        })
    }

    fn strip_tags(&self, content: &str) -> String {
        self.tag_re.replace_all(content, " ").to_string()
    }
}

impl ExtractionStrategy for TextRegexStrategy {
    fn name(&self) -> &'static str {
        "text_regex"
    }

    fn attempt(&self, content: &str) -> Option<ExtractedFields> {
        let text = self.strip_tags(content);

        // Price pattern captures (symbol, amount); amount group is required
        let price_caps = self.price_re.captures(&text)?;
        let (symbol, amount) = match (price_caps.get(1), price_caps.get(2)) {
            (Some(sym), Some(amt)) => (sym.as_str().chars().next(), amt.as_str()),
            (Some(amt), None) => (None, amt.as_str()),
            _ => return None,
        };
        let price: f64 = amount.replace(',', "").parse().ok()?;
        let currency = symbol
            .and_then(Currency::from_symbol)
            .unwrap_or(Currency::Usd);

        let ship = self
            .ship_re
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())?;
        let nights: u32 = self
            .nights_re
            .captures(&text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())?;

        let departure_port = self
            .port_re
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let sail_date = self
            .date_re
            .captures(&text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_sail_date(m.as_str()));

        Some(ExtractedFields {
            price,
            currency,
            ship,
            departure_port,
            nights,
            sail_date,
            cabin: CabinCategory::Interior,
        })
    }
}
