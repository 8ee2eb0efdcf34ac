// src/strategies/dom_path.rs
// Second-priority strategy: reads element text next to the site's
// data-testid markers. The upstream tags its cruise cards with stable-ish
// testids even when class names churn, so this survives most restyles.

use super::{parse_price, parse_sail_date, ExtractionStrategy};
use crate::config::DomPathSelectors;
use crate::errors::TrackerError;
use crate::types::{CabinCategory, ExtractedFields};
use regex::Regex;

pub struct DomPathStrategy {
    price_re: Regex,
    ship_re: Regex,
    port_re: Regex,
    nights_re: Regex,
    date_re: Regex,
    nights_number_re: Regex,
}

/// Matches the text content of the element carrying a marker testid,
/// e.g. `<span data-testid="cruise-ship-label">Oasis of the Seas</span>`.
fn marker_regex(marker: &str) -> Result<Regex, TrackerError> {
    Regex::new(&format!(
        r#"data-testid="[^"]*{}[^"]*"[^>]*>\s*([^<]+?)\s*<"#,
        regex::escape(marker)
    ))
    .map_err(|e| TrackerError::Config(format!("bad dom_path selector: {}", e)))
}

fn first_text(re: &Regex, content: &str) -> Option<String> {
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

impl DomPathStrategy {
    pub fn new(selectors: &DomPathSelectors) -> Result<Self, TrackerError> {
        Ok(Self {
            price_re: marker_regex(&selectors.price_marker)?,
            ship_re: marker_regex(&selectors.ship_marker)?,
            port_re: marker_regex(&selectors.port_marker)?,
            nights_re: marker_regex(&selectors.nights_marker)?,
            date_re: marker_regex(&selectors.date_marker)?,
            nights_number_re: Regex::new(r"(\d{1,2})")
                .map_err(|e| TrackerError::Config(e.to_string()))?,
        })
    }

    fn nights_from_label(&self, label: &str) -> Option<u32> {
        // Labels read like "7 Night Caribbean Cruise"
        self.nights_number_re
            .captures(label)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl ExtractionStrategy for DomPathStrategy {
    fn name(&self) -> &'static str {
        "dom_path"
    }

    fn attempt(&self, content: &str) -> Option<ExtractedFields> {
        let (price, currency) = parse_price(&first_text(&self.price_re, content)?)?;
        let ship = first_text(&self.ship_re, content)?;
        let nights = self.nights_from_label(&first_text(&self.nights_re, content)?)?;

        let departure_port = first_text(&self.port_re, content).unwrap_or_default();
        let sail_date = first_text(&self.date_re, content)
            .as_deref()
            .and_then(parse_sail_date);
        // Card-level markup carries the lead-in (interior) fare only
        let cabin = CabinCategory::Interior;

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
