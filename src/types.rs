// src/types.rs
// Data structures shared across the tracking pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinCategory {
    Interior,
    OceanView,
    Balcony,
    Suite,
}

impl CabinCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CabinCategory::Interior => "interior",
            CabinCategory::OceanView => "ocean_view",
            CabinCategory::Balcony => "balcony",
            CabinCategory::Suite => "suite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '$' => Some(Currency::Usd),
            '€' => Some(Currency::Eur),
            '£' => Some(Currency::Gbp),
            _ => None,
        }
    }
}

/// Stable identifier for one bookable sailing (ship + departure port +
/// sail date + cabin category). Derived deterministically so the same
/// sailing maps to the same key across site redesigns; never derived
/// from free-text titles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItineraryKey(pub String);

impl ItineraryKey {
    pub fn derive(
        ship: &str,
        departure_port: &str,
        sail_date: Option<NaiveDate>,
        nights: u32,
        cabin: CabinCategory,
    ) -> Self {
        let date_part = match sail_date {
            Some(d) => d.format("%Y-%m-%d").to_string(),
            None => format!("n{}", nights),
        };
        let key_input = format!(
            "{}|{}|{}|{}",
            ship.trim().to_lowercase(),
            departure_port.trim().to_lowercase(),
            date_part,
            cabin.as_str()
        );

        let mut hasher = Sha256::new();
        hasher.update(key_input.as_bytes());
        let hex_id = format!("{:x}", hasher.finalize());

        // First 16 chars of the hash are plenty for uniqueness here
        ItineraryKey(hex_id[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItineraryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field set a parsing strategy produces before validation. Snapshot
/// construction happens only after the owning strategy validates these.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub price: f64,
    pub currency: Currency,
    pub ship: String,
    pub departure_port: String,
    pub nights: u32,
    pub sail_date: Option<NaiveDate>,
    pub cabin: CabinCategory,
}

/// One price observation. Immutable once written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub itinerary_key: ItineraryKey,
    pub price: f64,
    pub currency: Currency,
    pub ship: String,
    pub departure_port: String,
    pub nights: u32,
    pub sail_date: Option<NaiveDate>,
    pub cabin: CabinCategory,
    pub captured_at: DateTime<Utc>,
    pub source_strategy: String,
}

impl Snapshot {
    pub fn from_fields(fields: ExtractedFields, strategy: &str, captured_at: DateTime<Utc>) -> Self {
        let itinerary_key = ItineraryKey::derive(
            &fields.ship,
            &fields.departure_port,
            fields.sail_date,
            fields.nights,
            fields.cabin,
        );
        Self {
            itinerary_key,
            price: fields.price,
            currency: fields.currency,
            ship: fields.ship,
            departure_port: fields.departure_port,
            nights: fields.nights,
            sail_date: fields.sail_date,
            cabin: fields.cabin,
            captured_at,
            source_strategy: strategy.to_string(),
        }
    }
}

/// Unparsed fetched content plus fetch metadata. Written even when the
/// fetch or extraction fails, so a broken run can be diagnosed offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCapture {
    pub target_slug: String,
    pub url: String,
    pub http_status: Option<u16>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Rolling statistics over an itinerary's recent snapshots. Pure function
/// of the snapshot history; recomputed on every new arrival for the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub itinerary_key: ItineraryKey,
    pub rolling_minimum: f64,
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: usize,
    pub insufficient_data: bool,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealEvent {
    pub id: String,
    pub itinerary_key: ItineraryKey,
    pub triggering_snapshot: Snapshot,
    pub baseline_at_detection: Baseline,
    pub drop_ratio: f64,
    pub score: f64,
    pub detected_at: DateTime<Utc>,
}

/// Ledger entry preventing repeat alerts for the same itinerary while the
/// dedup window is active. Created only after a dispatch attempt resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub itinerary_key: ItineraryKey,
    pub deal_event_id: String,
    pub score: f64,
    pub sent_at: DateTime<Utc>,
    pub dedup_window_end: DateTime<Utc>,
    pub delivered: bool,
}

/// One page the orchestrator asks the fetcher to retrieve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTarget {
    pub slug: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Suppressed,
    Failed,
}

/// Per-run counters returned by the orchestrator. This is the primary
/// failure-visibility channel for operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub targets: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub extraction_failed: usize,
    pub deduplicated: usize,
    pub new_snapshots: usize,
    pub deals_detected: usize,
    pub notifications_sent: usize,
    pub notifications_suppressed: usize,
    pub notifications_failed: usize,
    pub persistence_failed: usize,
    pub skipped_timeout: usize,
    pub likely_site_change: bool,
    pub elapsed_seconds: f64,
}
