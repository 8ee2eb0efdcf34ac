// src/config.rs
// Environment-driven tracker settings plus the hot-editable selector file

use crate::errors::TrackerError;
use crate::retry::RetryPolicy;
use crate::types::FetchTarget;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// All tunables, read once at process start. Notification credentials are
/// read separately by the Telegram channel and never logged.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub data_dir: PathBuf,
    pub selectors_path: PathBuf,
    pub targets_path: PathBuf,

    // Fetch politeness
    pub worker_count: usize,
    pub max_concurrent_fetches: usize,
    pub min_request_interval_ms: u64,
    pub run_timeout_secs: u64,
    pub fetch_retry: RetryPolicy,

    // Baseline window
    pub baseline_max_observations: usize,
    pub baseline_max_age_days: i64,
    pub min_sample_count: usize,

    // Deal thresholds
    pub threshold_ratio: f64,
    pub stddev_multiplier: f64,

    // Notification dedup
    pub dedup_window_hours: i64,
    pub score_improvement_margin: f64,
    pub notify_retry: RetryPolicy,

    // Snapshot dedup granularity and run health
    pub run_window_minutes: i64,
    pub site_change_fraction: f64,
    pub sail_date_horizon_days: i64,
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));
        let selectors_path = PathBuf::from(
            env::var("SELECTORS_FILE").unwrap_or_else(|_| "selectors.json".to_string()),
        );
        let targets_path =
            PathBuf::from(env::var("TARGETS_FILE").unwrap_or_else(|_| "targets.json".to_string()));

        let config = Self {
            data_dir,
            selectors_path,
            targets_path,
            worker_count: env_parse("WORKER_COUNT", 3usize).clamp(1, 16),
            max_concurrent_fetches: env_parse("MAX_CONCURRENT_FETCHES", 3usize).clamp(1, 8),
            min_request_interval_ms: env_parse("MIN_REQUEST_INTERVAL_MS", 1500u64),
            run_timeout_secs: env_parse("RUN_TIMEOUT_SECS", 300u64),
            fetch_retry: RetryPolicy {
                max_attempts: env_parse("FETCH_MAX_ATTEMPTS", 3u32),
                base_delay: Duration::from_millis(env_parse("FETCH_BASE_DELAY_MS", 500u64)),
                max_delay: Duration::from_millis(env_parse("FETCH_MAX_DELAY_MS", 8_000u64)),
            },
            baseline_max_observations: env_parse("BASELINE_MAX_OBSERVATIONS", 30usize),
            baseline_max_age_days: env_parse("BASELINE_MAX_AGE_DAYS", 90i64),
            min_sample_count: env_parse("BASELINE_MIN_SAMPLES", 3usize),
            threshold_ratio: env_parse("DEAL_THRESHOLD_RATIO", 0.10f64),
            stddev_multiplier: env_parse("DEAL_STDDEV_MULTIPLIER", 2.0f64),
            dedup_window_hours: env_parse("NOTIFY_DEDUP_WINDOW_HOURS", 24i64),
            score_improvement_margin: env_parse("NOTIFY_SCORE_MARGIN", 0.05f64),
            notify_retry: RetryPolicy {
                max_attempts: env_parse("NOTIFY_MAX_ATTEMPTS", 3u32),
                base_delay: Duration::from_millis(env_parse("NOTIFY_BASE_DELAY_MS", 1_000u64)),
                max_delay: Duration::from_millis(env_parse("NOTIFY_MAX_DELAY_MS", 15_000u64)),
            },
            run_window_minutes: env_parse("RUN_WINDOW_MINUTES", 60i64),
            site_change_fraction: env_parse("SITE_CHANGE_FRACTION", 0.5f64),
            sail_date_horizon_days: env_parse("SAIL_DATE_HORIZON_DAYS", 730i64),
        };

        info!("⚙️  Tracker config loaded:");
        info!("   Workers: {} (max {} in-flight fetches)", config.worker_count, config.max_concurrent_fetches);
        info!("   Min request interval: {}ms", config.min_request_interval_ms);
        info!("   Deal thresholds: ratio {:.2}, stddev x{:.1}", config.threshold_ratio, config.stddev_multiplier);
        info!("   Notify dedup window: {}h (margin {:.2})", config.dedup_window_hours, config.score_improvement_margin);

        config
    }

    pub fn load_targets(&self) -> Result<Vec<FetchTarget>, TrackerError> {
        let raw = std::fs::read_to_string(&self.targets_path).map_err(|e| {
            TrackerError::Config(format!(
                "cannot read targets file {}: {}",
                self.targets_path.display(),
                e
            ))
        })?;
        let targets: Vec<FetchTarget> = serde_json::from_str(&raw)
            .map_err(|e| TrackerError::Config(format!("invalid targets file: {}", e)))?;
        if targets.is_empty() {
            warn!("🗺️  Targets file {} is empty", self.targets_path.display());
        }
        Ok(targets)
    }
}

/// Selector/pattern configuration for the strategy chain. Operators edit
/// this file when the upstream markup shifts; no code change needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub structured: StructuredSelectors,
    pub dom_path: DomPathSelectors,
    pub text_regex: TextRegexSelectors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSelectors {
    pub price_keys: Vec<String>,
    pub ship_keys: Vec<String>,
    pub departure_port_keys: Vec<String>,
    pub nights_keys: Vec<String>,
    pub sail_date_keys: Vec<String>,
    pub cabin_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomPathSelectors {
    pub price_marker: String,
    pub ship_marker: String,
    pub port_marker: String,
    pub nights_marker: String,
    pub date_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRegexSelectors {
    pub price_pattern: String,
    pub ship_pattern: String,
    pub port_pattern: String,
    pub nights_pattern: String,
    pub date_pattern: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            structured: StructuredSelectors {
                price_keys: vec!["price".into(), "base_price".into()],
                ship_keys: vec!["ship".into(), "ship_name".into()],
                departure_port_keys: vec!["departure_port".into(), "departure".into()],
                nights_keys: vec!["nights".into()],
                sail_date_keys: vec!["sail_date".into(), "date".into()],
                cabin_keys: vec!["cabin".into(), "room_type".into()],
            },
            dom_path: DomPathSelectors {
                price_marker: "cruise-price-label".into(),
                ship_marker: "cruise-ship-label".into(),
                port_marker: "cruise-roundtrip-label".into(),
                nights_marker: "cruise-duration-label".into(),
                date_marker: "cruise-sail-date-label".into(),
            },
            text_regex: TextRegexSelectors {
                price_pattern: r"([€£$])\s*([\d,]+(?:\.\d{1,2})?)".into(),
                ship_pattern: r"((?:[A-Z][a-z']+ )+of the Seas)".into(),
                port_pattern: r"(?:from|departing)\s+([A-Z][A-Za-z ,.]+?)(?:\n|\||$)".into(),
                nights_pattern: r"(\d{1,2})\s*[- ]?\s*Night".into(),
                date_pattern: r"(\d{4}-\d{2}-\d{2})".into(),
            },
        }
    }
}

impl SelectorConfig {
    /// Load from the configured path; fall back to built-in defaults when
    /// the file is absent so a fresh checkout still works.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config: SelectorConfig = serde_json::from_str(&raw)
                    .map_err(|e| TrackerError::Config(format!("invalid selector file {}: {}", path.display(), e)))?;
                info!("🧭 Loaded selector config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("🧭 Selector file {} not found, using built-in defaults", path.display());
                Ok(SelectorConfig::default())
            }
            Err(e) => Err(TrackerError::Config(format!(
                "cannot read selector file {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
