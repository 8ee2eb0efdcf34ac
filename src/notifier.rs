// src/notifier.rs
// Turns deal events into deduplicated outbound alerts. The transport is
// an injected capability; Telegram is the default channel. The dedup
// ledger persists across runs so a 24h window actually means 24 hours.

use crate::config::TrackerConfig;
use crate::errors::{NotificationError, TrackerError};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{DealEvent, DispatchOutcome, ItineraryKey, NotificationRecord};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Channels without usable credentials report false; the dispatcher
    /// then records a failed attempt instead of pretending it delivered.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn deliver(&self, deal: &DealEvent) -> Result<(), NotificationError>;
}

/// Telegram transport. Credentials come from the environment once at
/// construction and are never logged.
pub struct TelegramChannel {
    client: Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
    enabled: bool,
}

impl TelegramChannel {
    pub fn new() -> Self {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        let chat_id = env::var("TELEGRAM_CHAT_ID").ok();
        let enabled = bot_token.is_some() && chat_id.is_some();

        if enabled {
            info!("📱 Telegram channel initialized");
        } else {
            warn!("📱 Telegram channel disabled - missing TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID");
        }

        Self {
            client: Client::new(),
            bot_token,
            chat_id,
            enabled,
        }
    }

    fn format_message(deal: &DealEvent) -> String {
        let snapshot = &deal.triggering_snapshot;
        let sail_date = snapshot
            .sail_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("{} nights", snapshot.nights));
        format!(
            "🚢 *CRUISE PRICE DROP* 🚢\n\
            \n\
            🛳 *Ship:* `{}`\n\
            📍 *Departs:* `{}`\n\
            📅 *Sailing:* `{}`\n\
            🛏 *Cabin:* `{}`\n\
            💰 *Price:* `{:.2}` (was at least `{:.2}`)\n\
            📉 *Drop:* `{:.1}%`\n\
            📅 *Detected:* `{}`",
            snapshot.ship,
            snapshot.departure_port,
            sail_date,
            snapshot.cabin.as_str(),
            snapshot.price,
            deal.baseline_at_detection.rolling_minimum,
            deal.score * 100.0,
            deal.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

impl Default for TelegramChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn deliver(&self, deal: &DealEvent) -> Result<(), NotificationError> {
        let (bot_token, chat_id) = match (self.bot_token.as_deref(), self.chat_id.as_deref()) {
            (Some(token), Some(chat)) if self.enabled => (token, chat),
            _ => {
                return Err(NotificationError::TransportFailed(
                    "telegram channel disabled".to_string(),
                ))
            }
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
        let payload = json!({
            "chat_id": chat_id,
            "text": Self::format_message(deal),
            "parse_mode": "Markdown",
            "disable_web_page_preview": true
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::TransportFailed(e.to_string()))?;

        if response.status().is_success() {
            info!(
                "📱 Alert sent for {} {} @ {:.2}",
                deal.triggering_snapshot.ship, deal.itinerary_key, deal.triggering_snapshot.price
            );
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            Err(NotificationError::TransportFailed(format!("HTTP {}: {}", status, body)))
        }
    }
}

pub struct NotificationDispatcher {
    channel: Box<dyn NotificationChannel>,
    ledger: Mutex<HashMap<ItineraryKey, NotificationRecord>>,
    ledger_path: PathBuf,
    retry_policy: RetryPolicy,
    dedup_window: Duration,
    score_margin: f64,
}

impl NotificationDispatcher {
    pub fn new(
        config: &TrackerConfig,
        channel: Box<dyn NotificationChannel>,
    ) -> Result<Self, TrackerError> {
        let ledger_path = config.data_dir.join("notifications.jsonl");
        let ledger = load_ledger(&ledger_path)?;
        info!(
            "📢 Dispatcher ready on '{}' channel ({} active records)",
            channel.name(),
            ledger.len()
        );
        Ok(Self {
            channel,
            ledger: Mutex::new(ledger),
            ledger_path,
            retry_policy: config.notify_retry,
            dedup_window: Duration::hours(config.dedup_window_hours),
            score_margin: config.score_improvement_margin,
        })
    }

    /// Send one deal, suppressing repeats: while a delivered record's
    /// window is active, only a deal whose score beats the recorded one
    /// by the configured margin goes out again.
    pub async fn dispatch(&self, deal: &DealEvent) -> DispatchOutcome {
        let now = Utc::now();
        let mut ledger = self.ledger.lock().await;

        if let Some(record) = ledger.get(&deal.itinerary_key) {
            let window_active = record.delivered && now < record.dedup_window_end;
            if window_active && deal.score <= record.score + self.score_margin {
                info!(
                    "🔕 Suppressed alert for {} (score {:.3} within margin of {:.3})",
                    deal.itinerary_key, deal.score, record.score
                );
                return DispatchOutcome::Suppressed;
            }
        }

        // A disabled channel is recorded as a failed attempt: the record
        // must never open a suppression window while alerts go nowhere
        let delivery = if self.channel.is_enabled() {
            retry_with_backoff(
                &self.retry_policy,
                &format!("notify {}", deal.itinerary_key),
                |_| true,
                || self.channel.deliver(deal),
            )
            .await
        } else {
            warn!(
                "📢 Channel '{}' disabled, cannot deliver alert for {}",
                self.channel.name(),
                deal.itinerary_key
            );
            Err(NotificationError::TransportFailed(format!(
                "{} channel disabled",
                self.channel.name()
            )))
        };

        let delivered = delivery.is_ok();
        let record = NotificationRecord {
            itinerary_key: deal.itinerary_key.clone(),
            deal_event_id: deal.id.clone(),
            score: deal.score,
            sent_at: now,
            dedup_window_end: now + self.dedup_window,
            delivered,
        };
        self.persist_record(&record).await;
        ledger.insert(deal.itinerary_key.clone(), record);

        match delivery {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                error!("📢 Notification failed for {} after retries: {}", deal.itinerary_key, e);
                DispatchOutcome::Failed
            }
        }
    }

    async fn persist_record(&self, record: &NotificationRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                error!("📢 Failed to serialize notification record: {}", e);
                return;
            }
        };
        let result = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .await;
        match result {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                    error!("📢 Failed to append notification record: {}", e);
                }
            }
            Err(e) => error!("📢 Failed to open notification ledger: {}", e),
        }
    }
}

fn load_ledger(path: &Path) -> Result<HashMap<ItineraryKey, NotificationRecord>, TrackerError> {
    let mut ledger = HashMap::new();
    if !path.exists() {
        return Ok(ledger);
    }
    let raw = std::fs::read_to_string(path)?;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<NotificationRecord>(line) {
            // Later lines win: the newest record per key is authoritative
            Ok(record) => {
                ledger.insert(record.itinerary_key.clone(), record);
            }
            Err(e) => warn!("📢 Skipping bad ledger line: {}", e),
        }
    }
    Ok(ledger)
}
