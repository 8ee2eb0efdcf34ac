// src/fetcher.rs
// Polite page retrieval: per-host spacing, bounded in-flight requests,
// bounded-backoff retry. Every fetch leaves a RawCapture behind, failed
// ones included.

use crate::config::TrackerConfig;
use crate::errors::{FetchError, FetchErrorKind};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::SnapshotStore;
use crate::types::{FetchTarget, RawCapture};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) cruise-price-tracker/0.1";

/// Page retrieval as a capability, so the orchestrator can be driven
/// without live HTTP behind it.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, target: &FetchTarget) -> Result<RawCapture, FetchError>;
}

pub struct PageFetcher {
    client: Client,
    store: Arc<SnapshotStore>,
    retry_policy: RetryPolicy,
    min_interval: Duration,
    // One permit per allowed in-flight request, across all hosts
    in_flight: Arc<Semaphore>,
    // Per-host timestamp of the last request; the mutex is held while
    // waiting out the interval so same-host requests stay spaced
    host_last_request: DashMap<String, Arc<Mutex<Instant>>>,
}

/// Map an HTTP status to an error kind, or None when it is a success.
pub fn classify_status(status: u16) -> Option<FetchErrorKind> {
    match status {
        200..=299 => None,
        429 => Some(FetchErrorKind::Transient),
        500..=599 => Some(FetchErrorKind::Transient),
        _ => Some(FetchErrorKind::Permanent),
    }
}

impl PageFetcher {
    pub fn new(config: &TrackerConfig, store: Arc<SnapshotStore>) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        info!(
            "🌐 Fetcher ready: {} in-flight max, {}ms per-host spacing",
            config.max_concurrent_fetches, config.min_request_interval_ms
        );

        Self {
            client,
            store,
            retry_policy: config.fetch_retry,
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            host_last_request: DashMap::new(),
        }
    }

    pub async fn fetch(&self, target: &FetchTarget) -> Result<RawCapture, FetchError> {
        let result = retry_with_backoff(
            &self.retry_policy,
            &format!("fetch {}", target.slug),
            FetchError::is_transient,
            || self.fetch_once(target),
        )
        .await;

        match result {
            Ok(capture) => {
                self.store.record_raw_capture(&capture).await;
                Ok(capture)
            }
            Err(e) => {
                warn!("🌐 Fetch failed for {}: {}", target.slug, e);
                Err(e)
            }
        }
    }

    async fn fetch_once(&self, target: &FetchTarget) -> Result<RawCapture, FetchError> {
        self.wait_for_host_slot(&target.url).await;

        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::Transient {
                url: target.url.clone(),
                reason: "fetch pool closed".to_string(),
            })?;

        debug!("🌐 GET {}", target.url);
        let response = match self.client.get(&target.url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.record_failed_fetch(target, None, String::new()).await;
                return Err(classify_reqwest_error(&target.url, e));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                self.record_failed_fetch(target, Some(status), String::new()).await;
                return Err(FetchError::Transient {
                    url: target.url.clone(),
                    reason: format!("body read failed: {}", e),
                });
            }
        };

        match classify_status(status) {
            None => Ok(RawCapture {
                target_slug: target.slug.clone(),
                url: target.url.clone(),
                http_status: Some(status),
                body,
                fetched_at: Utc::now(),
            }),
            Some(kind) => {
                // The failing response goes to disk as-is so a site change
                // can be diagnosed offline
                self.record_failed_fetch(target, Some(status), body).await;
                let reason = format!("HTTP {}", status);
                Err(match kind {
                    FetchErrorKind::Transient => FetchError::Transient {
                        url: target.url.clone(),
                        reason,
                    },
                    FetchErrorKind::Permanent => FetchError::Permanent {
                        url: target.url.clone(),
                        reason,
                    },
                })
            }
        }
    }

    async fn record_failed_fetch(&self, target: &FetchTarget, http_status: Option<u16>, body: String) {
        self.store
            .record_raw_capture(&RawCapture {
                target_slug: target.slug.clone(),
                url: target.url.clone(),
                http_status,
                body,
                fetched_at: Utc::now(),
            })
            .await;
    }

    /// Enforce the minimum inter-request interval for the target's host.
    /// The per-host mutex stays held while sleeping, which serializes
    /// same-host requests without blocking other hosts.
    async fn wait_for_host_slot(&self, url: &str) {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        let slot = self
            .host_last_request
            .entry(host)
            .or_insert_with(|| {
                Arc::new(Mutex::new(
                    Instant::now()
                        .checked_sub(self.min_interval)
                        .unwrap_or_else(Instant::now),
                ))
            })
            .clone();

        let mut last = slot.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

#[async_trait]
impl ContentFetcher for PageFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<RawCapture, FetchError> {
        PageFetcher::fetch(self, target).await
    }
}

fn classify_reqwest_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        FetchError::Transient {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        FetchError::Permanent {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::store::SnapshotStore;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_fetcher(data_dir: &Path, max_attempts: u32) -> PageFetcher {
        let mut config = TrackerConfig::from_env();
        config.data_dir = data_dir.to_path_buf();
        config.min_request_interval_ms = 0;
        config.fetch_retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let store = Arc::new(SnapshotStore::open(data_dir, 60).unwrap());
        PageFetcher::new(&config, store)
    }

    // One-shot HTTP server returning a canned response for every request
    async fn serve(response: &'static str, requests: usize) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..requests {
                if let Ok((mut socket, _)) = listener.accept().await {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                }
            }
        });
        format!("http://{}", addr)
    }

    fn raw_captures(data_dir: &Path) -> Vec<RawCapture> {
        std::fs::read_dir(data_dir.join("raw"))
            .unwrap()
            .map(|entry| {
                let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
                serde_json::from_str(&contents).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn not_found_leaves_a_capture_with_status_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path(), 1);
        let url = serve(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 12\r\nconnection: close\r\n\r\ngone fishing",
            1,
        )
        .await;

        let result = fetcher
            .fetch(&FetchTarget { slug: "oa-7n".to_string(), url })
            .await;

        assert!(matches!(result, Err(FetchError::Permanent { .. })));
        let captures = raw_captures(dir.path());
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].http_status, Some(404));
        assert_eq!(captures[0].body, "gone fishing");
    }

    #[tokio::test]
    async fn server_error_captures_survive_retry_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path(), 2);
        let url = serve(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 11\r\nconnection: close\r\n\r\ncome back l",
            2,
        )
        .await;

        let result = fetcher
            .fetch(&FetchTarget { slug: "oa-7n".to_string(), url })
            .await;

        assert!(matches!(result, Err(FetchError::Transient { .. })));
        let captures = raw_captures(dir.path());
        assert!(!captures.is_empty());
        assert!(captures.iter().all(|c| c.http_status == Some(503)));
    }

    #[test]
    fn success_statuses_are_not_errors() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert_eq!(classify_status(429), Some(FetchErrorKind::Transient));
        assert_eq!(classify_status(500), Some(FetchErrorKind::Transient));
        assert_eq!(classify_status(503), Some(FetchErrorKind::Transient));
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_eq!(classify_status(404), Some(FetchErrorKind::Permanent));
        assert_eq!(classify_status(403), Some(FetchErrorKind::Permanent));
        assert_eq!(classify_status(301), Some(FetchErrorKind::Permanent));
    }
}
