// src/lib.rs

pub mod analyzer;
pub mod config;
pub mod detector;
pub mod errors;
pub mod fetcher;
pub mod notifier;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod strategies;
pub mod types;

pub use analyzer::TrendAnalyzer;
pub use config::{SelectorConfig, TrackerConfig};
pub use detector::{DealDetector, Evaluation};
pub use fetcher::{ContentFetcher, PageFetcher};
pub use notifier::{NotificationChannel, NotificationDispatcher, TelegramChannel};
pub use orchestrator::RunOrchestrator;
pub use store::{AppendOutcome, SnapshotStore};
pub use strategies::StrategyChain;
