// src/main.rs

use clap::Parser;
use cruise_price_tracker::config::{SelectorConfig, TrackerConfig};
use cruise_price_tracker::errors::TrackerError;
use cruise_price_tracker::{
    DealDetector, NotificationDispatcher, PageFetcher, RunOrchestrator, SnapshotStore,
    StrategyChain, TelegramChannel, TrendAnalyzer,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "cruise_price_tracker", about = "Cruise price tracking and deal alerts")]
struct Cli {
    /// Run one scraping cycle over the tracked itineraries
    #[arg(long)]
    scrape: bool,

    /// Rebuild the CSV export from the snapshot log into the given file
    #[arg(long, value_name = "CSV_PATH")]
    convert: Option<PathBuf>,

    /// Cap the number of itineraries processed this run
    #[arg(long)]
    max_itineraries: Option<usize>,

    /// Output CSV file path
    #[arg(long, default_value = "data/cruise_prices.csv")]
    csv_output: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "tracker.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let cli = Cli::parse();
    if !cli.scrape && cli.convert.is_none() {
        eprintln!("Please specify --scrape and/or --convert <path> (see --help)");
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("💥 Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), TrackerError> {
    let started = std::time::Instant::now();
    let config = TrackerConfig::from_env();

    // A store that cannot be opened at all is the one run-level fatal case
    let store = Arc::new(SnapshotStore::open(&config.data_dir, config.run_window_minutes)?);

    if cli.scrape {
        let selectors = SelectorConfig::load(&config.selectors_path)?;
        let chain = StrategyChain::from_config(&selectors, config.sail_date_horizon_days)?;
        let fetcher = PageFetcher::new(&config, Arc::clone(&store));
        let analyzer = TrendAnalyzer::new(&config, Arc::clone(&store));
        let detector = DealDetector::new(&config);
        let dispatcher = NotificationDispatcher::new(&config, Box::new(TelegramChannel::new()))?;

        let mut targets = config.load_targets()?;
        if let Some(max) = cli.max_itineraries {
            targets.truncate(max);
        }

        let orchestrator = RunOrchestrator::new(
            &config,
            Arc::clone(&store),
            Box::new(fetcher),
            chain,
            analyzer,
            detector,
            dispatcher,
        );
        let summary = orchestrator.run(&targets).await;

        // Keep the dashboard's flattened view current after every run
        if let Err(e) = store.export_csv(&cli.csv_output).await {
            error!("📊 CSV export failed: {}", e);
        }

        match serde_json::to_string(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize run summary: {}", e),
        }
    }

    if let Some(path) = &cli.convert {
        let rows = store.export_csv(path).await?;
        info!("🔁 Converted snapshot log to {} ({} rows)", path.display(), rows);
    }

    let elapsed = started.elapsed();
    info!("⏱️  Elapsed: {}m {}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60);
    Ok(())
}
