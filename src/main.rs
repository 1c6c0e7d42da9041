//! CLI entry point for the GTFS-RT aggregator.
//!
//! Provides subcommands for printing the merged arrivals and trip views,
//! polling them through the TTL cache, and archiving raw feed snapshots
//! into the fallback store.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use gtfs_rt_aggregator::{
    cache::{FeedCache, SystemClock},
    config::EngineConfig,
    fetch::{
        BasicClient, HttpFetcher, SnapshotFetcher,
        auth::{ApiKey, UrlParam},
    },
    output::append_reports,
    pipeline::Pipeline,
    sources::default_sources,
    stations::StationIndex,
    store::{DirStore, FallbackStore, S3Store},
    views::{ArrivalsResponse, cache_control, trips_in_direction},
};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_aggregator")]
#[command(about = "Merge GTFS-RT subway feeds into arrival and trip views", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// S3 bucket holding fallback snapshots (a local directory is used when unset)
    #[arg(long, global = true)]
    s3_bucket: Option<String>,

    /// Gzip snapshots stored in S3
    #[arg(long, global = true, default_value_t = false)]
    gzip: bool,

    /// Local directory for fallback snapshots
    #[arg(long, global = true, default_value = "snapshots")]
    store_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print upcoming arrivals per stop as JSON
    Arrivals {
        /// Only print this stop (canonical id, e.g. "L01")
        #[arg(long)]
        stop: Option<String>,

        /// CSV file to append per-feed refresh reports to
        #[arg(long)]
        report: Option<String>,
    },
    /// Print the trips of one service in one direction as JSON
    Trip {
        /// Route letter or number, e.g. "L"
        service: String,

        /// "N" or "S"
        direction: String,

        /// Generated station JSON; only stops listed there are printed
        #[arg(long)]
        stations: Option<String>,
    },
    /// Poll the cache and log arrivals for one stop
    Watch {
        /// Canonical stop id, e.g. "L01"
        stop: String,

        /// Seconds between polls
        #[arg(short, long, default_value_t = 20)]
        interval: u64,

        /// Number of polls (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        rounds: usize,
    },
    /// Fetch every feed and store the raw snapshots in the fallback store
    Archive {
        /// Seconds between rounds
        #[arg(short, long, default_value_t = 120)]
        interval: u64,

        /// Number of rounds (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        rounds: usize,

        /// CSV file to append per-feed reports to
        #[arg(long)]
        report: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_aggregator.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_aggregator.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    let pipeline = Pipeline::new(
        default_sources(),
        build_fetcher(&config)?,
        build_store(&cli.store).await,
        config.delay_threshold_secs,
    );
    let cache = FeedCache::new(pipeline, Arc::new(SystemClock), config.ttl);

    match cli.command {
        Commands::Arrivals { stop, report } => {
            let entry = cache.get().await;
            if let Some(path) = report {
                append_reports(&path, entry.as_of, &entry.reports)?;
            }

            let mut response = ArrivalsResponse::from_entry(&entry);
            if let Some(stop) = stop {
                response.data.retain(|stop_id, _| *stop_id == stop);
            }
            info!(
                cache_control = %cache_control(cache.ttl()),
                error_message = %response.error_message,
                "Arrivals ready"
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Trip {
            service,
            direction,
            stations,
        } => {
            let stations = stations.map(|path| StationIndex::load(&path)).transpose()?;
            let entry = cache.get().await;

            let trips = trips_in_direction(&entry.data, &service, &direction, |stop_id| {
                stations.as_ref().is_none_or(|index| index.contains(stop_id))
            });
            info!(service = %service, direction = %direction, trips = trips.len(), "Trips selected");
            println!("{}", serde_json::to_string_pretty(&trips)?);
        }
        Commands::Watch {
            stop,
            interval,
            rounds,
        } => {
            watch(&cache, &stop, interval, rounds).await;
        }
        Commands::Archive {
            interval,
            rounds,
            report,
        } => {
            archive(cache.pipeline(), interval, rounds, report.as_deref()).await?;
        }
    }

    cache.flush().await;
    Ok(())
}

/// Builds the live fetcher, attaching the API key the way the configured
/// endpoint expects it.
fn build_fetcher(config: &EngineConfig) -> Result<Arc<dyn SnapshotFetcher>> {
    let client = BasicClient::new();
    let fetcher: Arc<dyn SnapshotFetcher> = match (&config.api_key, &config.api_key_header) {
        (Some(key), Some(header)) => Arc::new(HttpFetcher::new(
            ApiKey::new(client, header, key)?,
            &config.feed_url,
            config.retry,
        )),
        (Some(key), None) => Arc::new(HttpFetcher::new(
            UrlParam::new(client, "key", key.as_str()),
            &config.feed_url,
            config.retry,
        )),
        (None, _) => {
            warn!("GTFS_REALTIME_API_KEY not set, fetching feeds without a key");
            Arc::new(HttpFetcher::new(client, &config.feed_url, config.retry))
        }
    };
    Ok(fetcher)
}

async fn build_store(args: &StoreArgs) -> Arc<dyn FallbackStore> {
    match &args.s3_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, gzip = args.gzip, "Using S3 fallback store");
            Arc::new(S3Store::from_env(bucket.as_str(), args.gzip).await)
        }
        None => {
            info!(dir = %args.store_dir, "Using local fallback store");
            Arc::new(DirStore::new(&args.store_dir))
        }
    }
}

/// Reads the cache every `interval` seconds. Polls closer together than
/// the TTL are served from the cached entry.
#[tracing::instrument(skip(cache))]
async fn watch(cache: &FeedCache, stop: &str, interval: u64, rounds: usize) {
    let mut round = 0;
    loop {
        round += 1;
        let entry = cache.get().await;
        let response = ArrivalsResponse::from_entry(&entry);

        match response.data.get(stop) {
            Some(arrivals) => info!(
                as_of = %entry.as_of,
                north = ?arrivals.north,
                south = ?arrivals.south,
                "Arrivals"
            ),
            None => warn!(as_of = %entry.as_of, "No arrivals for stop"),
        }
        if !response.error_message.is_empty() {
            warn!(message = %response.error_message, "Partial data");
        }

        if rounds > 0 && round >= rounds {
            break;
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

/// Stores fresh snapshots for every feed, `rounds` times (0 = forever).
#[tracing::instrument(skip(pipeline))]
async fn archive(
    pipeline: &Pipeline,
    interval: u64,
    rounds: usize,
    report: Option<&str>,
) -> Result<()> {
    if rounds == 0 {
        info!(interval, "Archiving indefinitely. Press Ctrl+C to stop.");
    }

    let mut round = 0;
    loop {
        round += 1;
        info!(round, "Starting archive round");

        let reports = pipeline.archive().await;
        let stored = reports.iter().filter(|r| r.error.is_none()).count();
        info!(stored, total = reports.len(), "Archive round complete");

        if let Some(path) = report {
            append_reports(path, Utc::now(), &reports)?;
        }

        if rounds > 0 && round >= rounds {
            break;
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
    Ok(())
}
