use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::time::{interval, sleep, Duration};

use activity_tracker_rs::live_status::LiveStatus;
use activity_tracker_rs::sensors::SensorSet;
use activity_tracker_rs::store::{export_log, load_export, JsonlLog, LogEntry, LogStore};
use activity_tracker_rs::{Metrics, MetricsEngine, SessionController, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "activity_tracker")]
#[command(about = "Record GPS and motion sensors to a log and derive activity metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a tracking session
    Track(TrackArgs),
    /// Compute metrics over a log or an export
    Metrics(MetricsArgs),
    /// Delete every record in a log
    Clean {
        #[arg(long)]
        store: PathBuf,
    },
    /// Dump a log to JSON (gzip when OUT ends in .gz)
    Export {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Args, Debug)]
struct TrackArgs {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Snapshot log (JSON lines)
    #[arg(long, default_value = "activity_sessions/log.jsonl")]
    store: PathBuf,

    /// Tracker config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for live_status.json
    #[arg(long, default_value = "activity_sessions")]
    output_dir: PathBuf,

    /// Use synthetic sensors instead of Termux:API
    #[arg(long)]
    simulate: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false, id = "source")]
struct MetricsSource {
    /// Snapshot log (JSON lines)
    #[arg(long)]
    store: Option<PathBuf>,

    /// File written by `export`
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MetricsArgs {
    #[command(flatten)]
    source: MetricsSource,

    /// Print the full metrics as JSON
    #[arg(long)]
    json: bool,

    /// Outlier speed cutoff (km/h)
    #[arg(long)]
    speed_threshold: Option<f64>,

    /// Tracker config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Track(args) => track(args).await,
        Command::Metrics(args) => metrics(args),
        Command::Clean { store } => {
            let log = JsonlLog::open(&store)
                .with_context(|| format!("opening {}", store.display()))?;
            let removed = log.len()?;
            log.clear()?;
            println!("[{}] Cleared {} records from {}", ts_now(), removed, store.display());
            Ok(())
        }
        Command::Export { store, out } => {
            let log = JsonlLog::open(&store)
                .with_context(|| format!("opening {}", store.display()))?;
            let count = export_log(&log, &out)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("[{}] Exported {} records to {}", ts_now(), count, out.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    match path {
        Some(path) => Ok(TrackerConfig::from_file(path)?),
        None => Ok(TrackerConfig::default()),
    }
}

async fn track(args: TrackArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    std::fs::create_dir_all(&args.output_dir)?;

    println!("[{}] Activity Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Store: {}", args.store.display());
    println!("  Output Dir: {}", args.output_dir.display());

    let log = JsonlLog::open(&args.store)
        .with_context(|| format!("opening {}", args.store.display()))?;
    let sensors = if args.simulate {
        SensorSet::simulated()
    } else {
        SensorSet::device()
    };
    let mut controller = SessionController::new(config, sensors, Arc::new(log));
    controller.start()?;

    let status_path = args.output_dir.join("live_status.json");
    let mut status_tick = interval(Duration::from_secs(2));
    let duration = args.duration;
    let deadline = async move {
        if duration == 0 {
            std::future::pending::<()>().await
        } else {
            sleep(Duration::from_secs(duration)).await
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                if let Err(e) = LiveStatus::from_controller(&controller).save(&status_path) {
                    log::warn!("Failed to write {}: {}", status_path.display(), e);
                }
            }
            _ = &mut deadline => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = &mut ctrl_c => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        }
    }

    controller.stop();
    controller.flush().await?;

    let final_path = args.output_dir.join("live_status_final.json");
    if let Err(e) = LiveStatus::from_controller(&controller).save(&final_path) {
        log::warn!("Failed to write {}: {}", final_path.display(), e);
    }

    let counts = controller.write_counts();
    println!(
        "[{}] Session recorded in {}s: {} snapshots written, {} dropped, {} failed",
        ts_now(),
        controller.consumed_secs(),
        counts.persisted,
        counts.dropped,
        counts.failed
    );

    let metrics = controller.compute_metrics()?;
    print_summary(&metrics);
    Ok(())
}

fn metrics(args: MetricsArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?.metrics;
    if let Some(threshold) = args.speed_threshold {
        config.speed_threshold_kmh = threshold;
    }

    let entries: Vec<LogEntry> = match (&args.source.store, &args.source.export) {
        (Some(store), _) => JsonlLog::open(store)
            .with_context(|| format!("opening {}", store.display()))?
            .get_all()?,
        (None, Some(export)) => load_export(export)
            .with_context(|| format!("reading {}", export.display()))?
            .entries,
        (None, None) => anyhow::bail!("either --store or --export is required"),
    };

    let metrics = MetricsEngine::new(config).compute(&entries);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_summary(&metrics);
    }
    Ok(())
}

fn print_summary(metrics: &Metrics) {
    println!("\n=== Activity Metrics ===");
    println!("Distance: {:.3} km", metrics.total_distance_km());
    println!("Average speed: {:.2} km/h", metrics.average_speed_kmh);
    println!("Max speed: {:.2} km/h", metrics.max_speed_kmh);
    println!("Moving time: {:.3} h", metrics.session_time_hours);
    println!("Calories: {:.3} kcal", metrics.calories_kcal);
    println!("Abrupt movements: {}", metrics.abrupt_movements);
    println!(
        "Heatmap points: {}, route segments: {}",
        metrics.heatmap.len(),
        metrics.routes.len()
    );
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
