//! KPI anomaly detection and channel root-cause attribution: CLI.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kpi_rootcause::config::EngineConfig;
use kpi_rootcause::engine::Engine;
use kpi_rootcause::registry::Registry;
use kpi_rootcause::report::{render_text, write_json_report};
use kpi_rootcause::store::SqliteStore;
use kpi_rootcause::util::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kpi-rootcause")]
#[command(about = "Daily KPI anomaly detection with channel root-cause attribution")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load channel-day counter rows from a JSON array into the SQLite store.
    Import {
        #[arg(long, value_name = "DB")]
        db: PathBuf,
        #[arg(long, value_name = "JSON")]
        json: PathBuf,
    },
    /// Detect anomalies for one day and explain them by channel.
    Analyze {
        #[arg(long, value_name = "DB")]
        db: PathBuf,
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: NaiveDate,
        #[arg(
            long = "metric",
            value_name = "ID",
            help = "Metric to analyze (repeatable); defaults to every registered metric"
        )]
        metrics: Vec<String>,
        #[arg(long, value_name = "TOML")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "DIR", help = "Write report.json into this directory")]
        out: Option<PathBuf>,
    },
    /// List registered metrics with direction, category, and minimum channel volume.
    Metrics {
        #[arg(long, value_name = "TOML")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, String> {
    match path {
        Some(p) => EngineConfig::load(p).map_err(|e| e.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Import { db, json } => run_import(db, json),
        Commands::Analyze {
            db,
            date,
            metrics,
            config,
            out,
        } => run_analyze(db, date, metrics, config, out),
        Commands::Metrics { config } => run_metrics(config),
    }
}

fn run_import(db: PathBuf, json: PathBuf) -> Result<(), String> {
    if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let mut store = SqliteStore::open(&db).map_err(|e| e.to_string())?;
    let n = store.import_json(&json).map_err(|e| e.to_string())?;
    match store.date_range().map_err(|e| e.to_string())? {
        Some((lo, hi)) => println!("imported {} row(s); data covers {} .. {}", n, lo, hi),
        None => println!("imported {} row(s)", n),
    }
    Ok(())
}

fn run_analyze(
    db: PathBuf,
    date: NaiveDate,
    metrics: Vec<String>,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<(), String> {
    if !db.is_file() {
        return Err(format!("database not found: {}", db.display()));
    }
    let cfg = load_config(config.as_ref())?;
    let registry = Registry::builtin().with_overrides(&cfg.directions, &cfg.min_volume);
    let store = SqliteStore::open(&db)
        .map_err(|e| e.to_string())?
        .with_registry(registry.clone());
    let engine = Engine::with_registry(store, registry, cfg);

    let report = if metrics.is_empty() {
        engine.batch_analyze_all(date)
    } else {
        engine.batch_analyze(&metrics, date)
    };
    print!("{}", render_text(&report));

    if let Some(dir) = out {
        let path = dir.join("report.json");
        write_json_report(&report, &path)?;
        tracing::info!("wrote {}", path.display());
    }
    Ok(())
}

fn run_metrics(config: Option<PathBuf>) -> Result<(), String> {
    let cfg = load_config(config.as_ref())?;
    let registry = Registry::builtin().with_overrides(&cfg.directions, &cfg.min_volume);
    println!(
        "{:<16} {:<22} {:<9} {:<12} {:>10}",
        "id", "name", "direction", "category", "min volume"
    );
    for (id, spec) in registry.iter() {
        println!(
            "{:<16} {:<22} {:<9} {:<12} {:>10}",
            id,
            registry.display_name(id),
            spec.direction.as_str(),
            format!("{:?}", spec.category).to_lowercase(),
            spec.min_volume
        );
    }
    Ok(())
}
