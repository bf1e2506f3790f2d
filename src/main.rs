use anyhow::Context;
use clap::{Parser, Subcommand};
use pv_verify::config::Config;
use pv_verify::detection::CommandModel;
use pv_verify::error::AppResult;
use pv_verify::logging;
use pv_verify::site::{SampleId, Site};
use pv_verify::site_list;
use pv_verify::{BatchRunner, BatchSummary, SiteOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "pv-verify", version, about = "Rooftop solar verification from aerial imagery")]
struct Cli {
    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify every site in a CSV (sample_id, lat/latitude, lon/longitude)
    Batch {
        sites: PathBuf,
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Verify a single coordinate
    Site {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value = "site")]
        id: String,
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write the default configuration
    InitConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::initialize_tracing(&cli.log_level);
    logging::log_runtime_environment();

    if let Err(e) = run(cli.command) {
        tracing::error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> AppResult<()> {
    match command {
        Commands::Batch {
            sites,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let sites = site_list::read_sites(&sites)
                .with_context(|| format!("Failed to read sites from {}", sites.display()))?;
            let summary = run_batch(&config, &sites, &output)?;
            print_summary(&summary, &output);
        }
        Commands::Site {
            lat,
            lon,
            id,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let site = Site::new(SampleId::parse(&id), lat, lon);
            let summary = run_batch(&config, std::slice::from_ref(&site), &output)?;
            for record in &summary.records {
                println!("{}", serde_json::to_string_pretty(record)?);
            }
        }
        Commands::InitConfig { config } => {
            let path = match config {
                Some(path) => path,
                None => Config::default_path()?,
            };
            Config::default()
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Default configuration written to {}", path.display());
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> AppResult<Config> {
    let config = Config::load(path).context("Configuration rejected")?;
    tracing::info!(
        confidence = config.detection.confidence_threshold,
        iou = config.detection.iou_threshold,
        zoom = config.imagery.zoom,
        "✓ Configuration loaded"
    );
    Ok(config)
}

fn run_batch(config: &Config, sites: &[Site], output: &Path) -> AppResult<BatchSummary> {
    let model = CommandModel::new(&config.detection).context("Failed to set up detection")?;
    let orchestrator = SiteOrchestrator::from_config(config, Arc::new(model))
        .context("Failed to set up imagery providers")?;
    let runner = BatchRunner::new(Arc::new(orchestrator), output, &config.batch);
    let summary = runner
        .run(sites)
        .with_context(|| format!("Batch failed writing to {}", output.display()))?;
    Ok(summary)
}

fn print_summary(summary: &BatchSummary, output: &Path) {
    println!("===========================================");
    println!("  Sites processed: {}", summary.records.len());
    println!("  With solar:      {}", summary.with_solar());
    if summary.skipped > 0 {
        println!("  Skipped:         {}", summary.skipped);
    }
    if summary.write_failures > 0 {
        println!("  Write failures:  {}", summary.write_failures);
    }
    println!("  Elapsed:         {:.1}s", summary.elapsed.as_secs_f64());
    println!("  Output:          {}", output.display());
    println!("===========================================");
}
