//! CLI entry point for scimitar
//!
//! # Usage
//!
//! Run the configured sweep:
//! ```bash
//! scimitar run --config config/scimitar.toml --output data/
//! ```
//!
//! Drive the trigger lines safe:
//! ```bash
//! scimitar reset --config config/scimitar.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scimitar::config::ScanConfig;
use scimitar::data::{JsonResultWriter, ResultWriter};
use scimitar::experiment::{reset_triggers, ScanOrchestrator, ScanPlan};
use scimitar::logging::{self, LoggingConfig, OutputFormat};
use scimitar::rig::Rig;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "scimitar")]
#[command(about = "Grid-scan orchestration for optical measurement rigs", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured sweep and write the result file
    Run {
        /// Scan configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Override `[storage] output_dir`
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Connect the trigger port, drive every line safe, disconnect
    Reset {
        #[arg(long)]
        config: PathBuf,
    },

    /// Load and validate a configuration without touching hardware
    Validate {
        #[arg(long)]
        config: PathBuf,
    },

    /// Print the reference rig configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => run_scan(&config, output, cli.log_format).await,
        Commands::Reset { config } => reset(&config, cli.log_format).await,
        Commands::Validate { config } => validate(&config),
        Commands::ShowConfig => {
            print!("{}", ScanConfig::reference().to_toml()?);
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<ScanConfig> {
    let config = ScanConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn init_logging(config: &ScanConfig, format: OutputFormat) -> Result<()> {
    let logging = LoggingConfig::from_config(config)?.with_format(format);
    logging::init(logging).context("Failed to initialize logging")
}

async fn run_scan(path: &Path, output: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let mut config = load(path)?;
    if let Some(output) = output {
        config.storage.output_dir = output;
    }
    init_logging(&config, format)?;

    println!("🔬 {} - grid scan", config.application.name);
    println!("📄 Configuration: {}", path.display());

    let (rig, _handles) = Rig::simulated(&config).context("Failed to assemble rig")?;
    let plan = ScanPlan::from_config(&config)?;
    println!(
        "📌 {} grid points × {} phase(s)",
        plan.grid.len(),
        plan.routine.phases().len()
    );
    let orchestrator = ScanOrchestrator::new(rig, plan);

    let json = JsonResultWriter::new(&config.storage.output_dir, &config.storage.file_prefix);
    #[cfg_attr(not(feature = "storage_csv"), allow(unused_mut))]
    let mut writers: Vec<&dyn ResultWriter> = vec![&json];
    #[cfg(feature = "storage_csv")]
    let csv = scimitar::data::CsvSummaryWriter::new(
        &config.storage.output_dir,
        &config.storage.file_prefix,
    );
    #[cfg(feature = "storage_csv")]
    if config.storage.csv_summary {
        writers.push(&csv);
    }
    #[cfg(not(feature = "storage_csv"))]
    if config.storage.csv_summary {
        tracing::warn!("csv_summary requested but the storage_csv feature is disabled");
    }

    println!("▶️  Running...");
    match orchestrator.run_and_save(&writers).await {
        Ok((result, paths)) => {
            println!();
            println!(
                "✅ Scan complete: {} points, {} records",
                result.position_map.len(),
                result.record_count()
            );
            for path in paths {
                println!("   Saved: {}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("❌ Scan failed: {}", e);
            Err(e).context("Scan aborted; trigger lines were driven safe")
        }
    }
}

async fn reset(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load(path)?;
    init_logging(&config, format)?;

    let (rig, handles) = Rig::simulated(&config).context("Failed to assemble rig")?;
    reset_triggers(&rig.triggers, handles.port.clone())
        .await
        .context("Trigger reset failed")?;
    println!("✅ Triggers reset: {}", rig.triggers.safe_vector());
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let config = load(path)?;
    let (rig, _handles) = Rig::simulated(&config).context("Failed to assemble rig")?;
    let orchestrator = ScanOrchestrator::new(rig, ScanPlan::from_config(&config)?);
    orchestrator.validate().context("Plan does not fit the rig")?;

    let plan = orchestrator.plan();
    println!("✅ {} is valid", path.display());
    println!("   Devices: {}", orchestrator.rig().registry.len());
    println!("   Grid points: {}", plan.grid.len());
    for phase in plan.routine.phases() {
        println!(
            "   Phase '{}': arm {:?}, read {:?}{}",
            phase.label,
            phase.arm,
            phase.read,
            if phase.with_spectrum { ", with spectrum" } else { "" }
        );
    }
    Ok(())
}
