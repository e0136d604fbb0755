//! CLI entry point for envlog.
//!
//! ```bash
//! # Run the logger with stdin/stdout as the control channel
//! envlog run --config config/envlog.toml
//!
//! # Print the resolved configuration
//! envlog check-config --config config/envlog.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use envlog::config::{LoggerConfig, DEFAULT_CONFIG_PATH};
use envlog::hardware::mock::SimulatedEnvironment;
use envlog::hardware::EnvironmentSensor;
use envlog::storage::fs::FsStorage;
use envlog::{report, tracing_setup, Pipeline};
use tokio::io::BufReader;
use tracing::{info, warn};

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Time allowed for the final flush and unmount.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the transport to drain queued output.
const TRANSPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "envlog")]
#[command(about = "Environmental telemetry logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the logger; commands are read from stdin, responses go to stdout
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override application.log_level
        #[arg(long)]
        log_level: Option<String>,

        /// Override application.log_format (pretty, compact, json)
        #[arg(long)]
        log_format: Option<String>,

        /// Override storage.mount_point
        #[arg(long)]
        mount_point: Option<PathBuf>,

        /// Seed the simulated sensors for reproducible readings
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Load, validate and print the resolved configuration
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Json,
    Toml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_level,
            log_format,
            mount_point,
            seed,
        } => {
            let mut config = LoggerConfig::load_from(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(level) = log_level {
                config.application.log_level = level;
            }
            if let Some(format) = log_format {
                config.application.log_format = format;
            }
            if let Some(mount_point) = mount_point {
                config.storage.mount_point = mount_point;
            }
            config.validate()?;
            run(config, seed).await
        }
        Commands::CheckConfig { config, format } => check_config(config, format),
    }
}

async fn run(config: LoggerConfig, seed: Option<u64>) -> Result<()> {
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(name = %config.application.name, "Starting logger");

    let (reporter, output) = report::channel(config.control.logging_enabled);
    let transport = tokio::spawn(report::dispatch(output, tokio::io::stdout()));

    let pipeline = Pipeline::new(&config, reporter)?;
    let sensor: Arc<dyn EnvironmentSensor> = Arc::new(match seed {
        Some(seed) => SimulatedEnvironment::with_seed(seed),
        None => SimulatedEnvironment::new(),
    });
    let device = Arc::new(FsStorage::new(
        config.storage.mount_point.clone(),
        config.storage.file_name.clone(),
    ));
    let handles = pipeline.spawn(sensor, device);

    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(err) => {
                warn!(error = %err, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };
    let input = pipeline
        .serve(
            handles,
            BufReader::new(tokio::io::stdin()),
            interrupt,
            SHUTDOWN_TIMEOUT,
        )
        .await;
    drop(pipeline);

    match tokio::time::timeout(TRANSPORT_DRAIN_TIMEOUT, transport).await {
        Ok(joined) => joined?.context("writing to stdout")?,
        Err(_) => warn!("Output transport did not drain before exit"),
    }
    input.context("reading control input")
}

fn check_config(path: PathBuf, format: ConfigFormat) -> Result<()> {
    let config = LoggerConfig::load_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;

    let rendered = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
    };
    println!("{rendered}");
    Ok(())
}
