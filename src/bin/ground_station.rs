/**
 * Ground Station Binary
 *
 * Connects to the vehicle, waits for its first heartbeat, then runs the
 * worker pipeline for the configured runtime.
 *
 * Usage: ground_station [--config config/ground_station.yaml] [--connection tcp:localhost:12345]
 *                       [--runtime 100] [--json-logs]
 */

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use drone_sync::config::Config;
use drone_sync::link::open_link;
use drone_sync::logging::{self, LogFormat};
use drone_sync::pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "ground_station", version, about = "Drone ground station supervisor")]
struct Cli{
    /// YAML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the link, e.g. tcp:localhost:12345 or serial:/dev/ttyACM0:57600.
    #[arg(long)]
    connection: Option<String>,

    /// Override the runtime in seconds.
    #[arg(long)]
    runtime: Option<u64>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

fn load_config(cli: &Cli) -> Result<Config>{
    let mut config = match &cli.config{
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(connection) = &cli.connection{
        config.connection = connection.clone();
    }
    if let Some(runtime) = cli.runtime{
        config.runtime_secs = runtime;
    }
    if cli.json_logs{
        config.logging.format = LogFormat::Json;
    }
    config.validate()?;
    Ok(config)
}

fn run(config: &Config) -> Result<bool>{
    let address = config.link_address()?;
    let connection = open_link(&address).with_context(|| format!("connecting to {address}"))?;

    let heartbeat = connection
        .wait_heartbeat(config.wait_heartbeat())
        .context("vehicle never announced itself")?;
    let vehicle_type = heartbeat.vehicle_type;
    info!(vehicle_type, "connected");

    let mut pipeline = Pipeline::create(config, connection)?;
    let summary = pipeline.run(config.runtime())?;

    info!(
        reports = summary.reports,
        last_report = ?summary.last_report.map(|r| r.to_string()),
        disconnected = summary.disconnected,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        "ground station finished"
    );
    Ok(summary.is_clean())
}

fn main() -> ExitCode{
    let cli = Cli::parse();

    let config = match load_config(&cli){
        Ok(config) => config,
        Err(e) => {
            eprintln!("ground_station: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging.level, config.logging.format){
        eprintln!("ground_station: logging setup failed: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&config){
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("some workers crashed or hung");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "ground station failed");
            ExitCode::FAILURE
        }
    }
}
