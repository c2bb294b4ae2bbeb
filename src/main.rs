//! host-metrics: periodic host and process resource reports as JSON lines.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use thiserror::Error;

use host_metrics::config::{AgentConfig, ConfigError};
use host_metrics::metrics::{
    timestamp, CollectionFailed, HostMetrics, JsonLinesSink, MetricsSampler, ProcessMetrics,
    ProviderError, ReportSink, SamplerError, SystemProvider,
};

#[derive(Parser)]
#[command(name = "host-metrics")]
#[command(about = "Host and process resource metrics, flattened into namespaced JSON reports")]
#[command(version)]
struct Cli {
    /// Config file (JSON). Defaults to $HOST_METRICS_CONFIG, then the per-user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the sampling interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the host on every interval until interrupted
    Run,
    /// Collect one host report and print it
    Report,
    /// Print the current aggregate CPU usage
    Cpu,
    /// Print the current UTC time, ISO-8601
    Timestamp,
    /// Print a platform description
    Platform,
    /// Read JSON events from stdin, one event or array of events per line, and report on each
    Process,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Collection(#[from] CollectionFailed),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("failed to read events: {0}")]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::discover()?,
    };
    if let Some(interval_ms) = cli.interval_ms {
        config.interval_ms = interval_ms;
        config.validate()?;
    }

    match cli.command {
        Commands::Run => sample_until_interrupted(&config).await,
        Commands::Report => {
            let mut engine = HostMetrics::from_config(SystemProvider::new(), &config);
            let report = engine.report()?;
            stdout_sink().notify(vec![report]);
            Ok(())
        }
        Commands::Cpu => {
            let mut engine = HostMetrics::from_config(SystemProvider::new(), &config);
            // first reading has no baseline
            engine.cpu()?;
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            println!("{:.1}", engine.cpu()?);
            Ok(())
        }
        Commands::Timestamp => {
            println!("{}", timestamp());
            Ok(())
        }
        Commands::Platform => {
            let mut engine = HostMetrics::from_config(SystemProvider::new(), &config);
            stdout_sink().notify(vec![engine.platform()?]);
            Ok(())
        }
        Commands::Process => process_stdin(&config),
    }
}

async fn sample_until_interrupted(config: &AgentConfig) -> Result<(), CliError> {
    let engine = HostMetrics::from_config(SystemProvider::new(), config);
    let mut sampler = MetricsSampler::new(engine, Arc::new(stdout_sink()));
    sampler.start(config.interval())?;
    info!("Sampling every {:?}; press Ctrl-C to stop", config.interval());

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", err);
    }
    sampler.stop();
    info!("Stopped");
    Ok(())
}

fn process_stdin(config: &AgentConfig) -> Result<(), CliError> {
    let engine = ProcessMetrics::from_config(SystemProvider::new(), &config.process);
    let delivered = engine.process_lines(io::stdin().lock(), &stdout_sink())?;
    debug!("Reported on {} processes", delivered);
    Ok(())
}

fn stdout_sink() -> JsonLinesSink<io::Stdout> {
    JsonLinesSink::new(io::stdout())
}
