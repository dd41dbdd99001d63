//! clickstream-sink: consume clickstream events from Kafka into Parquet on S3.
//!
//! `consume` (the default) runs the sink pipeline; `produce` publishes
//! synthetic events for local testing.

use clap::{Args, Parser, Subcommand};
use snafu::prelude::*;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use clickstream_sink::config::{Config, SourceConfig};
use clickstream_sink::error::{
    AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError, SourceSnafu,
};
use clickstream_sink::logging::{LogFormat, init_tracing};
use clickstream_sink::pipeline::{run_pipeline, shutdown_signal};
use clickstream_sink::{generator, metrics};

/// Clickstream events from Kafka to time-partitioned Parquet.
#[derive(Parser, Debug)]
#[command(name = "clickstream-sink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file. Without it, configuration is read
    /// from the environment.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Dry run - validate configuration without connecting.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume events and write Parquet batches (default).
    Consume,
    /// Publish synthetic clickstream events.
    Produce(ProduceArgs),
}

#[derive(Args, Debug)]
struct ProduceArgs {
    /// Events per second.
    #[arg(long, default_value_t = generator::DEFAULT_RATE)]
    rate: f64,

    /// Stop after this many events.
    #[arg(long)]
    count: Option<u64>,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_format);

    match &cli.command {
        None | Some(Command::Consume) => consume(build_config(&cli)?, cli.dry_run).await,
        Some(Command::Produce(args)) => {
            produce(build_source_config(&cli)?, args, cli.dry_run).await
        }
    }
}

/// Build configuration from the file if given, else from the environment.
fn build_config(cli: &Cli) -> Result<Config, PipelineError> {
    match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context(ConfigSnafu)
}

/// The producer needs only the stream settings.
fn build_source_config(cli: &Cli) -> Result<SourceConfig, PipelineError> {
    match &cli.config {
        Some(path) => Config::from_file(path).map(|config| config.source),
        None => SourceConfig::from_env(),
    }
    .context(ConfigSnafu)
}

async fn consume(config: Config, dry_run: bool) -> Result<(), PipelineError> {
    info!("clickstream-sink starting");

    if dry_run {
        info!("Dry run mode - validating configuration");
        info!("Brokers: {}", config.source.brokers);
        info!("Topic: {} (group {})", config.source.topic, config.source.group_id);
        info!("Bucket: {}", config.sink.bucket);
        info!("Namespace: {}", config.sink.namespace);
        info!("Batch size: {}", config.batch.size);
        info!("Configuration is valid");
        return Ok(());
    }

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).await.context(MetricsSnafu)?;
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline stopped");
    info!("  Messages consumed: {}", stats.messages_consumed);
    info!("  Events accepted: {}", stats.events_accepted);
    info!("  Events rejected: {}", stats.events_rejected);
    info!("  Artifacts uploaded: {}", stats.artifacts_uploaded);
    info!("  Bytes uploaded: {}", stats.bytes_uploaded);
    info!("  Batches committed: {}", stats.batches_committed);
    info!("  Events discarded: {}", stats.events_discarded);

    Ok(())
}

async fn produce(
    source: SourceConfig,
    args: &ProduceArgs,
    dry_run: bool,
) -> Result<(), PipelineError> {
    if dry_run {
        info!(
            topic = %source.topic,
            rate = args.rate,
            "Dry run mode - configuration is valid"
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    generator::run_producer(&source, args.rate, args.count, shutdown)
        .await
        .context(SourceSnafu)?;
    Ok(())
}
