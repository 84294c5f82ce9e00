use clap::Parser;
use fanout_aggregator::{aggregate, AggregatorConfig, Collector, CompletionPolicy};
use fanout_analysis::HistogramReport;
use fanout_client::Connector;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-aggregator")]
#[command(about = "Collect results until the queue goes quiet, then merge and report", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Seconds of queue silence that end collection
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Stop as soon as the batch manifest's task count is reached
    #[arg(long)]
    use_manifest: bool,

    /// Report output path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        AggregatorConfig::from_file(config_path)?
    } else {
        AggregatorConfig::default()
    };

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.connector.broker_address = broker;
    }
    if let Some(idle_timeout_secs) = args.idle_timeout_secs {
        config.idle_timeout_secs = idle_timeout_secs;
    }
    if args.use_manifest {
        config.completion = CompletionPolicy::Manifest;
    }
    if let Some(output) = args.output {
        config.output = output;
    }

    let connection = Connector::from_config(&config.connector).connect().await;
    let mut collector = Collector::new(connection, config.result_queue.clone(), config.idle_timeout())
        .with_poll_interval(config.poll_interval())
        .with_policy(config.completion);
    let mut report = HistogramReport::new(config.output.clone());

    // Interruption stops collection; what was gathered is still finalized
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping collection manually");
            interrupt.cancel();
        }
    });

    let aggregation = aggregate(&mut collector, &mut report, cancel).await?;
    tracing::info!(
        "Aggregator shut down ({:?}), report at {}",
        aggregation.collection.outcome,
        report.output().display()
    );

    Ok(())
}
