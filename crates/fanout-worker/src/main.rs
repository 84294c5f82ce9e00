use clap::Parser;
use fanout_analysis::DiphotonProcessor;
use fanout_client::Connector;
use fanout_worker::{AckPolicy, Worker, WorkerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-worker")]
#[command(about = "Process tasks from the work queue until a shutdown sentinel arrives", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Leave after this many seconds without a message
    #[arg(long)]
    idle_exit_secs: Option<u64>,

    /// Ack tasks only after the broker confirmed their result
    #[arg(long)]
    confirm_publish: bool,
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
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.connector.broker_address = broker;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }
    if let Some(idle_exit_secs) = args.idle_exit_secs {
        config.idle_exit_secs = Some(idle_exit_secs);
    }
    if args.confirm_publish {
        config.ack_policy = AckPolicy::AfterPublishConfirmed;
    }

    let connection = Connector::from_config(&config.connector).connect().await;
    let mut worker = Worker::new(connection, Arc::new(DiphotonProcessor), &config);

    // Interruption drops the connection; the broker requeues the in-flight task
    tokio::select! {
        stats = worker.run() => {
            let stats = stats?;
            tracing::info!("Worker finished: {:?}", stats);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    Ok(())
}
