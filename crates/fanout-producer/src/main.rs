use clap::Parser;
use fanout_client::Connector;
use fanout_producer::{discover_tasks, InventoryConfig, Producer, ProducerConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-producer")]
#[command(about = "Dispatch one task per input file to the work queue", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Directory holding the inputs
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Portion of each input to process
    #[arg(short, long)]
    fraction: Option<f64>,

    /// Send exactly this many shutdown sentinels instead of asking the inventory
    #[arg(long)]
    workers: Option<u64>,

    /// Skip the batch manifest on the results queue
    #[arg(long)]
    no_manifest: bool,
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
        ProducerConfig::from_file(config_path)?
    } else {
        ProducerConfig::default()
    };

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.connector.broker_address = broker;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(fraction) = args.fraction {
        config.fraction = fraction;
    }
    if let Some(workers) = args.workers {
        config.inventory = InventoryConfig::Fixed { workers };
    }
    if args.no_manifest {
        config.publish_manifest = false;
    }

    let tasks = discover_tasks(&config.data_dir, config.fraction)?;
    tracing::info!("Found {} inputs in {}", tasks.len(), config.data_dir.display());

    let connection = Connector::from_config(&config.connector).connect().await;
    let mut producer = Producer::new(connection, config.inventory.build())
        .with_queues(config.work_queue.clone(), config.result_queue.clone())
        .with_manifest(config.publish_manifest);

    tokio::select! {
        report = producer.dispatch(tasks) => {
            let report = report?;
            tracing::info!(
                "Dispatch complete: {} tasks, {} sentinels",
                report.tasks, report.sentinels
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted during dispatch");
        }
    }

    Ok(())
}
