use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use fanout_broker::{metrics::BrokerMetrics, Broker, BrokerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fanout-broker")]
#[command(about = "Message broker for fan-out task dispatch", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "broker.yaml")]
    config: String,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Directory for durable queues
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory
    #[arg(long)]
    in_memory: bool,

    /// Prometheus metrics port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.persistence.data_dir = data_dir;
    }
    if args.in_memory {
        config.persistence.enabled = false;
    }
    if let Some(metrics_port) = args.metrics_port {
        config.monitoring.prometheus_port = metrics_port;
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    // Start metrics server
    let metrics = broker.metrics().clone();
    let metrics_port = config.monitoring.prometheus_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let server = broker.clone();
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            broker.shutdown();
        }
    }

    Ok(())
}

async fn start_metrics_server(metrics: Arc<BrokerMetrics>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(
        State(metrics): State<Arc<BrokerMetrics>>,
    ) -> Result<String, StatusCode> {
        metrics
            .render()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
