use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use fanout_client::{Channel, ClientError, Connector, StatsResponse};
use fanout_core::{RESULT_QUEUE, WORK_QUEUE};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fanout-admin")]
#[command(about = "Fanout broker admin CLI", long_about = None)]
struct Args {
    /// Broker address
    #[arg(short, long, default_value = "127.0.0.1:5672")]
    broker: String,

    /// Output format (json, table)
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the broker accepts connections
    Ping,

    /// Show ready, unacked and worker counts per queue
    Stats {
        /// Queues to inspect
        #[arg(short, long, default_values_t = [WORK_QUEUE.to_string(), RESULT_QUEUE.to_string()])]
        queue: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let connector = Connector::new(args.broker.clone(), Duration::from_secs(0));

    match args.command {
        Commands::Ping => {
            let result = match connector.try_connect().await {
                Ok(mut connection) => connection.ping().await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => println!("Connection successful!"),
                Err(e) => {
                    println!("Failed to connect to broker at {}: {}", args.broker, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Stats { queue } => {
            let mut connection = connector.try_connect().await?;

            let mut rows: Vec<(String, Option<StatsResponse>)> = Vec::new();
            for name in queue {
                let stats = declared(connection.queue_stats(&name).await)?;
                rows.push((name, stats));
            }

            match args.format.as_str() {
                "json" => {
                    let queues: Vec<_> = rows
                        .iter()
                        .map(|(name, stats)| match stats {
                            Some(s) => serde_json::json!({
                                "queue": name,
                                "ready": s.ready,
                                "unacked": s.unacked,
                                "workers": s.workers,
                            }),
                            None => serde_json::json!({ "queue": name, "declared": false }),
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&queues)?);
                }
                _ => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Queue", "Ready", "Unacked", "Workers"]);
                    for (name, stats) in &rows {
                        match stats {
                            Some(s) => table.add_row(vec![
                                name.clone(),
                                s.ready.to_string(),
                                s.unacked.to_string(),
                                s.workers.to_string(),
                            ]),
                            None => table.add_row(vec![
                                name.clone(),
                                "-".to_string(),
                                "-".to_string(),
                                "not declared".to_string(),
                            ]),
                        };
                    }
                    println!("{}", table);
                }
            }
        }
    }

    Ok(())
}

/// `None` for a queue the broker has never seen; any other failure is an error
fn declared(result: Result<StatsResponse, ClientError>) -> anyhow::Result<Option<StatsResponse>> {
    match result {
        Ok(stats) => Ok(Some(stats)),
        Err(e) if e.is_queue_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}
