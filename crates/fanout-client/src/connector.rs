use crate::{Connection, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Where the broker lives and how patiently to wait for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub broker_address: String,
    pub retry_delay_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            broker_address: "127.0.0.1:5672".to_string(),
            retry_delay_secs: 5,
        }
    }
}

/// Opens broker connections, waiting as long as it takes.
///
/// Containers usually start before the broker accepts connections, so
/// `connect` retries forever with a fixed delay: no backoff, no cap, and no
/// error ever reaches the caller. Only process termination interrupts it.
#[derive(Debug, Clone)]
pub struct Connector {
    broker_address: String,
    retry_delay: Duration,
}

impl Connector {
    pub fn new(broker_address: impl Into<String>, retry_delay: Duration) -> Self {
        Connector {
            broker_address: broker_address.into(),
            retry_delay,
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(
            config.broker_address.clone(),
            Duration::from_secs(config.retry_delay_secs),
        )
    }

    pub fn broker_address(&self) -> &str {
        &self.broker_address
    }

    /// Block until a connection is established
    pub async fn connect(&self) -> Connection {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            info!("Connecting to broker at {} (attempt {})", self.broker_address, attempt);

            match Connection::open(&self.broker_address).await {
                Ok(connection) => {
                    info!("Connected to broker at {}", self.broker_address);
                    return connection;
                }
                Err(e) => {
                    warn!(
                        "Broker not ready ({}). Retrying in {:?}",
                        e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Single attempt, for connectivity checks
    pub async fn try_connect(&self) -> Result<Connection> {
        Connection::open(&self.broker_address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_waits_for_broker() {
        // Reserve a port, then free it so the first attempts are refused
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let connector = Connector::new(addr.to_string(), Duration::from_millis(20));
        let handle = tokio::spawn(async move { connector.connect().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());

        let listener = TcpListener::bind(addr).await.unwrap();
        let (_socket, _) = listener.accept().await.unwrap();

        let connection = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connection.peer(), addr.to_string());
    }

    #[tokio::test]
    async fn test_try_connect_fails_fast() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let connector = Connector::new(addr.to_string(), Duration::from_secs(60));
        let err = connector.try_connect().await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[test]
    fn test_default_config() {
        let config = ConnectorConfig::default();
        assert_eq!(config.retry_delay_secs, 5);
        let connector = Connector::from_config(&config);
        assert_eq!(connector.broker_address(), "127.0.0.1:5672");
    }
}
