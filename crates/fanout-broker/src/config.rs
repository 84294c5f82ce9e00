use fanout_persistence::QueueStoreConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub persistence: PersistenceConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// When off, durable queues and persistent messages live in memory only
    pub enabled: bool,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub prometheus_port: u16,
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            broker: NetworkConfig {
                host: "0.0.0.0".to_string(),
                port: 5672,
            },
            persistence: PersistenceConfig {
                enabled: true,
                data_dir: PathBuf::from("./broker-data"),
            },
            monitoring: MonitoringConfig {
                prometheus_port: 9091,
                log_level: "info".to_string(),
            },
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    pub fn to_store_config(&self) -> Option<QueueStoreConfig> {
        self.persistence.enabled.then(|| QueueStoreConfig {
            data_dir: self.persistence.data_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
broker:
  host: 127.0.0.1
  port: 5673
persistence:
  enabled: false
  data_dir: /var/lib/fanout
monitoring:
  prometheus_port: 9100
  log_level: debug
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_address(), "127.0.0.1:5673");
        assert!(config.to_store_config().is_none());
        assert_eq!(config.monitoring.prometheus_port, 9100);
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.broker.port, 5672);
        assert_eq!(
            config.to_store_config().unwrap().data_dir,
            PathBuf::from("./broker-data")
        );
    }
}
