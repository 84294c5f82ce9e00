use crate::collector::CompletionPolicy;
use fanout_client::ConnectorConfig;
use fanout_core::RESULT_QUEUE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub connector: ConnectorConfig,
    pub result_queue: String,
    /// Queue silence that ends collection
    pub idle_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub completion: CompletionPolicy,
    /// Where the histogram report is written
    pub output: PathBuf,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            connector: ConnectorConfig::default(),
            result_queue: RESULT_QUEUE.to_string(),
            idle_timeout_secs: 10,
            poll_interval_ms: 1000,
            completion: CompletionPolicy::default(),
            output: PathBuf::from("./results/mass_histogram.json"),
        }
    }
}

impl AggregatorConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AggregatorConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
