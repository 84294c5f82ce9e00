use crate::inventory::InventoryConfig;
use fanout_client::ConnectorConfig;
use fanout_core::{RESULT_QUEUE, WORK_QUEUE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub connector: ConnectorConfig,
    pub data_dir: PathBuf,
    /// Portion of each input the workers should process
    pub fraction: f64,
    pub work_queue: String,
    pub result_queue: String,
    pub publish_manifest: bool,
    pub inventory: InventoryConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            connector: ConnectorConfig::default(),
            data_dir: PathBuf::from("./data"),
            fraction: 1.0,
            work_queue: WORK_QUEUE.to_string(),
            result_queue: RESULT_QUEUE.to_string(),
            publish_manifest: true,
            inventory: InventoryConfig::default(),
        }
    }
}

impl ProducerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ProducerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
