use crate::worker::AckPolicy;
use fanout_client::ConnectorConfig;
use fanout_core::{RESULT_QUEUE, WORK_QUEUE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub connector: ConnectorConfig,
    pub worker_id: Option<String>,
    pub work_queue: String,
    pub result_queue: String,
    pub ack_policy: AckPolicy,
    /// Leave after this long without a message; wait forever when unset
    pub idle_exit_secs: Option<u64>,
    pub task_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            connector: ConnectorConfig::default(),
            worker_id: None,
            work_queue: WORK_QUEUE.to_string(),
            result_queue: RESULT_QUEUE.to_string(),
            ack_policy: AckPolicy::default(),
            idle_exit_secs: None,
            task_timeout_secs: 3600,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &random[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_worker_id_wins() {
        let config = WorkerConfig {
            worker_id: Some("worker-1".to_string()),
            ..WorkerConfig::default()
        };
        assert_eq!(config.generate_worker_id(), "worker-1");
    }

    #[test]
    fn test_generated_ids_differ() {
        let config = WorkerConfig::default();
        assert_ne!(config.generate_worker_id(), config.generate_worker_id());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
connector:
  broker_address: rabbitmq:5672
  retry_delay_secs: 5
worker_id: null
work_queue: data_processing
result_queue: result_queue
ack_policy: after_publish_confirmed
idle_exit_secs: 600
task_timeout_secs: 120
"#;
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ack_policy, AckPolicy::AfterPublishConfirmed);
        assert_eq!(config.idle_exit_secs, Some(600));
    }
}
