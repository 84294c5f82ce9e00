use anyhow::{bail, Context};
use async_trait::async_trait;
use fanout_client::Channel;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Answers "how many workers are consuming right now?" at dispatch time.
///
/// The answer decides how many shutdown sentinels get published, so an
/// over-count leaves stray sentinels and an under-count leaves workers waiting.
#[async_trait]
pub trait WorkerInventory: Send + Sync {
    async fn current_worker_count(
        &self,
        channel: &mut dyn Channel,
        work_queue: &str,
    ) -> anyhow::Result<u64>;
}

/// A count known up front
#[derive(Debug, Clone, Copy)]
pub struct FixedInventory(pub u64);

#[async_trait]
impl WorkerInventory for FixedInventory {
    async fn current_worker_count(
        &self,
        _channel: &mut dyn Channel,
        _work_queue: &str,
    ) -> anyhow::Result<u64> {
        Ok(self.0)
    }
}

/// Live worker leases the broker holds on the work queue
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerInventory;

#[async_trait]
impl WorkerInventory for BrokerInventory {
    async fn current_worker_count(
        &self,
        channel: &mut dyn Channel,
        work_queue: &str,
    ) -> anyhow::Result<u64> {
        let count = channel
            .worker_count(work_queue)
            .await
            .context("querying broker worker leases")?;
        Ok(count)
    }
}

/// Runs a container-listing command and counts output lines naming a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInventory {
    pub program: String,
    pub args: Vec<String>,
    /// Substring identifying worker containers
    pub name_prefix: String,
}

impl Default for CommandInventory {
    fn default() -> Self {
        CommandInventory {
            program: "docker".to_string(),
            args: vec![
                "ps".to_string(),
                "--filter".to_string(),
                "status=running".to_string(),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ],
            name_prefix: "worker".to_string(),
        }
    }
}

impl CommandInventory {
    /// Count matching names in command output
    pub fn count_matches(&self, listing: &str) -> u64 {
        listing
            .lines()
            .filter(|line| line.contains(&self.name_prefix))
            .count() as u64
    }
}

#[async_trait]
impl WorkerInventory for CommandInventory {
    async fn current_worker_count(
        &self,
        _channel: &mut dyn Channel,
        _work_queue: &str,
    ) -> anyhow::Result<u64> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .with_context(|| format!("running {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        debug!("Container listing:\n{}", listing);
        Ok(self.count_matches(&listing))
    }
}

/// Which inventory the producer binary uses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryConfig {
    Fixed { workers: u64 },
    #[default]
    Broker,
    Command(CommandInventory),
}

impl InventoryConfig {
    pub fn build(&self) -> Box<dyn WorkerInventory> {
        match self {
            InventoryConfig::Fixed { workers } => Box::new(FixedInventory(*workers)),
            InventoryConfig::Broker => Box::new(BrokerInventory),
            InventoryConfig::Command(command) => Box::new(command.clone()),
        }
    }
}
