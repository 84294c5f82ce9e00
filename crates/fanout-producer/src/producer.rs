use crate::inventory::WorkerInventory;
use anyhow::Context;
use fanout_client::Channel;
use fanout_core::{BatchManifest, ResultMessage, Task, WorkMessage, RESULT_QUEUE, WORK_QUEUE};
use std::path::Path;
use tracing::{debug, info, warn};

/// What one dispatch put on the queues
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub tasks: usize,
    pub sentinels: u64,
    pub manifest: Option<BatchManifest>,
}

/// Every regular, non-hidden file in `dir`, sorted by name, as one task each
pub fn discover_tasks(dir: &Path, fraction: f64) -> anyhow::Result<Vec<Task>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type()?.is_file() {
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();

    let tasks = paths
        .into_iter()
        .map(|path| Task::new(path.to_string_lossy(), fraction))
        .collect::<fanout_core::Result<Vec<_>>>()?;
    Ok(tasks)
}

/// Publishes one batch of tasks followed by one shutdown sentinel per worker
pub struct Producer<C: Channel> {
    channel: C,
    inventory: Box<dyn WorkerInventory>,
    work_queue: String,
    result_queue: String,
    publish_manifest: bool,
}

impl<C: Channel> Producer<C> {
    pub fn new(channel: C, inventory: Box<dyn WorkerInventory>) -> Self {
        Producer {
            channel,
            inventory,
            work_queue: WORK_QUEUE.to_string(),
            result_queue: RESULT_QUEUE.to_string(),
            publish_manifest: true,
        }
    }

    pub fn with_queues(mut self, work_queue: impl Into<String>, result_queue: impl Into<String>) -> Self {
        self.work_queue = work_queue.into();
        self.result_queue = result_queue.into();
        self
    }

    /// Announce the batch size on the results queue before dispatching
    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.publish_manifest = enabled;
        self
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Publish every task in order, then the sentinels.
    ///
    /// The worker count is taken after the last task is on the queue, so
    /// sentinels always sit behind every task of the batch.
    pub async fn dispatch(&mut self, tasks: Vec<Task>) -> anyhow::Result<DispatchReport> {
        self.channel
            .declare_queue(&self.work_queue, true)
            .await
            .with_context(|| format!("declaring {}", self.work_queue))?;

        let manifest = if self.publish_manifest {
            let manifest = BatchManifest::new(tasks.len() as u64);
            self.channel
                .declare_queue(&self.result_queue, true)
                .await
                .with_context(|| format!("declaring {}", self.result_queue))?;
            self.channel
                .publish(
                    &self.result_queue,
                    ResultMessage::Manifest(manifest.clone()).to_bytes()?,
                    true,
                )
                .await
                .context("publishing batch manifest")?;
            info!(
                "Announced batch {} with {} tasks",
                manifest.batch_id, manifest.total_tasks
            );
            Some(manifest)
        } else {
            None
        };

        let task_count = tasks.len();
        for task in tasks {
            let body = WorkMessage::from(task.clone()).to_bytes()?;
            self.channel
                .publish(&self.work_queue, body, true)
                .await
                .with_context(|| format!("publishing task {}", task.locator))?;
            debug!("Task sent: {:?}", task);
        }

        let sentinels = self.current_worker_count().await;
        let sentinel = WorkMessage::shutdown().to_bytes()?;
        for _ in 0..sentinels {
            self.channel
                .publish(&self.work_queue, sentinel.clone(), true)
                .await
                .context("publishing shutdown sentinel")?;
        }

        info!(
            "Dispatched {} tasks and {} shutdown sentinels to {}",
            task_count, sentinels, self.work_queue
        );

        Ok(DispatchReport {
            tasks: task_count,
            sentinels,
            manifest,
        })
    }

    /// Worker count at this instant; an inventory failure counts as zero
    pub async fn current_worker_count(&mut self) -> u64 {
        match self
            .inventory
            .current_worker_count(&mut self.channel, &self.work_queue)
            .await
        {
            Ok(count) => {
                info!("Detected {} running workers", count);
                count
            }
            Err(e) => {
                warn!("Error counting workers, sending no shutdown sentinels: {:#}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{BrokerInventory, FixedInventory};
    use async_trait::async_trait;
    use fanout_broker::{metrics::BrokerMetrics, LocalChannel, QueueSet};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct BrokenInventory;

    #[async_trait]
    impl WorkerInventory for BrokenInventory {
        async fn current_worker_count(
            &self,
            _channel: &mut dyn Channel,
            _work_queue: &str,
        ) -> anyhow::Result<u64> {
            anyhow::bail!("docker daemon not reachable")
        }
    }

    fn queues() -> Arc<QueueSet> {
        Arc::new(QueueSet::in_memory(Arc::new(BrokerMetrics::new().unwrap())))
    }

    async fn drain(queues: &Arc<QueueSet>, queue: &str) -> Vec<WorkMessage> {
        let mut channel = LocalChannel::open(queues.clone());
        let mut messages = Vec::new();
        while let Some(delivery) = channel.get(queue).await.unwrap() {
            messages.push(WorkMessage::from_bytes(&delivery.body).unwrap());
            channel.ack(delivery.tag).await.unwrap();
        }
        messages
    }

    #[tokio::test]
    async fn test_tasks_then_one_sentinel_per_worker() {
        let queues = queues();
        let mut producer = Producer::new(
            LocalChannel::open(queues.clone()),
            Box::new(FixedInventory(2)),
        )
        .with_manifest(false);

        let tasks = vec![Task::whole("a.dat").unwrap(), Task::whole("b.dat").unwrap()];
        let report = producer.dispatch(tasks).await.unwrap();
        assert_eq!(report.tasks, 2);
        assert_eq!(report.sentinels, 2);
        assert!(report.manifest.is_none());

        let messages = drain(&queues, WORK_QUEUE).await;
        assert_eq!(messages.len(), 4);
        assert!(matches!(&messages[0], WorkMessage::Task(t) if t.locator == "a.dat"));
        assert!(matches!(&messages[1], WorkMessage::Task(t) if t.locator == "b.dat"));
        assert!(messages[2].is_shutdown());
        assert!(messages[3].is_shutdown());
    }

    #[tokio::test]
    async fn test_zero_workers_sends_no_sentinels() {
        let queues = queues();
        let mut producer = Producer::new(
            LocalChannel::open(queues.clone()),
            Box::new(FixedInventory(0)),
        );

        let report = producer
            .dispatch(vec![Task::whole("a.dat").unwrap()])
            .await
            .unwrap();
        assert_eq!(report.sentinels, 0);

        let messages = drain(&queues, WORK_QUEUE).await;
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_shutdown());
    }

    #[tokio::test]
    async fn test_inventory_failure_counts_as_zero() {
        let queues = queues();
        let mut producer = Producer::new(
            LocalChannel::open(queues.clone()),
            Box::new(BrokenInventory),
        );

        let report = producer
            .dispatch(vec![Task::whole("a.dat").unwrap()])
            .await
            .unwrap();
        assert_eq!(report.tasks, 1);
        assert_eq!(report.sentinels, 0);
    }

    #[tokio::test]
    async fn test_broker_inventory_counts_leases() {
        let queues = queues();
        queues.declare(WORK_QUEUE, true).unwrap();

        let mut worker_a = LocalChannel::open(queues.clone());
        let mut worker_b = LocalChannel::open(queues.clone());
        worker_a.register_worker("worker-a", WORK_QUEUE).await.unwrap();
        worker_b.register_worker("worker-b", WORK_QUEUE).await.unwrap();
        drop(worker_b);

        let mut producer = Producer::new(LocalChannel::open(queues.clone()), Box::new(BrokerInventory));
        let report = producer.dispatch(Vec::new()).await.unwrap();
        assert_eq!(report.sentinels, 1);
    }

    #[tokio::test]
    async fn test_manifest_precedes_results() {
        let queues = queues();
        let mut producer = Producer::new(
            LocalChannel::open(queues.clone()),
            Box::new(FixedInventory(1)),
        );

        let tasks = vec![
            Task::whole("a.dat").unwrap(),
            Task::whole("b.dat").unwrap(),
            Task::whole("c.dat").unwrap(),
        ];
        let report = producer.dispatch(tasks).await.unwrap();
        let manifest = report.manifest.unwrap();
        assert_eq!(manifest.total_tasks, 3);

        let mut channel = LocalChannel::open(queues.clone());
        let delivery = channel.get(RESULT_QUEUE).await.unwrap().unwrap();
        match ResultMessage::from_bytes(&delivery.body).unwrap() {
            ResultMessage::Manifest(m) => assert_eq!(m.batch_id, manifest.batch_id),
            other => panic!("Expected manifest, got {:?}", other),
        }
    }

    #[test]
    fn test_discover_tasks_skips_hidden_and_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.dat"), b"").unwrap();
        std::fs::write(dir.path().join("a.dat"), b"").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let tasks = discover_tasks(dir.path(), 0.5).unwrap();
        let names: Vec<String> = tasks
            .iter()
            .map(|t| {
                Path::new(&t.locator)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, vec!["a.dat", "b.dat"]);
        assert!(tasks.iter().all(|t| t.fraction == 0.5));
    }

    #[test]
    fn test_discover_tasks_rejects_bad_fraction() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.dat"), b"").unwrap();
        assert!(discover_tasks(dir.path(), 1.5).is_err());
    }
}
