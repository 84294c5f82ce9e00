use crate::{config::WorkerConfig, executor::TaskExecutor};
use anyhow::Context;
use fanout_client::{Channel, Delivery};
use fanout_core::{Processor, ResultMessage, TaskResult, WorkMessage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// When a task message is acknowledged relative to its result being published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Ack once publishing was attempted, even if it failed. A task is
    /// processed at most once per delivery and never loops, but its result
    /// can be lost.
    #[default]
    AfterAttempt,
    /// Ack only once the broker confirmed the result; otherwise requeue the
    /// task for another attempt.
    AfterPublishConfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
    Publishing,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Processing => "processing",
            WorkerState::Publishing => "publishing",
            WorkerState::ShuttingDown => "shutting down",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What happened to a task message once its result was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
}

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A shutdown sentinel was consumed
    Sentinel,
    /// Nothing arrived within the configured idle window
    IdleTimeout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tasks that produced a `Success`
    pub processed: u64,
    /// Tasks that produced a `Failure`
    pub failed: u64,
    pub publish_failures: u64,
    /// Tasks handed back to the queue after an unconfirmed publish
    pub requeued: u64,
    pub malformed: u64,
    pub exit: Option<ExitReason>,
}

/// Consumes the work queue one message at a time until told to stop
pub struct Worker<C: Channel> {
    channel: C,
    executor: TaskExecutor,
    worker_id: String,
    work_queue: String,
    result_queue: String,
    ack_policy: AckPolicy,
    idle_exit: Option<Duration>,
    state: WorkerState,
}

impl<C: Channel> Worker<C> {
    pub fn new(channel: C, processor: Arc<dyn Processor>, config: &WorkerConfig) -> Self {
        Worker {
            channel,
            executor: TaskExecutor::new(processor, Duration::from_secs(config.task_timeout_secs)),
            worker_id: config.generate_worker_id(),
            work_queue: config.work_queue.clone(),
            result_queue: config.result_queue.clone(),
            ack_policy: config.ack_policy,
            idle_exit: config.idle_exit_secs.map(Duration::from_secs),
            state: WorkerState::Idle,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        debug!("Worker {}: {} -> {}", self.worker_id, self.state, next);
        self.state = next;
    }

    /// Run until a sentinel or the idle window ends it.
    ///
    /// Broker errors end the run with `Err`; whatever was unsettled at that
    /// point is requeued by the broker.
    pub async fn run(&mut self) -> anyhow::Result<WorkerStats> {
        self.channel
            .declare_queue(&self.work_queue, true)
            .await
            .with_context(|| format!("declaring {}", self.work_queue))?;
        self.channel
            .declare_queue(&self.result_queue, true)
            .await
            .with_context(|| format!("declaring {}", self.result_queue))?;
        self.channel
            .register_worker(&self.worker_id, &self.work_queue)
            .await
            .context("registering worker lease")?;

        info!("Worker {} ready, waiting for tasks on {}", self.worker_id, self.work_queue);

        let mut stats = WorkerStats::default();
        let exit = loop {
            self.transition(WorkerState::Idle);

            let delivery = match self.claim().await? {
                Some(delivery) => delivery,
                None => {
                    info!("Worker {} idle for {:?}, leaving", self.worker_id, self.idle_exit);
                    break ExitReason::IdleTimeout;
                }
            };

            match WorkMessage::from_bytes(&delivery.body) {
                Ok(WorkMessage::Shutdown(_)) => {
                    self.transition(WorkerState::ShuttingDown);
                    self.channel.ack(delivery.tag).await?;
                    info!("Worker {} received shutdown signal", self.worker_id);
                    break ExitReason::Sentinel;
                }
                Ok(WorkMessage::Task(task)) => {
                    if delivery.redelivered {
                        debug!("{} is a redelivery", task.locator);
                    }

                    self.transition(WorkerState::Processing);
                    let result = self.executor.execute(&task).await;
                    if result.is_success() {
                        stats.processed += 1;
                    } else {
                        stats.failed += 1;
                    }

                    self.transition(WorkerState::Publishing);
                    self.settle(&delivery, result, &mut stats).await?;
                }
                Err(e) => {
                    warn!("Discarding malformed work message: {}", e);
                    stats.malformed += 1;
                    self.channel.ack(delivery.tag).await?;
                }
            }
        };

        self.transition(WorkerState::Terminated);
        if let Err(e) = self.channel.deregister_worker(&self.worker_id).await {
            debug!("Lease release skipped: {}", e);
        }

        stats.exit = Some(exit);
        info!(
            "Worker {} exiting ({:?}): {} processed, {} failed",
            self.worker_id, exit, stats.processed, stats.failed
        );
        Ok(stats)
    }

    /// Wait for the next message; `None` when the idle window ran out
    async fn claim(&mut self) -> anyhow::Result<Option<Delivery>> {
        let consume = self.channel.consume(&self.work_queue);
        let delivery = match self.idle_exit {
            Some(window) => match tokio::time::timeout(window, consume).await {
                Ok(delivery) => delivery?,
                Err(_) => return Ok(None),
            },
            None => consume.await?,
        };
        Ok(Some(delivery))
    }

    /// Publish the result, then ack or requeue the task per the ack policy
    async fn settle(
        &mut self,
        delivery: &Delivery,
        result: TaskResult,
        stats: &mut WorkerStats,
    ) -> anyhow::Result<Settlement> {
        let locator = result.locator().to_string();

        let published = match ResultMessage::from(result).to_bytes() {
            Ok(body) => self
                .channel
                .publish(&self.result_queue, body, true)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        let settlement = match published {
            Ok(()) => {
                info!("Task completed for {}, result sent", locator);
                self.channel.ack(delivery.tag).await?;
                Settlement::Acked
            }
            Err(e) => {
                stats.publish_failures += 1;
                error!("Error publishing result for {}: {:#}", locator, e);

                match self.ack_policy {
                    AckPolicy::AfterAttempt => {
                        self.channel.ack(delivery.tag).await?;
                        Settlement::Acked
                    }
                    AckPolicy::AfterPublishConfirmed => {
                        stats.requeued += 1;
                        self.channel.reject(delivery.tag, true).await?;
                        Settlement::Requeued
                    }
                }
            }
        };

        match settlement {
            Settlement::Acked => debug!("Acknowledged task for {}", locator),
            Settlement::Requeued => warn!("Requeued task for {}", locator),
        }
        Ok(settlement)
    }
}
