use fanout_client::{Channel, Delivery};
use fanout_core::{BatchManifest, ResultMessage, TaskResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What ends a collection besides interruption and broker failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Stop on queue silence alone. A slow worker or a slow broker can make
    /// this stop early and under-count.
    #[default]
    IdleTimeout,
    /// Stop as soon as a batch manifest's task count has been collected;
    /// queue silence still ends the run if a worker died mid-batch.
    Manifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    IdleTimeout,
    /// Every task announced by the manifest has reported
    Complete,
    Interrupted,
    BrokerError(String),
}

/// Everything one collection gathered
#[derive(Debug, Clone)]
pub struct Collection {
    pub results: Vec<TaskResult>,
    pub manifest: Option<BatchManifest>,
    pub outcome: CollectOutcome,
    /// Messages that could not be decoded, rejected without requeue
    pub malformed: u64,
}

impl Collection {
    /// Results still owed according to the manifest, if one was seen
    pub fn missing(&self) -> Option<u64> {
        self.manifest
            .as_ref()
            .map(|m| m.total_tasks.saturating_sub(self.results.len() as u64))
    }
}

/// Drains the results queue with non-blocking fetches.
///
/// Owns the result buffer for the whole collection; nothing else can append
/// to it or read it before `collect` returns.
pub struct Collector<C: Channel> {
    channel: C,
    result_queue: String,
    idle_timeout: Duration,
    poll_interval: Duration,
    policy: CompletionPolicy,
}

impl<C: Channel> Collector<C> {
    pub fn new(channel: C, result_queue: impl Into<String>, idle_timeout: Duration) -> Self {
        Collector {
            channel,
            result_queue: result_queue.into(),
            idle_timeout,
            poll_interval: Duration::from_secs(1),
            policy: CompletionPolicy::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Collect until silence, completion, interruption or a broker error
    pub async fn collect(&mut self, cancel: CancellationToken) -> Collection {
        let mut collection = Collection {
            results: Vec::new(),
            manifest: None,
            outcome: CollectOutcome::IdleTimeout,
            malformed: 0,
        };

        if let Err(e) = self.channel.declare_queue(&self.result_queue, true).await {
            warn!("Could not declare {}: {}", self.result_queue, e);
            collection.outcome = CollectOutcome::BrokerError(e.to_string());
            return collection;
        }

        info!(
            "Aggregator ready, waiting for results on {} (idle timeout {:?})",
            self.result_queue, self.idle_timeout
        );
        let mut last_message = Instant::now();

        collection.outcome = loop {
            if cancel.is_cancelled() {
                break CollectOutcome::Interrupted;
            }

            match self.channel.get(&self.result_queue).await {
                Ok(Some(delivery)) => {
                    last_message = Instant::now();
                    if let Err(e) = self.accept(delivery, &mut collection).await {
                        warn!("Broker error while settling result: {}", e);
                        break CollectOutcome::BrokerError(e.to_string());
                    }

                    if self.is_complete(&collection) {
                        break CollectOutcome::Complete;
                    }
                }
                Ok(None) => {
                    if last_message.elapsed() > self.idle_timeout {
                        info!(
                            "No messages received for {:?}, stopping collection",
                            self.idle_timeout
                        );
                        break CollectOutcome::IdleTimeout;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = cancel.cancelled() => break CollectOutcome::Interrupted,
                    }
                }
                Err(e) => {
                    warn!("Broker error while fetching results: {}", e);
                    break CollectOutcome::BrokerError(e.to_string());
                }
            }
        };

        if collection.outcome == CollectOutcome::IdleTimeout {
            if let Some(missing) = collection.missing().filter(|&m| m > 0) {
                warn!(
                    "Stopped on silence with {} of {} announced results missing; totals may be under-counted",
                    missing,
                    collection.manifest.as_ref().map_or(0, |m| m.total_tasks)
                );
            }
        }

        info!(
            "Collection finished ({:?}) with {} results",
            collection.outcome,
            collection.results.len()
        );
        collection
    }

    async fn accept(
        &mut self,
        delivery: Delivery,
        collection: &mut Collection,
    ) -> fanout_client::Result<()> {
        match ResultMessage::from_bytes(&delivery.body) {
            Ok(ResultMessage::Result(result)) => {
                debug!("Received result for {}", result.locator());
                collection.results.push(result);
                debug!("Total results: {}", collection.results.len());
                self.channel.ack(delivery.tag).await
            }
            Ok(ResultMessage::Manifest(manifest)) => {
                if let Some(previous) = &collection.manifest {
                    if previous.batch_id != manifest.batch_id {
                        warn!(
                            "Batch {} replaces batch {} mid-collection",
                            manifest.batch_id, previous.batch_id
                        );
                    }
                }
                info!(
                    "Batch {} announced {} tasks",
                    manifest.batch_id, manifest.total_tasks
                );
                collection.manifest = Some(manifest);
                self.channel.ack(delivery.tag).await
            }
            Err(e) => {
                warn!("Discarding undecodable result message: {}", e);
                collection.malformed += 1;
                self.channel.reject(delivery.tag, false).await
            }
        }
    }

    fn is_complete(&self, collection: &Collection) -> bool {
        self.policy == CompletionPolicy::Manifest && collection.missing() == Some(0)
    }
}
