use crate::collector::{Collection, Collector};
use fanout_client::Channel;
use fanout_core::{merge_all, FinalizeReport, Finalizer, TaskResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Merge every decodable success payload and hand it to the finalizer.
///
/// Failures and undecodable payloads end up in the report; an empty result
/// set still reaches the finalizer with an empty merge.
pub fn finalize<F: Finalizer>(
    results: &[TaskResult],
    finalizer: &mut F,
) -> Result<FinalizeReport, F::Error> {
    let mut report = FinalizeReport::default();
    let mut payloads = Vec::with_capacity(results.len());

    for result in results {
        match result {
            TaskResult::Success { locator, payload } => {
                match bincode::deserialize::<F::Payload>(payload) {
                    Ok(decoded) => {
                        report.successes += 1;
                        payloads.push(decoded);
                    }
                    Err(e) => {
                        warn!("Could not decode result for {}: {}", locator, e);
                        report.undecodable.push(locator.clone());
                    }
                }
            }
            TaskResult::Failure { locator, reason } => {
                report.failures.push((locator.clone(), reason.clone()));
            }
        }
    }

    let merged = merge_all(payloads);
    finalizer.finalize(merged, &report)?;
    Ok(report)
}

/// One aggregator run: the collection and what finalizing it reported
#[derive(Debug)]
pub struct Aggregation {
    pub collection: Collection,
    pub report: FinalizeReport,
}

/// Collect, then finalize exactly once whatever the collection ended with
pub async fn aggregate<C, F>(
    collector: &mut Collector<C>,
    finalizer: &mut F,
    cancel: CancellationToken,
) -> anyhow::Result<Aggregation>
where
    C: Channel,
    F: Finalizer,
{
    let collection = collector.collect(cancel).await;

    let report = finalize(&collection.results, finalizer)?;
    info!(
        "Finalized {} results: {} merged, {} failed, {} undecodable",
        report.total(),
        report.successes,
        report.failures.len(),
        report.undecodable.len()
    );

    Ok(Aggregation { collection, report })
}
