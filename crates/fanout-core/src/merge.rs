use crate::Task;
use serde::de::DeserializeOwned;

/// Associative, commutative combination of partial results.
///
/// Results reach the aggregator in arbitrary order, so `a.combine(b)` must
/// equal `b.combine(a)` and `empty()` must be the identity.
pub trait Combine: Sized {
    fn empty() -> Self;

    fn combine(self, other: Self) -> Self;
}

/// Fold any number of partial results into one
pub fn merge_all<T: Combine>(parts: impl IntoIterator<Item = T>) -> T {
    parts.into_iter().fold(T::empty(), Combine::combine)
}

/// Per-item analysis run by workers.
///
/// Must be a pure function of the task: a redelivered task is processed again
/// and the second result has to be interchangeable with the first.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, task: &Task) -> Result<Vec<u8>, String>;
}

/// What the aggregator saw besides the merged payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizeReport {
    pub successes: usize,
    /// `(locator, reason)` for every failed task
    pub failures: Vec<(String, String)>,
    /// Locators whose success payload could not be decoded
    pub undecodable: Vec<String>,
}

impl FinalizeReport {
    pub fn total(&self) -> usize {
        self.successes + self.failures.len() + self.undecodable.len()
    }
}

/// Terminal, side-effecting consumer of the merged result set
pub trait Finalizer {
    type Payload: Combine + DeserializeOwned;
    type Error: std::error::Error + Send + Sync + 'static;

    fn finalize(&mut self, merged: Self::Payload, report: &FinalizeReport) -> Result<(), Self::Error>;
}
