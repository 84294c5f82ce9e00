pub mod collector;
pub mod finalize;
pub mod config;

pub use collector::{Collection, CollectOutcome, Collector, CompletionPolicy};
pub use finalize::{aggregate, finalize, Aggregation};
pub use config::AggregatorConfig;
