pub mod worker;
pub mod executor;
pub mod config;

pub use worker::{AckPolicy, ExitReason, Settlement, Worker, WorkerState, WorkerStats};
pub use executor::TaskExecutor;
pub use config::WorkerConfig;
