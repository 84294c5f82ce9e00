mod task;
mod result;
mod merge;
mod error;

pub use task::{Task, ShutdownSentinel, WorkMessage};
pub use result::{TaskResult, BatchManifest, ResultMessage};
pub use merge::{Combine, Processor, Finalizer, FinalizeReport, merge_all};
pub use error::{CoreError, Result};

/// Default name of the durable queue carrying tasks and shutdown sentinels
pub const WORK_QUEUE: &str = "data_processing";

/// Default name of the durable queue carrying results back to the aggregator
pub const RESULT_QUEUE: &str = "result_queue";

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
