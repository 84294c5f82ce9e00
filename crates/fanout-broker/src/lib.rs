pub mod broker;
pub mod queue;
pub mod queue_set;
pub mod worker_registry;
pub mod local;
pub mod config;
pub mod metrics;
mod error;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use local::LocalChannel;
pub use queue_set::{QueueSet, SessionId};
