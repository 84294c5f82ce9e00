pub mod producer;
pub mod inventory;
pub mod config;

pub use producer::{discover_tasks, DispatchReport, Producer};
pub use inventory::{BrokerInventory, CommandInventory, FixedInventory, InventoryConfig, WorkerInventory};
pub use config::ProducerConfig;
