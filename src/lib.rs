//! tasknode: resource-aware task scheduler for a compute worker node.

pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod source;
pub mod stdio;
pub mod task;
pub mod telemetry;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use scheduler::{Scheduler, SchedulerStatus};
pub use task::{StatusReason, Task, TaskRecord, TaskStatus};
