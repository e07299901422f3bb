pub mod scheduler;
pub mod store;

pub use scheduler::{SchedulerConfig, SchedulerError, TaskScheduler};
pub use store::{InMemoryTaskStore, StoreError, TaskStore};
