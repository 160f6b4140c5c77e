pub mod adapter;
pub mod events;
pub mod execution;
pub mod handlers;
pub mod model;
pub mod retry;
pub mod scheduler;
pub mod store;

#[cfg(feature = "postgres")]
pub mod pg_adapter;
#[cfg(feature = "postgres")]
pub use pg_adapter::PgAdapter;

pub use adapter::{InMemoryAdapter, PersistenceAdapter};
pub use events::JobEvent;
pub use handlers::{boxed, handler_fn, BoxFuture, HandlerOptions, JobContext, JobError};
pub use model::{Job, JobOptions, JobStatus};
pub use retry::{next_delay_ms, BackoffConfig};
pub use scheduler::{Scheduler, SchedulerBuilder, StopOptions};
pub use store::SchedulerStats;
