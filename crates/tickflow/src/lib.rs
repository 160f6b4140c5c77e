//! In-process job scheduler.
//!
//! Handlers are registered by name with a concurrency cap; jobs are enqueued
//! with an optional delay, priority and attempt budget. A periodic tick picks
//! due jobs (highest priority first, then oldest), dispatches them while the
//! handler has free slots, and retries failures with exponential backoff.
//! Lifecycle transitions are published as [`JobEvent`]s.

pub mod config;
pub mod jobs;

pub use config::{DatabaseConfig, SchedulerConfig};
pub use jobs::{
    boxed, handler_fn, BoxFuture, HandlerOptions, InMemoryAdapter, Job, JobContext, JobError,
    JobEvent, JobOptions, JobStatus, PersistenceAdapter, Scheduler, SchedulerBuilder,
    SchedulerStats, StopOptions,
};

#[cfg(feature = "postgres")]
pub use jobs::PgAdapter;
