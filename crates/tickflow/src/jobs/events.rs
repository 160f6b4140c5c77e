use crate::jobs::handlers::JobError;
use crate::jobs::model::Job;
use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle notifications published by the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued(Job),
    SchedulerStarted,
    Started(Job),
    Succeeded(Job),
    /// Failed attempt with attempts left; `job.run_at` is the retry time.
    Retry { job: Job, error: JobError },
    /// The handler asked for a retry and returned normally.
    RetryScheduled(Job),
    /// Terminal failure: retries exhausted or no handler registered.
    Failed { job: Job, error: JobError },
    SchedulerStopped,
}

impl JobEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Enqueued(_) => "enqueue",
            JobEvent::SchedulerStarted => "started",
            JobEvent::Started(_) => "start",
            JobEvent::Succeeded(_) => "success",
            JobEvent::Retry { .. } => "retry",
            JobEvent::RetryScheduled(_) => "retryScheduled",
            JobEvent::Failed { .. } => "failed",
            JobEvent::SchedulerStopped => "stopped",
        }
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            JobEvent::Enqueued(job)
            | JobEvent::Started(job)
            | JobEvent::Succeeded(job)
            | JobEvent::RetryScheduled(job)
            | JobEvent::Retry { job, .. }
            | JobEvent::Failed { job, .. } => Some(job),
            JobEvent::SchedulerStarted | JobEvent::SchedulerStopped => None,
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobEvent::Retry { error, .. } | JobEvent::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: JobEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
