use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tickflow::{Job, JobEvent, PersistenceAdapter, Scheduler, SchedulerConfig};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

pub const TICK: Duration = Duration::from_millis(10);

pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval: TICK,
        drain_poll_interval: Duration::from_millis(10),
        default_backoff_ms: 1,
        ..SchedulerConfig::default()
    }
}

pub fn scheduler() -> Scheduler {
    Scheduler::builder()
        .config(fast_config())
        .rng(StdRng::seed_from_u64(7))
        .build()
}

#[allow(dead_code)]
pub fn scheduler_with_adapter(adapter: Arc<dyn PersistenceAdapter>) -> Scheduler {
    Scheduler::builder()
        .config(fast_config())
        .adapter(adapter)
        .rng(StdRng::seed_from_u64(7))
        .build()
}

/// Receives events until `done` returns true for one of them (inclusive).
/// Panics after five seconds.
pub async fn collect_until<F>(rx: &mut broadcast::Receiver<JobEvent>, mut done: F) -> Vec<JobEvent>
where
    F: FnMut(&JobEvent) -> bool,
{
    let mut seen = Vec::new();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let stop = done(&event);
                    seen.push(event);
                    if stop {
                        return true;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await;

    assert_eq!(
        finished,
        Ok(true),
        "gave up waiting; saw {:?}",
        kinds(&seen)
    );
    seen
}

pub fn kinds(events: &[JobEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

#[allow(dead_code)]
pub fn kinds_for(events: &[JobEvent], job_id: Uuid) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| e.job().map(|j| j.id) == Some(job_id))
        .map(|e| e.kind())
        .collect()
}

#[allow(dead_code)]
pub fn is_terminal_for(event: &JobEvent, job_id: Uuid) -> bool {
    matches!(event, JobEvent::Succeeded(j) if j.id == job_id)
        || matches!(event, JobEvent::Failed { job, .. } if job.id == job_id)
}

/// Adapter that rejects the operations it is told to.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FailingAdapter {
    pub fail_add: bool,
    pub fail_update: bool,
    pub fail_remove: bool,
}

#[async_trait]
impl PersistenceAdapter for FailingAdapter {
    async fn add(&self, _job: &Job) -> anyhow::Result<()> {
        if self.fail_add {
            anyhow::bail!("disk full");
        }
        Ok(())
    }

    async fn update(&self, _job: &Job) -> anyhow::Result<()> {
        if self.fail_update {
            anyhow::bail!("connection reset");
        }
        Ok(())
    }

    async fn remove(&self, _job_id: Uuid) -> anyhow::Result<()> {
        if self.fail_remove {
            anyhow::bail!("connection reset");
        }
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Job>> {
        Ok(Vec::new())
    }
}
