use crate::jobs::model::Job;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Mirror of the scheduler's active job set.
///
/// Calls arrive in the order the scheduler performs transitions, with no
/// locking or deduplication on top: `add` once per enqueue, `update` on every
/// reschedule, `remove` on every terminal outcome.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn add(&self, job: &Job) -> anyhow::Result<()>;

    async fn update(&self, job: &Job) -> anyhow::Result<()>;

    async fn remove(&self, job_id: Uuid) -> anyhow::Result<()>;

    async fn list(&self) -> anyhow::Result<Vec<Job>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    jobs: Mutex<Vec<Job>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryAdapter {
    async fn add(&self, job: &Job) -> anyhow::Result<()> {
        self.jobs.lock().await.push(job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(slot) = jobs.iter_mut().find(|j| j.id == job.id) {
            *slot = job.clone();
        }
        Ok(())
    }

    async fn remove(&self, job_id: Uuid) -> anyhow::Result<()> {
        self.jobs.lock().await.retain(|j| j.id != job_id);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Job>> {
        Ok(self.jobs.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobOptions;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn mirrors_add_update_remove() {
        let adapter = InMemoryAdapter::new();
        let mut job = Job::new("a", json!({"k": "v"}), &JobOptions::new(), Utc::now());

        adapter.add(&job).await.unwrap();
        assert_eq!(adapter.list().await.unwrap(), vec![job.clone()]);

        job.attempts = 1;
        adapter.update(&job).await.unwrap();
        assert_eq!(adapter.list().await.unwrap()[0].attempts, 1);

        adapter.remove(job.id).await.unwrap();
        assert!(adapter.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_job_is_ignored() {
        let adapter = InMemoryAdapter::new();
        let job = Job::new("a", json!(null), &JobOptions::new(), Utc::now());

        adapter.update(&job).await.unwrap();
        adapter.remove(job.id).await.unwrap();
        assert!(adapter.list().await.unwrap().is_empty());
    }
}
