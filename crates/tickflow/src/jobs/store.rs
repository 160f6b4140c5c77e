use crate::jobs::model::{Job, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// The scheduler's active job set plus per-handler running counts.
///
/// Jobs stay in insertion order, which is what makes equal `(priority, created_at)`
/// pairs come out FIFO from the stable sort in [`JobStore::select_ready`].
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Vec<Job>,
    running: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub active: usize,
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
    /// Running count per handler name.
    pub running: BTreeMap<String, usize>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn get(&self, job_id: Uuid) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.clone()
    }

    /// Pending jobs due at `now`, highest priority first, then oldest first.
    /// In-flight jobs are never returned, whatever their `run_at`.
    pub fn select_ready(&self, now: DateTime<Utc>) -> Vec<Job> {
        let mut ready: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.is_ready(now))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        ready
    }

    pub fn running(&self, name: &str) -> usize {
        self.running.get(name).copied().unwrap_or(0)
    }

    pub fn total_running(&self) -> usize {
        self.running.values().sum()
    }

    pub fn reset_running(&mut self, name: &str) {
        self.running.insert(name.to_string(), 0);
    }

    /// Claims a handler slot for `job_id` if the job is still pending and its
    /// handler is below `concurrency`. On success the job is marked running, its
    /// attempt counter bumped, and the updated snapshot returned.
    pub fn try_admit(
        &mut self,
        job_id: Uuid,
        concurrency: usize,
        now: DateTime<Utc>,
    ) -> Option<Job> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Pending)?;

        if !job.has_attempts_left() {
            return None;
        }

        let running = self.running.entry(job.name.clone()).or_insert(0);
        if *running >= concurrency {
            return None;
        }

        *running += 1;
        job.attempts += 1;
        job.status = JobStatus::Running;
        job.updated_at = now;
        Some(job.clone())
    }

    /// Puts a dispatched job back in line for `run_at`.
    pub fn reschedule(
        &mut self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Job> {
        let job = self.jobs.iter_mut().find(|j| j.id == job_id)?;
        job.run_at = run_at;
        job.status = JobStatus::Pending;
        job.updated_at = now;
        Some(job.clone())
    }

    pub fn remove(&mut self, job_id: Uuid) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.id == job_id)?;
        Some(self.jobs.remove(idx))
    }

    /// Frees one slot of `name`. Saturates at zero, since a re-registration
    /// resets the count while older invocations may still be finishing.
    pub fn release(&mut self, name: &str) {
        if let Some(running) = self.running.get_mut(name) {
            *running = running.saturating_sub(1);
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> SchedulerStats {
        let in_flight = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        let ready = self.jobs.iter().filter(|j| j.is_ready(now)).count();

        SchedulerStats {
            active: self.jobs.len(),
            ready,
            delayed: self.jobs.len() - ready - in_flight,
            in_flight,
            running: self
                .running
                .iter()
                .map(|(name, n)| (name.clone(), *n))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobOptions;
    use serde_json::json;
    use std::time::Duration;

    fn job(name: &str, priority: i32, created_at: DateTime<Utc>) -> Job {
        Job::new(
            name,
            json!({}),
            &JobOptions::new().priority(priority).max_attempts(3),
            created_at,
        )
    }

    #[test]
    fn select_orders_by_priority_then_created_at() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let low = job("a", 1, t0);
        let high = job("a", 5, t0);
        let older = job("a", 0, t0 - chrono::Duration::milliseconds(10));
        let newer = job("a", 0, t0);
        for j in [&newer, &low, &high, &older] {
            store.insert(j.clone());
        }

        let ids: Vec<Uuid> = store.select_ready(t0).iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high.id, low.id, older.id, newer.id]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let first = job("a", 0, t0);
        let second = job("a", 0, t0);
        store.insert(first.clone());
        store.insert(second.clone());

        let ids: Vec<Uuid> = store.select_ready(t0).iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn delayed_jobs_are_not_ready() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        store.insert(Job::new(
            "a",
            json!({}),
            &JobOptions::new().delay(Duration::from_secs(1)),
            t0,
        ));

        assert!(store.select_ready(t0).is_empty());
        assert_eq!(
            store.select_ready(t0 + chrono::Duration::milliseconds(1000)).len(),
            1
        );
    }

    #[test]
    fn admitted_jobs_leave_the_selection() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let j = job("a", 0, t0);
        store.insert(j.clone());

        let admitted = store.try_admit(j.id, 2, t0).expect("admitted");
        assert_eq!(admitted.attempts, 1);
        assert_eq!(admitted.status, JobStatus::Running);
        assert!(store.select_ready(t0).is_empty());
        assert!(store.try_admit(j.id, 2, t0).is_none(), "no double dispatch");
    }

    #[test]
    fn admission_respects_concurrency() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let jobs: Vec<Job> = (0..3).map(|_| job("a", 0, t0)).collect();
        for j in &jobs {
            store.insert(j.clone());
        }

        assert!(store.try_admit(jobs[0].id, 2, t0).is_some());
        assert!(store.try_admit(jobs[1].id, 2, t0).is_some());
        assert!(store.try_admit(jobs[2].id, 2, t0).is_none());
        assert_eq!(store.running("a"), 2);

        store.release("a");
        assert!(store.try_admit(jobs[2].id, 2, t0).is_some());
    }

    #[test]
    fn reschedule_returns_job_to_pending() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let j = job("a", 0, t0);
        store.insert(j.clone());
        store.try_admit(j.id, 1, t0);

        let later = t0 + chrono::Duration::milliseconds(500);
        let rescheduled = store.reschedule(j.id, later, t0).expect("present");
        assert_eq!(rescheduled.status, JobStatus::Pending);
        assert!(store.select_ready(t0).is_empty());
        assert_eq!(store.select_ready(later).len(), 1);
    }

    #[test]
    fn release_saturates_after_reset() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let j = job("a", 0, t0);
        store.insert(j.clone());
        store.try_admit(j.id, 1, t0);

        store.reset_running("a");
        store.release("a");
        assert_eq!(store.running("a"), 0);
        assert_eq!(store.total_running(), 0);
    }

    #[test]
    fn stats_partition_the_active_set() {
        let t0 = Utc::now();
        let mut store = JobStore::new();
        let running = job("a", 0, t0);
        store.insert(running.clone());
        store.insert(job("b", 0, t0));
        store.insert(Job::new(
            "c",
            json!({}),
            &JobOptions::new().delay(Duration::from_secs(60)),
            t0,
        ));
        store.try_admit(running.id, 1, t0);

        let stats = store.stats(t0);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.running.get("a"), Some(&1));
    }
}
