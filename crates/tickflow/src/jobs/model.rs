use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub priority: i32,

    /// Overrides the handler's backoff base for this job only.
    pub backoff_ms: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(name: &str, payload: Value, opts: &JobOptions, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: opts.max_attempts.max(1),
            run_at: after(now, opts.delay),
            priority: opts.priority,
            backoff_ms: opts.backoff_ms,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at` or for a free handler slot.
    Pending,
    /// Dispatched; a handler invocation is in flight.
    Running,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub delay: Duration,
    pub max_attempts: u32,
    pub priority: i32,
    pub backoff_ms: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: 1,
            priority: 0,
            backoff_ms: None,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn backoff_ms(mut self, base_ms: u64) -> Self {
        self.backoff_ms = Some(base_ms);
        self
    }
}

/// `now + d` at millisecond precision, saturating at the latest representable instant.
pub(crate) fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    let ms = i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 1_000);
    chrono::Duration::try_milliseconds(ms)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
