use crate::config::SchedulerConfig;
use crate::jobs::model::Job;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::Mutex;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type HandlerFn = dyn for<'a> Fn(&'a Value, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
    + Send
    + Sync;

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_handler(name: &str) -> Self {
        Self::new("NO_HANDLER", format!("no handler registered for {name}"))
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new("PANICKED", message)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::new("HANDLER_ERROR", format!("{err:#}"))
    }
}

/// What a handler sees for one attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: Job,
    /// 1-indexed attempt number of this invocation.
    pub attempt: u32,
    retry_request: Arc<Mutex<Option<Duration>>>,
}

impl JobContext {
    pub(crate) fn new(job: Job) -> Self {
        Self {
            attempt: job.attempts,
            job,
            retry_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))
    }

    /// Ask for this job to run again after `delay`.
    ///
    /// Returns `false` and records nothing when no attempts are left. An accepted
    /// request reschedules the job even if the handler then returns `Ok`, and
    /// replaces the backoff delay if it returns `Err`. The last call wins.
    pub async fn retry(&self, delay: Duration) -> bool {
        if !self.job.has_attempts_left() {
            return false;
        }
        *self.retry_request.lock().await = Some(delay);
        true
    }

    pub(crate) async fn take_retry_request(&self) -> Option<Duration> {
        self.retry_request.lock().await.take()
    }
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub concurrency: usize,
    pub backoff_ms: u64,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("concurrency", &self.concurrency)
            .field("backoff_ms", &self.backoff_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    concurrency: Option<usize>,
    backoff_ms: Option<u64>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn backoff_ms(mut self, base_ms: u64) -> Self {
        self.backoff_ms = Some(base_ms);
        self
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the handler for `name`. Unset options fall back to `defaults`.
    pub fn register_with_options<F>(
        &mut self,
        name: &str,
        handler: F,
        opts: HandlerOptions,
        defaults: &SchedulerConfig,
    ) -> HandlerEntry
    where
        F: for<'a> Fn(&'a Value, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        let entry = HandlerEntry {
            handler: Arc::new(handler),
            concurrency: opts
                .concurrency
                .unwrap_or(defaults.default_concurrency)
                .max(1),
            backoff_ms: opts.backoff_ms.unwrap_or(defaults.default_backoff_ms),
        };
        self.handlers.insert(name.to_string(), entry.clone());
        entry
    }

    pub fn handler_for(&self, name: &str) -> Option<HandlerEntry> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Wraps a closure as a shareable handler; the bound pins down the closure's
/// higher-ranked signature.
pub fn handler_fn<F>(handler: F) -> Arc<HandlerFn>
where
    F: for<'a> Fn(&'a Value, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(handler)
}

pub fn boxed<'a, T>(fut: impl Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}
