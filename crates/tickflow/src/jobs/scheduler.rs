use crate::config::SchedulerConfig;
use crate::jobs::{
    adapter::{InMemoryAdapter, PersistenceAdapter},
    events::{EventBus, JobEvent},
    execution::{run_attempt, AttemptOutcome},
    handlers::{BoxFuture, HandlerEntry, HandlerOptions, HandlerRegistry, JobContext, JobError},
    model::{after, Job, JobOptions},
    retry::{next_delay_ms, BackoffConfig},
    store::{JobStore, SchedulerStats},
};
use anyhow::Context;
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Return without waiting for in-flight jobs.
    pub force: bool,
}

impl StopOptions {
    pub fn graceful() -> Self {
        Self { force: false }
    }

    pub fn force() -> Self {
        Self { force: true }
    }
}

/// In-process job scheduler.
///
/// Cheap to clone; all clones drive the same job set. The tick loop, once
/// started, selects due jobs every interval and hands each one to its handler
/// when the handler has a free concurrency slot. Handler invocations run on
/// their own tasks, so a tick never waits for a job to finish.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    store: Mutex<JobStore>,
    registry: RwLock<HandlerRegistry>,
    adapter: Arc<dyn PersistenceAdapter>,
    rng: Mutex<StdRng>,
    events: EventBus,
    tick_loop: Mutex<Option<TickLoop>>,
}

struct TickLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    adapter: Option<Arc<dyn PersistenceAdapter>>,
    rng: Option<StdRng>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Jitter source for retry backoff. Seed it to make delays reproducible.
    pub fn rng(mut self, rng: StdRng) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn build(self) -> Scheduler {
        let events = EventBus::new(self.config.event_capacity);
        Scheduler {
            inner: Arc::new(Inner {
                store: Mutex::new(JobStore::new()),
                registry: RwLock::new(HandlerRegistry::new()),
                adapter: self
                    .adapter
                    .unwrap_or_else(|| Arc::new(InMemoryAdapter::new())),
                rng: Mutex::new(self.rng.unwrap_or_else(StdRng::from_entropy)),
                events,
                tick_loop: Mutex::new(None),
                config: self.config,
            }),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder {
            config: SchedulerConfig::default(),
            adapter: None,
            rng: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn adapter(&self) -> Arc<dyn PersistenceAdapter> {
        Arc::clone(&self.inner.adapter)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    // ----------------------------
    // Registration / enqueue
    // ----------------------------

    /// Registers `handler` for jobs named `name`, replacing any previous
    /// registration and resetting that name's running count.
    pub async fn register<F>(&self, name: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(&'a Value, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        let entry = self.inner.registry.write().await.register_with_options(
            name,
            handler,
            opts,
            &self.inner.config,
        );
        self.inner.store.lock().await.reset_running(name);

        tracing::info!(
            "registered handler name={} concurrency={} backoff_ms={}",
            name,
            entry.concurrency,
            entry.backoff_ms
        );
    }

    pub async fn registered_handlers(&self) -> Vec<String> {
        self.inner.registry.read().await.names()
    }

    /// Creates a job and mirrors it to the adapter. Fails only if the payload
    /// cannot be serialized or the adapter rejects the job; in both cases the
    /// job is not tracked.
    pub async fn enqueue<T: Serialize>(
        &self,
        name: &str,
        payload: T,
        opts: JobOptions,
    ) -> anyhow::Result<Job> {
        let payload = serde_json::to_value(payload)
            .with_context(|| format!("payload for {name} is not serializable"))?;
        let job = Job::new(name, payload, &opts, Utc::now());

        self.inner
            .adapter
            .add(&job)
            .await
            .with_context(|| format!("failed to persist job {}", job.id))?;
        self.inner.store.lock().await.insert(job.clone());

        tracing::debug!(
            "enqueued job id={} name={} priority={} run_at={} max_attempts={}",
            job.id,
            job.name,
            job.priority,
            job.run_at,
            job.max_attempts
        );
        self.inner.events.emit(JobEvent::Enqueued(job.clone()));

        Ok(job)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.inner.store.lock().await.snapshot()
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<Job> {
        self.inner.store.lock().await.get(job_id).cloned()
    }

    /// Jobs the next tick would consider, in selection order.
    pub async fn select_ready_jobs(&self) -> Vec<Job> {
        self.inner.store.lock().await.select_ready(Utc::now())
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.inner.store.lock().await.stats(Utc::now())
    }

    // ----------------------------
    // Tick loop
    // ----------------------------

    pub async fn is_running(&self) -> bool {
        self.inner.tick_loop.lock().await.is_some()
    }

    /// Starts ticking at the configured poll interval.
    pub async fn start(&self) {
        self.start_with_interval(self.inner.config.poll_interval)
            .await
    }

    /// Starts ticking every `interval`. No-op if already running.
    pub async fn start_with_interval(&self, interval: Duration) {
        let mut slot = self.inner.tick_loop.lock().await;
        if slot.is_some() {
            return;
        }

        let period = interval.max(Duration::from_millis(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_tick_loop(
            Arc::downgrade(&self.inner),
            period,
            shutdown_rx,
        ));
        *slot = Some(TickLoop { shutdown, handle });
        drop(slot);

        tracing::info!("scheduler started interval_ms={}", period.as_millis());
        self.inner.events.emit(JobEvent::SchedulerStarted);
    }

    /// Stops ticking. Unless `force` is set, waits until no handler has an
    /// invocation in flight. In-flight jobs left behind by a forced stop still
    /// complete and are rescheduled or removed, but nothing dispatches them again
    /// until the next `start`.
    pub async fn stop(&self, opts: StopOptions) {
        let tick_loop = self.inner.tick_loop.lock().await.take();

        if let Some(tick_loop) = tick_loop {
            let _ = tick_loop.shutdown.send(true);
            if let Err(e) = tick_loop.handle.await {
                tracing::error!("tick loop ended abnormally: {}", e);
            }
            tracing::info!("scheduler stopped force={}", opts.force);
            self.inner.events.emit(JobEvent::SchedulerStopped);
        }

        if opts.force {
            return;
        }

        loop {
            let running = self.inner.store.lock().await.total_running();
            if running == 0 {
                break;
            }
            tracing::debug!("draining: {} job(s) still running", running);
            time::sleep(self.inner.config.drain_poll_interval).await;
        }
    }

    /// One selection + dispatch pass.
    pub async fn tick(&self) {
        let ready = self.select_ready_jobs().await;

        for job in ready {
            let entry = self.inner.registry.read().await.handler_for(&job.name);
            match entry {
                Some(entry) => self.dispatch(job, entry).await,
                None => self.fail_unregistered(job).await,
            }
        }
    }

    // ----------------------------
    // Dispatch / completion
    // ----------------------------

    async fn dispatch(&self, job: Job, entry: HandlerEntry) {
        let admitted =
            self.inner
                .store
                .lock()
                .await
                .try_admit(job.id, entry.concurrency, Utc::now());

        let Some(job) = admitted else {
            tracing::trace!(
                "handler {} saturated, job id={} waits for a later tick",
                job.name,
                job.id
            );
            return;
        };

        tracing::debug!(
            "dispatching job id={} name={} attempt={}/{}",
            job.id,
            job.name,
            job.attempts,
            job.max_attempts
        );
        self.inner.events.emit(JobEvent::Started(job.clone()));

        let scheduler = self.clone();
        tokio::spawn(async move {
            let (job_id, name) = (job.id, job.name.clone());
            let ctx = JobContext::new(job.clone());
            let attempt = tokio::spawn(run_attempt(Arc::clone(&entry.handler), ctx));

            // second line of defence: a panicking handler kills only its own task
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("job id={} attempt task crashed: {}", job_id, e);
                    AttemptOutcome::from_join_error(e)
                }
            };

            // completion calls into the adapter; if it panics the slot is still freed
            let completion = {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.complete(job, &entry, outcome).await })
            };
            if let Err(e) = completion.await {
                tracing::error!("job id={} completion crashed: {}", job_id, e);
            }

            scheduler.inner.store.lock().await.release(&name);
        });
    }

    /// Applies the outcome of one attempt. The caller releases the slot.
    async fn complete(&self, job: Job, entry: &HandlerEntry, outcome: AttemptOutcome) {
        let AttemptOutcome {
            result,
            retry_requested,
        } = outcome;

        match (result, retry_requested) {
            (Ok(()), Some(delay)) => {
                let job = self.reschedule(job, delay).await;
                tracing::info!(
                    "job id={} asked for a retry in {}ms",
                    job.id,
                    delay.as_millis()
                );
                self.inner.events.emit(JobEvent::RetryScheduled(job));
            }
            (Ok(()), None) => {
                let job = self.remove(job).await;
                tracing::debug!("job id={} succeeded attempt={}", job.id, job.attempts);
                self.inner.events.emit(JobEvent::Succeeded(job));
            }
            (Err(error), requested) if job.has_attempts_left() => {
                let delay = match requested {
                    Some(delay) => delay,
                    None => {
                        let base_ms = job.backoff_ms.unwrap_or(entry.backoff_ms);
                        Duration::from_millis(self.backoff_ms(base_ms, job.attempts).await)
                    }
                };
                let job = self.reschedule(job, delay).await;
                tracing::warn!(
                    "job id={} failed attempt={}/{} retry_in_ms={}: {}",
                    job.id,
                    job.attempts,
                    job.max_attempts,
                    delay.as_millis(),
                    error
                );
                self.inner.events.emit(JobEvent::Retry { job, error });
            }
            (Err(error), _) => {
                let job = self.remove(job).await;
                tracing::error!(
                    "job id={} failed permanently after {} attempt(s): {}",
                    job.id,
                    job.attempts,
                    error
                );
                self.inner.events.emit(JobEvent::Failed { job, error });
            }
        }
    }

    async fn fail_unregistered(&self, job: Job) {
        // an overlapping tick may have failed it already
        let Some(job) = self.inner.store.lock().await.remove(job.id) else {
            return;
        };
        let error = JobError::no_handler(&job.name);
        if let Err(e) = self.inner.adapter.remove(job.id).await {
            tracing::error!("failed to remove job id={} from adapter: {:#}", job.id, e);
        }
        tracing::error!("job id={} dropped: {}", job.id, error);
        self.inner.events.emit(JobEvent::Failed { job, error });
    }

    async fn reschedule(&self, job: Job, delay: Duration) -> Job {
        let now = Utc::now();
        let updated = self
            .inner
            .store
            .lock()
            .await
            .reschedule(job.id, after(now, delay), now);
        let job = updated.unwrap_or(job);

        if let Err(e) = self.inner.adapter.update(&job).await {
            tracing::error!("failed to persist retry of job id={}: {:#}", job.id, e);
        }
        job
    }

    async fn remove(&self, job: Job) -> Job {
        let removed = self.inner.store.lock().await.remove(job.id);
        let job = removed.unwrap_or(job);

        if let Err(e) = self.inner.adapter.remove(job.id).await {
            tracing::error!("failed to remove job id={} from adapter: {:#}", job.id, e);
        }
        job
    }

    async fn backoff_ms(&self, base_ms: u64, attempt_no: u32) -> u64 {
        let cfg = BackoffConfig::new(base_ms, self.inner.config.max_backoff_ms);
        let mut rng = self.inner.rng.lock().await;
        next_delay_ms(attempt_no, &cfg, &mut *rng)
    }
}

async fn run_tick_loop(inner: Weak<Inner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                // awaited in place: the next tick cannot start before this pass is done
                Scheduler { inner }.tick().await;
            }
        }
    }
}
