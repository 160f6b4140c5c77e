use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tickflow::{JobEvent, JobOptions, PersistenceAdapter, Scheduler, SchedulerConfig, StopOptions};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod handlers;
use handlers::register_demo_handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = SchedulerConfig::from_env()?;
    tracing::info!(
        "tickflow worker starting poll_interval_ms={} default_concurrency={} default_backoff_ms={} max_backoff_ms={:?}",
        cfg.poll_interval.as_millis(),
        cfg.default_concurrency,
        cfg.default_backoff_ms,
        cfg.max_backoff_ms
    );

    let scheduler = Scheduler::builder()
        .config(cfg)
        .adapter(make_adapter().await?)
        .build();

    register_demo_handlers(&scheduler).await;

    let mut rx = scheduler.subscribe();
    let events_handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!("event log lagged, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    scheduler
        .enqueue("demo_ok", json!({}), JobOptions::new())
        .await?;
    scheduler
        .enqueue(
            "fail_me",
            json!({}),
            JobOptions::new().max_attempts(3).priority(1),
        )
        .await?;
    scheduler
        .enqueue(
            "email_send",
            json!({"user_id": 42, "template": "welcome"}),
            JobOptions::new().delay(Duration::from_secs(1)),
        )
        .await?;
    scheduler
        .enqueue("email_send", json!({"template": "welcome"}), JobOptions::new())
        .await?;

    scheduler.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, draining in-flight jobs");
    scheduler.stop(StopOptions::graceful()).await;

    let stats = scheduler.stats().await;
    tracing::info!(
        "shutdown complete active={} ready={} delayed={}",
        stats.active,
        stats.ready,
        stats.delayed
    );

    drop(scheduler);
    events_handle.abort();
    Ok(())
}

fn log_event(event: &JobEvent) {
    match (event.job(), event.error()) {
        (Some(job), Some(err)) => tracing::info!(
            "[{}] job id={} name={} attempt={}/{} code={} message={}",
            event.kind(),
            job.id,
            job.name,
            job.attempts,
            job.max_attempts,
            err.code,
            err.message
        ),
        (Some(job), None) => tracing::info!(
            "[{}] job id={} name={} attempt={}/{}",
            event.kind(),
            job.id,
            job.name,
            job.attempts,
            job.max_attempts
        ),
        _ => tracing::info!("[{}]", event.kind()),
    }
}

#[cfg(feature = "postgres")]
async fn make_adapter() -> anyhow::Result<Arc<dyn PersistenceAdapter>> {
    let db = tickflow::DatabaseConfig::from_env()?;
    let adapter = tickflow::PgAdapter::connect(&db).await?;
    adapter.run_migrations().await?;
    tracing::info!("mirroring jobs to postgres max_connections={}", db.max_connections);
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "postgres"))]
async fn make_adapter() -> anyhow::Result<Arc<dyn PersistenceAdapter>> {
    Ok(Arc::new(tickflow::InMemoryAdapter::new()))
}
