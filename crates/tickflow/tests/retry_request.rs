mod common;

use common::{collect_until, is_terminal_for, kinds_for, scheduler, TICK};
use serde_json::json;
use std::time::{Duration, Instant};
use tickflow::{boxed, HandlerOptions, JobError, JobEvent, JobOptions};

#[tokio::test]
async fn successful_attempt_can_ask_to_run_again() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();

    scheduler
        .register(
            "poll_export",
            |_, ctx| {
                boxed(async move {
                    if ctx.attempt == 1 {
                        assert!(ctx.retry(Duration::from_millis(20)).await);
                    }
                    Ok(())
                })
            },
            HandlerOptions::new(),
        )
        .await;
    let job = scheduler
        .enqueue("poll_export", json!({}), JobOptions::new().max_attempts(2))
        .await
        .unwrap();

    scheduler.start_with_interval(TICK).await;
    let events = collect_until(&mut rx, |e| is_terminal_for(e, job.id)).await;
    scheduler.stop(Default::default()).await;

    assert_eq!(
        kinds_for(&events, job.id),
        vec!["start", "retryScheduled", "start", "success"]
    );
    let scheduled = events
        .iter()
        .find(|e| matches!(e, JobEvent::RetryScheduled(_)))
        .and_then(|e| e.job())
        .unwrap();
    assert_eq!(scheduled.attempts, 1);
    assert_eq!(
        scheduled.run_at - scheduled.updated_at,
        chrono::Duration::milliseconds(20)
    );
}

#[tokio::test]
async fn retry_request_is_refused_on_the_last_attempt() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();

    scheduler
        .register(
            "poll_export",
            |_, ctx| {
                boxed(async move {
                    assert!(!ctx.retry(Duration::from_millis(20)).await);
                    Ok(())
                })
            },
            HandlerOptions::new(),
        )
        .await;
    let job = scheduler
        .enqueue("poll_export", json!({}), JobOptions::new())
        .await
        .unwrap();

    scheduler.start_with_interval(TICK).await;
    let events = collect_until(&mut rx, |e| is_terminal_for(e, job.id)).await;
    scheduler.stop(Default::default()).await;

    assert_eq!(kinds_for(&events, job.id), vec!["start", "success"]);
}

#[tokio::test]
async fn requested_delay_replaces_backoff_after_a_failure() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();

    scheduler
        .register(
            "rate_limited",
            |_, ctx| {
                boxed(async move {
                    if ctx.attempt == 1 {
                        ctx.retry(Duration::ZERO).await;
                        return Err(JobError::new("RATE_LIMITED", "slow down"));
                    }
                    Ok(())
                })
            },
            HandlerOptions::new().backoff_ms(60_000),
        )
        .await;
    let job = scheduler
        .enqueue("rate_limited", json!({}), JobOptions::new().max_attempts(2))
        .await
        .unwrap();

    let t0 = Instant::now();
    scheduler.start_with_interval(TICK).await;
    let events = collect_until(&mut rx, |e| is_terminal_for(e, job.id)).await;
    scheduler.stop(Default::default()).await;

    assert!(t0.elapsed() < Duration::from_secs(5));
    assert_eq!(
        kinds_for(&events, job.id),
        vec!["start", "retry", "start", "success"]
    );
}
