use serde::Deserialize;
use std::time::Duration;
use tickflow::{boxed, HandlerOptions, JobError, Scheduler};

#[derive(Deserialize)]
struct EmailSendPayload {
    user_id: i64,
    template: Option<String>,
}

/// Demo handlers. Replace these with your real handlers.
pub async fn register_demo_handlers(scheduler: &Scheduler) {
    scheduler
        .register(
            "demo_ok",
            |_payload, _ctx| {
                boxed(async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(())
                })
            },
            HandlerOptions::new(),
        )
        .await;

    scheduler
        .register(
            "fail_me",
            |_payload, _ctx| {
                boxed(async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Err(JobError::new("TIMEOUT", "simulated timeout"))
                })
            },
            HandlerOptions::new().backoff_ms(500),
        )
        .await;

    // payload validation; a bad payload fails with BAD_PAYLOAD
    scheduler
        .register(
            "email_send",
            |_payload, ctx| {
                boxed(async move {
                    let payload: EmailSendPayload = ctx.payload()?;
                    tracing::info!(
                        "sending email user_id={} template={}",
                        payload.user_id,
                        payload.template.as_deref().unwrap_or("default")
                    );
                    Ok(())
                })
            },
            HandlerOptions::new().concurrency(50),
        )
        .await;
}
