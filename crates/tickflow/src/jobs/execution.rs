use crate::jobs::handlers::{HandlerFn, JobContext, JobError};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinError;

#[derive(Debug)]
pub struct AttemptOutcome {
    pub result: Result<(), JobError>,
    pub retry_requested: Option<Duration>,
}

impl AttemptOutcome {
    pub fn failed(error: JobError) -> Self {
        Self {
            result: Err(error),
            retry_requested: None,
        }
    }

    /// Maps a crashed attempt task onto an ordinary failure.
    pub fn from_join_error(err: JoinError) -> Self {
        let message = if err.is_panic() {
            let panic = err.into_panic();
            panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string())
        } else {
            "attempt task was cancelled".to_string()
        };
        Self::failed(JobError::panicked(message))
    }
}

/// Runs one handler invocation to completion. Handler errors are folded into the
/// outcome; nothing here imposes a timeout.
pub async fn run_attempt(handler: Arc<HandlerFn>, ctx: JobContext) -> AttemptOutcome {
    tracing::debug!(
        "running job id={} name={} attempt={}/{}",
        ctx.job.id,
        ctx.job.name,
        ctx.attempt,
        ctx.job.max_attempts
    );

    let result = (handler)(&ctx.job.payload, &ctx).await;
    let retry_requested = ctx.take_retry_request().await;

    AttemptOutcome {
        result,
        retry_requested,
    }
}
