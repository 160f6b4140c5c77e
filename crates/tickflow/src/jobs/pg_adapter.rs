use crate::config::DatabaseConfig;
use crate::jobs::adapter::PersistenceAdapter;
use crate::jobs::model::{Job, JobStatus};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

/// Mirrors the active job set into the `scheduler_jobs` table.
#[derive(Clone)]
pub struct PgAdapter {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    name: String,
    payload_json: Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    run_at: DateTime<Utc>,
    priority: i32,
    backoff_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            name: row.name,
            payload: row.payload_json,
            status: match row.status.as_str() {
                "running" => JobStatus::Running,
                _ => JobStatus::Pending,
            },
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(1).max(1),
            run_at: row.run_at,
            priority: row.priority,
            backoff_ms: row.backoff_ms.and_then(|ms| u64::try_from(ms).ok()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl PgAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&cfg.url)
            .await
            .context("failed to connect to postgres")?;

        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceAdapter for PgAdapter {
    /// Upsert, so a replayed `add` after a partial failure is harmless.
    async fn add(&self, job: &Job) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs (
                id, name, payload_json, status, attempts, max_attempts,
                run_at, priority, backoff_ms, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                run_at = EXCLUDED.run_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(to_i32(job.attempts))
        .bind(to_i32(job.max_attempts))
        .bind(job.run_at)
        .bind(job.priority)
        .bind(job.backoff_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, job: &Job) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET status = $2,
                attempts = $3,
                run_at = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(to_i32(job.attempts))
        .bind(job.run_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, job_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM scheduler_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, name, payload_json, status, attempts, max_attempts,
                   run_at, priority, backoff_ms, created_at, updated_at
            FROM scheduler_jobs
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }
}
