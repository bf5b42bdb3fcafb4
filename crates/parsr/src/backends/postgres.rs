//! 🐘 The Postgres-backed reliable queue.
//!
//! One table, many workers, zero coordination beyond `FOR UPDATE SKIP LOCKED`.
//! Claiming a row decrements its attempts and pushes `next_attempt_time` out by the
//! visibility window, so a worker that dies mid-job simply lets the row reappear later.
//! Ack deletes. Nack on the last attempt deletes too, because the job has had its chances.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::{debug, warn};

use crate::backends::JobQueue;
use crate::common::{ClaimedJob, Job};
use crate::errors::QueueError;

#[derive(Debug, Deserialize, Clone)]
pub struct PostgresQueueConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// 🏗️ Run `CREATE TABLE IF NOT EXISTS` on connect. Handy locally, pointless in prod.
    #[serde(default)]
    pub create_table: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> i32 {
    3
}

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS queue (
        id bigserial PRIMARY KEY,
        type text NOT NULL,
        timestamp timestamptz NOT NULL DEFAULT NOW(),
        attempts int NOT NULL,
        data json NOT NULL,
        next_attempt_time timestamptz,
        priority int NOT NULL DEFAULT 0
    )
";

const CLAIM_NEXT: &str = r"
    UPDATE queue
    SET attempts = attempts - 1,
        next_attempt_time = NOW() + make_interval(secs => $2)
    WHERE id = (
        SELECT id
        FROM queue
        WHERE type = $1
          AND attempts > 0
          AND (next_attempt_time IS NULL OR next_attempt_time <= NOW())
        ORDER BY priority ASC, id ASC
        FOR UPDATE SKIP LOCKED
        LIMIT 1
    )
    RETURNING id, attempts, data
";

#[derive(Debug, Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    queue_name: String,
    visibility_timeout: Duration,
    max_attempts: i32,
}

impl PostgresQueue {
    pub async fn connect(config: &PostgresQueueConfig, queue_name: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .context(
                "💀 Postgres did not pick up. The queue lives there. \
                 Check `queue.Postgres.url` and whether the database is awake.",
            )?;

        if config.create_table {
            sqlx::query(CREATE_TABLE)
                .execute(&pool)
                .await
                .context("💀 Could not create the queue table")?;
            debug!("🏗️ queue table is in place");
        }

        Ok(Self {
            pool,
            queue_name: queue_name.to_string(),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl JobQueue for PostgresQueue {
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let row = sqlx::query_as::<_, (i64, i32, Json<Job>)>(CLAIM_NEXT)
            .bind(&self.queue_name)
            .bind(self.visibility_timeout.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(receipt, attempts_remaining, Json(job))| ClaimedJob {
            receipt,
            attempts_remaining,
            job,
        }))
    }

    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM queue WHERE id = $1")
            .bind(claimed.receipt)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownReceipt(claimed.receipt));
        }
        Ok(())
    }

    async fn nack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        if claimed.attempts_remaining > 0 {
            // -- the row keeps its pushed-out next_attempt_time and comes back on its own
            return Ok(());
        }
        warn!(
            match_id = claimed.job.match_id,
            "🪦 out of attempts, deleting the job from the queue"
        );
        sqlx::query("DELETE FROM queue WHERE id = $1")
            .bind(claimed.receipt)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO queue (type, attempts, data) VALUES ($1, $2, $3)")
            .bind(&self.queue_name)
            .bind(self.max_attempts)
            .bind(Json(job))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
