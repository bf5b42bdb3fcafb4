use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::in_mem::{InMemoryQueue, InMemoryQueueConfig};
use crate::backends::postgres::{PostgresQueue, PostgresQueueConfig};
use crate::common::{ClaimedJob, Job};
use crate::errors::QueueError;

/// 📬 A reliable queue: at-least-once delivery via claim / ack / redeliver.
///
/// # Contract 📜
/// - `claim` hands out the next visible job, or `None` when nothing is ready right now.
///   A claimed job stays hidden from other claimers for the backend's visibility window.
/// - `ack` removes the job for good. Only call it after the record is persisted.
/// - `nack` tells the queue this delivery failed. The backend decides what that means
///   (usually: leave it to reappear when the window lapses, drop it if out of attempts).
/// - Redelivery timing is the queue's business, not the worker's.
#[async_trait]
pub trait JobQueue: std::fmt::Debug + Send + Sync {
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError>;
    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), QueueError>;
    async fn nack(&self, claimed: &ClaimedJob) -> Result<(), QueueError>;
    /// 📮 Producer side. The worker never calls this; the CLI and tests do.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;
}

/// 🎛️ Which queue backend to use. `[queue.InMemory]` or `[queue.Postgres]`.
#[derive(Debug, Deserialize, Clone)]
pub enum QueueConfig {
    InMemory(InMemoryQueueConfig),
    Postgres(PostgresQueueConfig),
}

#[derive(Debug)]
pub enum QueueBackend {
    InMemory(InMemoryQueue),
    Postgres(PostgresQueue),
}

impl QueueBackend {
    /// 🏗️ Build the configured queue. `queue_name` scopes Postgres rows by `type`.
    pub async fn from_config(config: &QueueConfig, queue_name: &str) -> anyhow::Result<Self> {
        Ok(match config {
            QueueConfig::InMemory(c) => QueueBackend::InMemory(InMemoryQueue::from_config(c).await?),
            QueueConfig::Postgres(c) => {
                QueueBackend::Postgres(PostgresQueue::connect(c, queue_name).await?)
            }
        })
    }
}

#[async_trait]
impl JobQueue for QueueBackend {
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        match self {
            QueueBackend::InMemory(q) => q.claim().await,
            QueueBackend::Postgres(q) => q.claim().await,
        }
    }

    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        match self {
            QueueBackend::InMemory(q) => q.ack(claimed).await,
            QueueBackend::Postgres(q) => q.ack(claimed).await,
        }
    }

    async fn nack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        match self {
            QueueBackend::InMemory(q) => q.nack(claimed).await,
            QueueBackend::Postgres(q) => q.nack(claimed).await,
        }
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        match self {
            QueueBackend::InMemory(q) => q.enqueue(job).await,
            QueueBackend::Postgres(q) => q.enqueue(job).await,
        }
    }
}
