use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::file::{FileStore, FileStoreConfig};
use crate::backends::http::{HttpStore, HttpStoreConfig};
use crate::backends::in_mem::InMemoryStore;
use crate::common::{MergedMatchRecord, PersistOptions};
use crate::errors::StoreError;

/// 🕳️ The persistence gateway. Takes a finished record, keeps it somewhere durable.
///
/// # Contract 📜
/// - `insert_match` MUST be safe to call twice for the same match id. Redelivery after a
///   crash between persist and ack will do exactly that, and the second write has to
///   land as an upsert, not a duplicate or an error.
/// - No buffering. When this returns `Ok`, the record is the store's problem.
#[async_trait]
pub trait MatchStore: std::fmt::Debug + Send + Sync {
    async fn insert_match(
        &self,
        record: &MergedMatchRecord,
        options: &PersistOptions,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    InMemory,
    File(FileStoreConfig),
    Http(HttpStoreConfig),
}

#[derive(Debug)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    File(FileStore),
    Http(HttpStore),
}

impl StoreBackend {
    pub async fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        Ok(match config {
            StoreConfig::InMemory => StoreBackend::InMemory(InMemoryStore::default()),
            StoreConfig::File(c) => StoreBackend::File(FileStore::open(c.clone()).await?),
            StoreConfig::Http(c) => StoreBackend::Http(HttpStore::new(c.clone())?),
        })
    }
}

#[async_trait]
impl MatchStore for StoreBackend {
    async fn insert_match(
        &self,
        record: &MergedMatchRecord,
        options: &PersistOptions,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.insert_match(record, options).await,
            StoreBackend::File(s) => s.insert_match(record, options).await,
            StoreBackend::Http(s) => s.insert_match(record, options).await,
        }
    }
}
