//! 📂 The file store: one NDJSON line per insert, `{"match": ..., "options": ...}`.
//!
//! Append-only. Redelivery writes the same match twice, and whoever replays the file
//! is expected to treat later lines as overwriting earlier ones. That's the upsert.
//! Each insert is flushed before it returns, because "the store has it" is what lets
//! the worker ack, and a line sitting in a BufWriter is not "has it".
//!
//! 🦆

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::MatchStore;
use crate::backends::http::InsertRequest;
use crate::common::{MergedMatchRecord, PersistOptions};
use crate::errors::StoreError;

#[derive(Debug, Deserialize, Clone)]
pub struct FileStoreConfig {
    pub file_name: String,
}

#[derive(Debug)]
pub struct FileStore {
    // -- many slots, one file. Lines must not interleave.
    file_buf: Mutex<BufWriter<File>>,
}

impl FileStore {
    /// 🚀 Opens (or creates) the file in append mode. Existing lines are left alone.
    pub async fn open(config: FileStoreConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_name)
            .await
            .context(format!(
                "💀 The store file '{}' could not be opened for appending. \
                 We stared at the path. The path stared back. \
                 One of us was wrong about whether the parent directory existed.",
                config.file_name
            ))?;
        Ok(Self {
            file_buf: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl MatchStore for FileStore {
    async fn insert_match(
        &self,
        record: &MergedMatchRecord,
        options: &PersistOptions,
    ) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&InsertRequest { record, options })?;
        line.push(b'\n');

        let mut file_buf = self.file_buf.lock().await;
        file_buf.write_all(&line).await?;
        file_buf.flush().await?;
        trace!(
            "📬 {} bytes for match {:?} written down",
            line.len(),
            record.match_id()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Job, PersistKind};

    #[tokio::test]
    async fn the_one_where_every_insert_is_a_line() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file_name = dir.path().join("matches.ndjson").display().to_string();
        let options = PersistOptions {
            kind: PersistKind::Parsed,
            skip_parse: true,
            do_log_parse: false,
            do_scenarios: false,
        };

        let store = FileStore::open(FileStoreConfig {
            file_name: file_name.clone(),
        })
        .await?;
        for match_id in [1, 2, 2] {
            let record = crate::merger::merge(Default::default(), &Job::new(match_id))?;
            store.insert_match(&record, &options).await?;
        }

        let written = tokio::fs::read_to_string(&file_name).await?;
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["match"]["match_id"], 1);
        assert_eq!(lines[2]["options"]["type"], "parsed");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_reopening_does_not_eat_history() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file_name = dir.path().join("matches.ndjson").display().to_string();
        tokio::fs::write(&file_name, "{\"match\":{\"match_id\":0},\"options\":{}}\n").await?;

        let store = FileStore::open(FileStoreConfig {
            file_name: file_name.clone(),
        })
        .await?;
        let record = crate::merger::merge(Default::default(), &Job::new(9))?;
        let options = crate::merger::persist_options(&Job::new(9), 0);
        store.insert_match(&record, &options).await?;

        let written = tokio::fs::read_to_string(&file_name).await?;
        assert_eq!(written.lines().count(), 2);
        Ok(())
    }
}
