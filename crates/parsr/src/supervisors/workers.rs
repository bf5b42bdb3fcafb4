//! 🧵 Workers: the ones who actually parse replays while the Supervisor takes the credit.
//!
//! Each `ParseWorker` is one slot: claim a job, run every stage for it, settle it with the
//! queue, go again. Slots share nothing mutable except the queue and the stats counters.
//! Everything a slot needs to process a job lives in one [`ParseContext`].

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;

mod parse_worker;
pub(crate) use parse_worker::{ParseWorker, SlotSettings};

use crate::backends::{MatchStore, NotifierBackend, QueueBackend, StoreBackend};
use crate::common::{Job, MergedMatchRecord};
use crate::errors::ParseError;
use crate::merger;
use crate::pipeline::TransformPipeline;
use crate::resolver::DataSourceResolver;

/// 🏗️ A background worker, that does work. duh.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 🧰 The collaborators a job passes through, in order.
#[derive(Debug)]
pub struct ParseContext {
    pub(crate) queue: QueueBackend,
    pub(crate) resolver: DataSourceResolver,
    pub(crate) pipeline: TransformPipeline,
    pub(crate) store: StoreBackend,
    pub(crate) notifier: Arc<NotifierBackend>,
    pub(crate) scenarios_sample_percent: u8,
}

impl ParseContext {
    pub fn new(
        queue: QueueBackend,
        resolver: DataSourceResolver,
        pipeline: TransformPipeline,
        store: StoreBackend,
        notifier: NotifierBackend,
        scenarios_sample_percent: u8,
    ) -> Self {
        Self {
            queue,
            resolver,
            pipeline,
            store,
            notifier: Arc::new(notifier),
            scenarios_sample_percent,
        }
    }

    /// 🚀 Resolve, parse, merge, persist. The first failure stops the chain.
    ///
    /// Nothing is written anywhere unless every stage before the store succeeded, and a
    /// successful return means the store has the record. Acking is the caller's move.
    pub async fn process(&self, job: &mut Job) -> Result<MergedMatchRecord, ParseError> {
        let fetch_url = self.resolver.resolve(job).await?;
        let aggregate = self.pipeline.run(job, &fetch_url).await?;

        let options = merger::persist_options(job, self.scenarios_sample_percent);
        let record = merger::merge(aggregate, job).map_err(ParseError::malformed)?;

        self.store
            .insert_match(&record, &options)
            .await
            .map_err(|source| ParseError::PersistenceFailed {
                match_id: job.match_id,
                source,
            })?;
        Ok(record)
    }
}
