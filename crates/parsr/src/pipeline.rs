//! 🚰 The streaming transform pipeline: fetch → decompress → parse → reduce.
//!
//! 🎬 *[a replay leaves the CDN. it is compressed. it is large. it is on a deadline.]*
//!
//! One job, one pass, no temp files. Bytes come off the replay host, go through a
//! decoder if the URL says so, and are pushed chunk by chunk through a bounded channel
//! into the body of the parser request. The parser answers with newline-delimited events
//! while it's still reading, and the reducer folds those into a single JSON object.
//!
//! ```text
//!  upstream                                 downstream
//!  ┌───────┐   ┌────────────┐  chunks  ┌──────────────┐  events  ┌─────────┐
//!  │ fetch │ → │ decompress │ ──(N)──→ │ parser (POST)│ ───────→ │ reducer │ → aggregate
//!  └───────┘   └────────────┘          └──────────────┘          └─────────┘
//! ```
//!
//! 🧠 Knowledge graph:
//! - Upstream and downstream run concurrently under one deadline. No stage retries.
//! - Memory is bounded by the channel capacity on the way in and `max_output_bytes`
//!   on the way out.
//! - When both halves fail, the upstream error is the one reported: a parser choking on
//!   a truncated body is a symptom, the broken fetch is the cause.
//!
//! 🦆

mod decompress;
mod fetch;
mod parser;
mod reducer;

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

pub use decompress::Decompression;
pub use fetch::ReplayFetcher;
pub use parser::ParserClient;
pub use reducer::{
    CommandReducer, CommandReducerConfig, EventStream, InMemoryReducer, InProcessReducer, Reducer,
    ReducerBackend, ReducerConfig,
};

use crate::common::{Job, ParseAggregate};
use crate::errors::ParseError;

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 📡 The parser service. Replay bytes are POSTed here.
    #[serde(default = "default_parser_host")]
    pub parser_host: String,
    /// ⏳ Deadline for the whole pipeline, fetch through reduce.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 📏 Largest aggregate the reducer may produce.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// 📦 Chunks allowed in flight between the decoder and the parser request.
    #[serde(default = "default_stage_buffer_chunks")]
    pub stage_buffer_chunks: usize,
    #[serde(default)]
    pub reducer: ReducerConfig,
}

fn default_parser_host() -> String {
    "http://localhost:5600".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_stage_buffer_chunks() -> usize {
    16
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parser_host: default_parser_host(),
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            stage_buffer_chunks: default_stage_buffer_chunks(),
            reducer: ReducerConfig::default(),
        }
    }
}

/// 🚰 Runs the four stages for one job. Shared by every slot; holds no per-job state.
#[derive(Debug)]
pub struct TransformPipeline {
    fetcher: ReplayFetcher,
    parser: ParserClient,
    reducer: ReducerBackend,
    config: PipelineConfig,
}

impl TransformPipeline {
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher: ReplayFetcher::new()?,
            parser: ParserClient::new(&config.parser_host)?,
            reducer: ReducerBackend::from_config(&config.reducer),
            config: config.clone(),
        })
    }

    /// 🔧 Swap the reducer, e.g. for a canned one in tests.
    pub fn with_reducer(mut self, reducer: ReducerBackend) -> Self {
        self.reducer = reducer;
        self
    }

    /// 🚀 Fetch the replay at `url`, then decode, parse and reduce it into one aggregate
    /// for `job`. All four stages share the configured deadline.
    pub async fn run(&self, job: &Job, url: &str) -> Result<ParseAggregate, ParseError> {
        let seconds = self.config.timeout_secs;

        match tokio::time::timeout(Duration::from_secs(seconds), self.run_stages(url, job)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ParseError::DeadlineExceeded { seconds }),
        }
    }

    async fn run_stages(&self, url: &str, job: &Job) -> Result<ParseAggregate, ParseError> {
        let (tx, rx) = async_channel::bounded(self.config.stage_buffer_chunks.max(1));
        let decompression = Decompression::from_url(url);
        debug!(url, ?decompression, "🚰 starting the pipeline");

        let upstream = async move {
            let body = self.fetcher.fetch(url).await?;
            fetch::pump(decompression.wrap(body), tx, url).await
        };
        let downstream = async {
            let events = self.parser.submit(rx).await?;
            self.reducer
                .reduce(
                    events,
                    job.match_id,
                    job.do_log_parse,
                    self.config.max_output_bytes,
                )
                .await
        };

        let (upstream_result, downstream_result) = tokio::join!(upstream, downstream);
        match (upstream_result, downstream_result) {
            (Err(upstream_err), _) => Err(upstream_err),
            (Ok(pumped), result) => {
                trace!(bytes = pumped, "📦 upstream finished");
                result
            }
        }
    }
}
