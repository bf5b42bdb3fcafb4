//! 💀 Errors — the many ways a replay can fail to become a record.
//!
//! Everything in [`ParseError`] aborts the job before acknowledgement, so the queue
//! hands it out again later. [`NotifyError`] never gets that far: the fanout logs it
//! and moves on. [`QueueError`] and [`StoreError`] are the raw failures of the
//! backends; the worker folds store failures into `ParseError::PersistenceFailed`.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 🚫 A job-fatal failure. Every variant is retryable by redelivery.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("coordinator lookup failed for match {match_id}")]
    DataSourceUnavailable {
        match_id: u64,
        #[source]
        source: BoxError,
    },

    #[error("fetching replay from {url} failed")]
    FetchFailed {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("parser service rejected or dropped the replay stream")]
    ParserUnavailable {
        #[source]
        source: BoxError,
    },

    #[error("reducer failed: {reason}")]
    ReduceFailed { reason: String },

    #[error("reduced output exceeded {limit_bytes} bytes")]
    OutputTooLarge { limit_bytes: usize },

    #[error("reducer output is not a JSON object")]
    MalformedAggregate {
        #[source]
        source: BoxError,
    },

    #[error("parse pipeline exceeded its {seconds}s deadline")]
    DeadlineExceeded { seconds: u64 },

    #[error("persisting match {match_id} failed")]
    PersistenceFailed {
        match_id: u64,
        #[source]
        source: StoreError,
    },
}

impl ParseError {
    pub(crate) fn fetch(url: &str, source: impl Into<BoxError>) -> Self {
        ParseError::FetchFailed {
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn parser(source: impl Into<BoxError>) -> Self {
        ParseError::ParserUnavailable {
            source: source.into(),
        }
    }

    pub(crate) fn malformed(source: impl Into<BoxError>) -> Self {
        ParseError::MalformedAggregate {
            source: source.into(),
        }
    }

    /// 🏷️ Short stable name for log fields and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::DataSourceUnavailable { .. } => "data_source_unavailable",
            ParseError::FetchFailed { .. } => "fetch_failed",
            ParseError::ParserUnavailable { .. } => "parser_unavailable",
            ParseError::ReduceFailed { .. } => "reduce_failed",
            ParseError::OutputTooLarge { .. } => "output_too_large",
            ParseError::MalformedAggregate { .. } => "malformed_aggregate",
            ParseError::DeadlineExceeded { .. } => "deadline_exceeded",
            ParseError::PersistenceFailed { .. } => "persistence_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queued job payload is not a valid job: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unknown receipt {0}")]
    UnknownReceipt(i64),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected the record with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint answered {status}")]
    Rejected { status: u16 },

    #[error("notification to account {account_id} refused: {reason}")]
    Refused { account_id: u64, reason: String },
}

/// 🧅 "outer: middle: root". The whole onion on one log line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
