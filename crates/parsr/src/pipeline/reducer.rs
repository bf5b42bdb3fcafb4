//! 🧮 Reducers: an event stream goes in, exactly one JSON object comes out.
//!
//! - `InProcess` — the default. Folds events into a summary right here, no subprocess.
//! - `Command` — hands the events to an external program on stdin and takes its stdout
//!   as the aggregate. For deployments that already have a reducer they trust.
//! - `InMemory` — drains the stream and returns a canned aggregate. Tests only, mostly.
//!
//! Every reducer enforces the same output bound. Past it, the job fails with
//! `OutputTooLarge` rather than eating the worker's memory.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, trace, warn};

use crate::common::ParseAggregate;
use crate::errors::ParseError;

/// 📜 The parser's response: newline-delimited JSON events, read as they arrive.
pub type EventStream = Box<dyn AsyncBufRead + Send + Unpin>;

#[async_trait]
pub trait Reducer: std::fmt::Debug + Send + Sync {
    async fn reduce(
        &self,
        events: EventStream,
        match_id: u64,
        do_log_parse: bool,
        max_output_bytes: usize,
    ) -> Result<ParseAggregate, ParseError>;
}

#[derive(Debug, Deserialize, Clone, Default)]
pub enum ReducerConfig {
    #[default]
    InProcess,
    Command(CommandReducerConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandReducerConfig {
    pub program: String,
    /// 🔧 Fixed arguments. `{match_id} {do_log_parse}` are appended after these.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug)]
pub enum ReducerBackend {
    InProcess(InProcessReducer),
    Command(CommandReducer),
    InMemory(InMemoryReducer),
}

impl ReducerBackend {
    pub fn from_config(config: &ReducerConfig) -> Self {
        match config {
            ReducerConfig::InProcess => ReducerBackend::InProcess(InProcessReducer),
            ReducerConfig::Command(c) => ReducerBackend::Command(CommandReducer::new(c.clone())),
        }
    }
}

#[async_trait]
impl Reducer for ReducerBackend {
    async fn reduce(
        &self,
        events: EventStream,
        match_id: u64,
        do_log_parse: bool,
        max_output_bytes: usize,
    ) -> Result<ParseAggregate, ParseError> {
        match self {
            ReducerBackend::InProcess(r) => {
                r.reduce(events, match_id, do_log_parse, max_output_bytes).await
            }
            ReducerBackend::Command(r) => {
                r.reduce(events, match_id, do_log_parse, max_output_bytes).await
            }
            ReducerBackend::InMemory(r) => {
                r.reduce(events, match_id, do_log_parse, max_output_bytes).await
            }
        }
    }
}

// ============================================================
//  🧮 InProcessReducer
// ============================================================

#[derive(Debug, Default, Serialize)]
struct Summary {
    event_counts: IndexMap<String, u64>,
    slot_event_counts: IndexMap<String, u64>,
    chat: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_event_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<Vec<Value>>,
}

/// 🧮 Counts events by `type` and by `slot`, keeps chat lines and the last `time` seen.
/// With log parsing on, every raw event is kept under `logs` too.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessReducer;

/// ➕ Bumps a counter. A key seen for the first time is charged to the output budget.
fn count(counts: &mut IndexMap<String, u64>, key: String, retained_bytes: &mut usize) {
    match counts.entry(key) {
        Entry::Occupied(mut seen) => *seen.get_mut() += 1,
        Entry::Vacant(fresh) => {
            *retained_bytes += fresh.key().len();
            fresh.insert(1);
        }
    }
}

fn line_error(err: LinesCodecError, line_number: usize, max_output_bytes: usize) -> ParseError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => ParseError::OutputTooLarge {
            limit_bytes: max_output_bytes,
        },
        LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
            ParseError::ReduceFailed {
                reason: format!("event line {line_number} is not UTF-8: {e}"),
            }
        }
        LinesCodecError::Io(e) => ParseError::parser(e),
    }
}

fn slot_key(slot: &Value) -> Option<String> {
    match slot {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl Reducer for InProcessReducer {
    async fn reduce(
        &self,
        events: EventStream,
        match_id: u64,
        do_log_parse: bool,
        max_output_bytes: usize,
    ) -> Result<ParseAggregate, ParseError> {
        let mut summary = Summary {
            logs: do_log_parse.then(Vec::new),
            ..Default::default()
        };
        let mut retained_bytes = 0usize;
        let mut line_number = 0usize;
        // -- a line longer than the whole output budget can never fit, so stop buffering it
        let mut lines = FramedRead::new(events, LinesCodec::new_with_max_length(max_output_bytes));

        while let Some(line) = lines.next().await {
            line_number += 1;
            let line = line.map_err(|e| line_error(e, line_number, max_output_bytes))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: Value = serde_json::from_str(line).map_err(|e| ParseError::ReduceFailed {
                reason: format!("event line {line_number} is not JSON: {e}"),
            })?;
            let Value::Object(ref fields) = event else {
                return Err(ParseError::ReduceFailed {
                    reason: format!("event line {line_number} is not an object"),
                });
            };

            let kind = fields
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let keep_chat = kind == "chat";
            count(&mut summary.event_counts, kind, &mut retained_bytes);
            if let Some(slot) = fields.get("slot").and_then(slot_key) {
                count(&mut summary.slot_event_counts, slot, &mut retained_bytes);
            }
            if let Some(time) = fields
                .get("time")
                .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))
            {
                summary.last_event_time = Some(time);
            }

            let keep_log = summary.logs.is_some();
            retained_bytes += line.len() * (usize::from(keep_chat) + usize::from(keep_log));
            if retained_bytes > max_output_bytes {
                return Err(ParseError::OutputTooLarge {
                    limit_bytes: max_output_bytes,
                });
            }
            if keep_chat {
                summary.chat.push(event.clone());
            }
            if let Some(ref mut logs) = summary.logs {
                logs.push(event);
            }
        }

        let aggregate = match serde_json::to_value(&summary).map_err(ParseError::malformed)? {
            Value::Object(map) => map,
            _ => return Err(ParseError::malformed("summary did not serialize to an object")),
        };
        let encoded_len = serde_json::to_vec(&aggregate)
            .map_err(ParseError::malformed)?
            .len();
        if encoded_len > max_output_bytes {
            return Err(ParseError::OutputTooLarge {
                limit_bytes: max_output_bytes,
            });
        }
        debug!(
            match_id,
            events = line_number,
            bytes = encoded_len,
            "🧮 events reduced"
        );
        Ok(aggregate)
    }
}

// ============================================================
//  🐚 CommandReducer
// ============================================================

/// 🐚 Pipes events through an external program. Its stdout is the aggregate.
#[derive(Debug)]
pub struct CommandReducer {
    config: CommandReducerConfig,
}

impl CommandReducer {
    pub fn new(config: CommandReducerConfig) -> Self {
        Self { config }
    }

    fn reduce_failed(&self, what: impl std::fmt::Display) -> ParseError {
        ParseError::ReduceFailed {
            reason: format!("'{}' {what}", self.config.program),
        }
    }
}

#[async_trait]
impl Reducer for CommandReducer {
    async fn reduce(
        &self,
        mut events: EventStream,
        match_id: u64,
        do_log_parse: bool,
        max_output_bytes: usize,
    ) -> Result<ParseAggregate, ParseError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(match_id.to_string())
            .arg(do_log_parse.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.reduce_failed(format_args!("could not be started: {e}")))?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(self.reduce_failed("came up without stdio pipes"));
        };

        let feed = tokio::spawn(async move {
            let copied = tokio::io::copy_buf(&mut events, &mut stdin).await;
            let closed = stdin.shutdown().await;
            match copied.and(closed) {
                Ok(_) => Ok(()),
                // -- the reducer may stop reading early, that's its call
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                Err(e) => Err(e),
            }
        });

        let mut output = Vec::new();
        let read = stdout
            .take(max_output_bytes as u64 + 1)
            .read_to_end(&mut output)
            .await;

        let overflowed = output.len() > max_output_bytes;
        if read.is_err() || overflowed {
            feed.abort();
            if let Err(e) = child.start_kill() {
                warn!("💀 could not kill the reducer: {e}");
            }
            let _ = child.wait().await;
            if overflowed {
                return Err(ParseError::OutputTooLarge {
                    limit_bytes: max_output_bytes,
                });
            }
        }
        if let Err(e) = read {
            return Err(self.reduce_failed(format_args!("output could not be read: {e}")));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| self.reduce_failed(format_args!("could not be waited on: {e}")))?;
        match feed.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ParseError::parser(e)),
            Err(e) => return Err(self.reduce_failed(format_args!("input feed died: {e}"))),
        }
        if !status.success() {
            return Err(self.reduce_failed(format_args!("exited with {status}")));
        }

        trace!(match_id, bytes = output.len(), "🐚 reducer finished");
        match serde_json::from_slice::<Value>(&output).map_err(ParseError::malformed)? {
            Value::Object(map) => Ok(map),
            other => Err(ParseError::malformed(format!(
                "reducer printed {} instead of an object",
                match other {
                    Value::Array(_) => "an array",
                    Value::String(_) => "a string",
                    Value::Number(_) => "a number",
                    Value::Bool(_) => "a boolean",
                    _ => "null",
                }
            ))),
        }
    }
}

// ============================================================
//  🧠 InMemoryReducer
// ============================================================

/// 🧠 Ignores what the parser said (after reading all of it) and returns a fixed aggregate.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReducer {
    aggregate: ParseAggregate,
}

impl InMemoryReducer {
    pub fn new(aggregate: ParseAggregate) -> Self {
        Self { aggregate }
    }
}

#[async_trait]
impl Reducer for InMemoryReducer {
    async fn reduce(
        &self,
        mut events: EventStream,
        _match_id: u64,
        _do_log_parse: bool,
        _max_output_bytes: usize,
    ) -> Result<ParseAggregate, ParseError> {
        tokio::io::copy_buf(&mut events, &mut tokio::io::sink())
            .await
            .map_err(ParseError::parser)?;
        Ok(self.aggregate.clone())
    }
}
