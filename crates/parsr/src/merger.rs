//! 🧬 Merging — the parser's opinion, overruled by the job's facts.
//!
//! The aggregate is laid down first and every job field is stamped on top of it.
//! Shared keys always end up holding the job's value: `origin`, `match_id` and
//! friends are authoritative, whatever the reducer happened to emit under the same name.

use anyhow::Context;
use serde_json::Value;

use crate::common::{Job, MergedMatchRecord, ParseAggregate, PersistKind, PersistOptions};
use crate::sampling::should_generate_scenarios;

/// 📦 Overlay `job` onto `aggregate`. Job keys win.
pub fn merge(aggregate: ParseAggregate, job: &Job) -> anyhow::Result<MergedMatchRecord> {
    let job_fields = match serde_json::to_value(job).context("💀 The job refused to become JSON")? {
        Value::Object(fields) => fields,
        // -- a struct always serializes to an object; anything else is a serde bug
        other => anyhow::bail!("💀 The job serialized to {other}, which is not an object"),
    };

    let mut record = aggregate;
    for (key, value) in job_fields {
        record.insert(key, value);
    }
    Ok(MergedMatchRecord(record))
}

/// 🔧 Store options for a parsed record, with scenario sampling applied.
pub fn persist_options(job: &Job, scenarios_sample_percent: u8) -> PersistOptions {
    PersistOptions {
        kind: PersistKind::Parsed,
        skip_parse: true,
        do_log_parse: job.do_log_parse,
        do_scenarios: should_generate_scenarios(&job.origin, job.match_id, scenarios_sample_percent),
    }
}
