//! 🚀 parsr — the replay-parse queue worker.
//!
//! 🎬 *[a queue fills with match ids. a worker wakes. the parsing begins.]*
//!
//! Claims jobs from a reliable queue, resolves where each replay lives, streams it through
//! decompression and the parser service, folds the parser's events into one aggregate,
//! merges in the job's own fields, persists the record, acks, and tells the players.
//!
//! 🧠 Knowledge graph:
//! - `supervisors` — starts and stops the slots. Entry point for everything below.
//! - `resolver` → `pipeline` → `merger` (+ `sampling`) → store → ack → `fanout`
//! - `backends` — queue, coordinator, store and notifier, each a trait with concrete impls.
//!
//! 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod errors;
pub mod fanout;
pub mod merger;
pub mod pipeline;
pub mod resolver;
pub mod sampling;
pub mod stats;
pub mod supervisors;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::backends::{JobQueue, QueueBackend};
use crate::common::Job;
use crate::supervisors::Supervisor;

/// 🚀 Run the worker until every slot exits: Ctrl-C, or an empty queue in batch mode.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let supervisor = Supervisor::from_config(&app_config)
        .await
        .context("💀 Could not assemble the parse service. One of the backends said no.")?;
    info!(
        parallelism = app_config.runtime.parallelism,
        queue = %app_config.runtime.queue_name,
        environment = ?app_config.runtime.environment,
        "🚀 parse service starting"
    );

    let handle = supervisor.start();
    let shutdown = handle.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Ctrl-C received, finishing in-flight jobs before exiting");
                shutdown.cancel();
            }
            Err(err) => warn!("⚠️ could not listen for Ctrl-C: {err}"),
        }
    });

    let stats = handle.wait_for_shutdown().await;
    info!("📊 parse service stopped\n{}", stats.render_summary());
    Ok(())
}

/// 📮 Push jobs onto the configured queue. Returns how many went in.
pub async fn enqueue(app_config: &AppConfig, jobs: &[Job]) -> Result<usize> {
    let queue = QueueBackend::from_config(&app_config.queue, &app_config.runtime.queue_name)
        .await
        .context("💀 The queue backend would not come up, so nothing was enqueued")?;
    for job in jobs {
        queue
            .enqueue(job)
            .await
            .with_context(|| format!("💀 Enqueueing match {} failed", job.match_id))?;
    }
    Ok(jobs.len())
}

/// 📄 Read an NDJSON file of jobs, one per line. Blank lines are skipped.
pub async fn load_jobs_file(path: &Path) -> Result<Vec<Job>> {
    let file = tokio::fs::File::open(path).await.context(format!(
        "💀 The jobs file '{}' would not open. We knocked. Nobody was home.",
        path.display()
    ))?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut jobs = Vec::new();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let job: Job = serde_json::from_str(trimmed).context(format!(
            "💀 Line {line_number} of '{}' is not a job. It may be a poem. We can't queue poems.",
            path.display()
        ))?;
        jobs.push(job);
    }
    Ok(jobs)
}
