//! 🎬 *[a slot wakes up. the queue is not empty. somewhere, a replay is waiting.]*
//!
//! The ParseWorker — one slot, one job at a time, forever (or until told to stop).
//!
//! ```text
//!   claim ──none──→ sleep(poll + jitter) ──→ claim
//!     │
//!    job ──→ process ──ok──→ ack ──→ fanout (detached)
//!                     └─err─→ nack
//! ```
//!
//! ⚠️ Ack happens only after the store has the record. Notifications happen only after
//! the ack. A crash anywhere before the ack means the queue hands the job out again.
//!
//! 🦆

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::{ParseContext, Worker};
use crate::app_config::RuntimeConfig;
use crate::backends::JobQueue;
use crate::common::ClaimedJob;
use crate::errors::error_chain;
use crate::fanout;
use crate::stats::WorkerStats;

/// 🔧 The runtime knobs a slot cares about.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
    pub(crate) shutdown_when_queue_empty: bool,
}

impl From<&RuntimeConfig> for SlotSettings {
    fn from(runtime: &RuntimeConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(runtime.poll_interval_ms),
            jitter: Duration::from_millis(runtime.jitter_ms),
            shutdown_when_queue_empty: runtime.shutdown_when_queue_empty,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ParseWorker {
    name: String,
    context: Arc<ParseContext>,
    stats: Arc<WorkerStats>,
    settings: SlotSettings,
    shutdown: CancellationToken,
}

impl ParseWorker {
    pub(crate) fn new(
        name: String,
        context: Arc<ParseContext>,
        stats: Arc<WorkerStats>,
        settings: SlotSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name,
            context,
            stats,
            settings,
            shutdown,
        }
    }

    /// 🎲 Poll interval plus up to `jitter` extra, so idle slots don't poll in lockstep.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.settings.jitter.is_zero() {
            return self.settings.poll_interval;
        }
        let jitter_millis = u64::try_from(self.settings.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.settings.poll_interval + Duration::from_millis(random_jitter)
    }

    /// 💤 Sleep, unless someone asks us to stop first.
    async fn pause(&self) {
        let duration = self.sleep_duration_with_jitter();
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    async fn run(&self) {
        while !self.shutdown.is_cancelled() {
            match self.context.queue.claim().await {
                Ok(Some(claimed)) => {
                    let match_id = self.handle(claimed).await;
                    trace!(match_id, "🔁 slot free again");
                }
                Ok(None) if self.settings.shutdown_when_queue_empty => {
                    debug!("🏁 queue is empty, slot shutting down");
                    break;
                }
                Ok(None) => {
                    trace!("💤 nothing to claim, polling again soon");
                    self.pause().await;
                }
                Err(err) => {
                    error!(error = %error_chain(&err), "💀 claiming from the queue failed");
                    self.pause().await;
                }
            }
        }
        debug!("🛑 slot stopped");
    }

    /// 🔓 Hand an unfinished delivery back to the queue's retry policy.
    async fn release(&self, claimed: &ClaimedJob) {
        if let Err(err) = self.context.queue.nack(claimed).await {
            warn!(error = %error_chain(&err), "⚠️ nack failed, the lease will lapse on its own");
        }
    }

    /// 🎯 Run one claimed job to completion and settle it with the queue.
    /// Returns the match id whatever happened.
    async fn handle(&self, claimed: ClaimedJob) -> u64 {
        let match_id = claimed.job.match_id;
        let span = info_span!("job", match_id);
        async {
            self.stats.record_claimed();
            let mut job = claimed.job.clone();

            match self.context.process(&mut job).await {
                Ok(_record) => {
                    self.stats.record_succeeded();
                    if let Err(err) = self.context.queue.ack(&claimed).await {
                        // -- no ack, no notifications: the job comes back and tries again
                        error!(error = %error_chain(&err), "💀 parsed and stored, but the ack failed");
                        self.release(&claimed).await;
                        return;
                    }
                    self.stats.record_acked();
                    info!("✅ parsed, stored and acked");

                    let fanout = fanout::notify_participants(Arc::clone(&self.context.notifier), &job);
                    let stats = Arc::clone(&self.stats);
                    tokio::spawn(
                        async move {
                            let report = fanout.report().await;
                            stats.record_fanout(&report);
                        }
                        .in_current_span(),
                    );
                }
                Err(err) => {
                    self.stats.record_failed();
                    error!(
                        error_kind = err.kind(),
                        attempts_remaining = claimed.attempts_remaining,
                        error = %error_chain(&err),
                        "💀 job failed, leaving it for redelivery"
                    );
                    self.release(&claimed).await;
                }
            }
        }
        .instrument(span)
        .await;
        match_id
    }
}

impl Worker for ParseWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        let span = info_span!("worker", worker.name = %self.name);
        tokio::spawn(
            async move {
                self.run().await;
                Ok(())
            }
            .instrument(span),
        )
    }
}
