//! 🔔 Notification fanout: one independent delivery per player who can be told.
//!
//! By the time this runs the job is already acknowledged. Nothing here can change its
//! outcome, and one player's failed (or panicking) delivery can't touch another's.
//! Every delivery is its own task in a `JoinSet`; a supervising task drains the set,
//! logs each result, and tallies a [`FanoutReport`] for whoever cares to wait for it.
//! The worker doesn't wait.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::backends::Notifier;
use crate::common::{Job, NotificationMessage};

/// 📊 How the fanout went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// ✅ the notifier confirmed delivery
    pub delivered: usize,
    /// 🔕 the notifier had nobody to deliver to
    pub undelivered: usize,
    /// 💀 errored or panicked
    pub failed: usize,
    /// 🙈 no account id, or the zero placeholder
    pub skipped: usize,
}

/// 🎫 Handle on a running fanout. Drop it to fire and forget.
#[derive(Debug)]
pub struct FanoutHandle {
    handle: JoinHandle<FanoutReport>,
}

impl FanoutHandle {
    /// ⏳ Wait for every delivery to settle.
    pub async fn report(self) -> FanoutReport {
        match self.handle.await {
            Ok(report) => report,
            Err(err) => {
                warn!("💀 the fanout supervisor itself went down: {err}");
                FanoutReport::default()
            }
        }
    }
}

enum Outcome {
    Delivered,
    Undelivered,
    Failed,
}

/// 🔔 Notify every eligible participant of `job`, in `pgroup` order.
pub fn notify_participants<N>(notifier: Arc<N>, job: &Job) -> FanoutHandle
where
    N: Notifier + ?Sized + 'static,
{
    let match_id = job.match_id;
    let mut deliveries = JoinSet::new();
    let mut skipped = 0usize;

    for (slot, player) in &job.pgroup {
        let Some(account_id) = player.notifiable_account() else {
            skipped += 1;
            continue;
        };
        let message = NotificationMessage::parsed(job, player);
        let notifier = Arc::clone(&notifier);
        let slot = slot.clone();
        deliveries.spawn(async move {
            match notifier.notify(account_id, &message).await {
                Ok(true) => {
                    debug!(match_id, account_id, slot, "🔔 notification delivered");
                    Outcome::Delivered
                }
                Ok(false) => {
                    debug!(match_id, account_id, slot, "🔕 nobody to deliver to");
                    Outcome::Undelivered
                }
                Err(err) => {
                    warn!(match_id, account_id, slot, error = %err, "💀 notification failed");
                    Outcome::Failed
                }
            }
        });
    }

    let handle = tokio::spawn(async move {
        let mut report = FanoutReport {
            skipped,
            ..Default::default()
        };
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(Outcome::Delivered) => report.delivered += 1,
                Ok(Outcome::Undelivered) => report.undelivered += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(err) => {
                    warn!(match_id, "💀 a notification task died: {err}");
                    report.failed += 1;
                }
            }
        }
        info!(
            match_id,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "🔔 fanout finished"
        );
        report
    });

    FanoutHandle { handle }
}
