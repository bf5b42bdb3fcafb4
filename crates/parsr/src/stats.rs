//! 📊 stats.rs — "How many did we parse?" — the only question anyone asks at shutdown.
//!
//! Lock-free counters shared by every slot, and a comfy-table summary for the end of a run.
//! No rates, no sliding windows: a queue worker runs for days, and the interesting
//! numbers are the totals.
//!
//! 🦆

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};

use crate::fanout::FanoutReport;

/// 🔢 "1000000" → "1,000,000". For the humans.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Shared by every slot through an `Arc`. Relaxed ordering: these are tallies, not locks.
#[derive(Debug)]
pub struct WorkerStats {
    started: Instant,
    claimed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    acked: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_failed: AtomicU64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            claimed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            notifications_delivered: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
        }
    }
}

/// 📸 A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub acked: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
}

impl WorkerStats {
    pub(crate) fn record_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fanout(&self, report: &FanoutReport) {
        self.notifications_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.notifications_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }

    /// 🎨 The end-of-run table.
    pub fn render_summary(&self) -> String {
        let s = self.snapshot();
        let mut table = Table::new();
        table
            .load_preset(NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic);
        let rows = [
            ("uptime", format_duration(self.started.elapsed())),
            ("jobs claimed", format_number(s.claimed)),
            ("jobs parsed", format_number(s.succeeded)),
            ("jobs failed", format_number(s.failed)),
            ("jobs acked", format_number(s.acked)),
            ("notifications sent", format_number(s.notifications_delivered)),
            ("notifications failed", format_number(s.notifications_failed)),
        ];
        for (label, value) in rows {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_long_runs_show_hours() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_661)), "01:01:01");
    }

    #[test]
    fn the_one_where_the_summary_tells_the_truth() {
        let stats = WorkerStats::default();
        stats.record_claimed();
        stats.record_claimed();
        stats.record_succeeded();
        stats.record_acked();
        stats.record_failed();
        stats.record_fanout(&FanoutReport {
            delivered: 1_200,
            undelivered: 0,
            failed: 3,
            skipped: 4,
        });

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                claimed: 2,
                succeeded: 1,
                failed: 1,
                acked: 1,
                notifications_delivered: 1_200,
                notifications_failed: 3,
            }
        );
        let summary = stats.render_summary();
        assert!(summary.contains("jobs claimed"));
        assert!(summary.contains("1,200"));
    }
}
