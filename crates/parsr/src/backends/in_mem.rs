//! 🧠 In-memory backends — the whole distributed system, in one `Vec` behind a mutex.
//!
//! Used by tests, by local batch runs (`[queue.InMemory] jobs_file = "jobs.ndjson"`),
//! and by anyone who wants to watch the worker do its thing without standing up
//! Postgres, a retriever and a push service first.
//!
//! Every backend here is `Clone` and shares its state through an `Arc`, so a test can
//! hand one copy to the supervisor and keep another to look at afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backends::{Coordinator, JobQueue, MatchStore, Notifier, ReplayLocation};
use crate::common::{ClaimedJob, Job, MergedMatchRecord, NotificationMessage, PersistOptions};
use crate::errors::{NotifyError, QueueError, StoreError};

// ============================================================
//  📬 InMemoryQueue
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct InMemoryQueueConfig {
    /// 📄 Optional NDJSON file of jobs to seed the queue with, one job per line.
    #[serde(default)]
    pub jobs_file: Option<String>,
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> i32 {
    3
}

#[derive(Debug)]
struct QueueEntry {
    id: i64,
    job: Job,
    attempts_remaining: i32,
    /// ⏳ `None` = visible now. `Some(t)` = leased until `t`.
    leased_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    entries: Vec<QueueEntry>,
    in_flight: usize,
    peak_in_flight: usize,
    acked: Vec<u64>,
    dropped: Vec<u64>,
    failing_acks: bool,
}

/// 📬 A queue with leases: claim hides a job for `visibility_timeout`, an unacked job
/// comes back after that, and a failed job with no attempts left is dropped.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    visibility_timeout: Duration,
    max_attempts: i32,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration, max_attempts: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            visibility_timeout,
            max_attempts,
        }
    }

    /// 🏗️ Build from config, seeding from `jobs_file` if one is given.
    pub async fn from_config(config: &InMemoryQueueConfig) -> Result<Self> {
        let queue = Self::new(
            Duration::from_secs(config.visibility_timeout_secs),
            config.max_attempts,
        );
        if let Some(ref jobs_file) = config.jobs_file {
            let seeded = queue.seed_from_file(jobs_file).await?;
            debug!("📄 seeded the in-memory queue with {seeded} jobs from '{jobs_file}'");
        }
        Ok(queue)
    }

    async fn seed_from_file(&self, path: &str) -> Result<usize> {
        let jobs = crate::load_jobs_file(std::path::Path::new(path)).await?;
        for job in &jobs {
            self.enqueue(job).await?;
        }
        Ok(jobs.len())
    }

    /// 📊 Jobs still in the queue, visible or leased.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 📊 Match ids acknowledged so far, in ack order.
    pub async fn acked(&self) -> Vec<u64> {
        self.state.lock().await.acked.clone()
    }

    /// 📊 Match ids given up on after running out of attempts.
    pub async fn dropped(&self) -> Vec<u64> {
        self.state.lock().await.dropped.clone()
    }

    /// 📊 Claimed jobs not yet acked or nacked.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }

    /// 💣 Make every ack fail until switched back off. Claims and nacks keep working.
    pub async fn set_failing_acks(&self, failing: bool) {
        self.state.lock().await.failing_acks = failing;
    }

    /// 📊 The most claimed-but-not-yet-settled jobs ever seen at once.
    pub async fn peak_in_flight(&self) -> usize {
        self.state.lock().await.peak_in_flight
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let visibility_timeout = self.visibility_timeout;

        let Some(entry) = state.entries.iter_mut().find(|e| {
            e.attempts_remaining > 0 && e.leased_until.is_none_or(|until| until <= now)
        }) else {
            return Ok(None);
        };

        entry.attempts_remaining -= 1;
        entry.leased_until = Some(now + visibility_timeout);
        let claimed = ClaimedJob {
            receipt: entry.id,
            attempts_remaining: entry.attempts_remaining,
            job: entry.job.clone(),
        };

        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        Ok(Some(claimed))
    }

    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.failing_acks {
            return Err(QueueError::Unavailable("acks are switched off".into()));
        }
        let position = state
            .entries
            .iter()
            .position(|e| e.id == claimed.receipt)
            .ok_or(QueueError::UnknownReceipt(claimed.receipt))?;
        let entry = state.entries.remove(position);
        state.acked.push(entry.job.match_id);
        state.in_flight = state.in_flight.saturating_sub(1);
        Ok(())
    }

    async fn nack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        if claimed.attempts_remaining > 0 {
            // -- stays leased; it comes back when the window lapses
            return Ok(());
        }
        if let Some(position) = state.entries.iter().position(|e| e.id == claimed.receipt) {
            let entry = state.entries.remove(position);
            warn!(
                match_id = entry.job.match_id,
                "🪦 out of attempts, dropping the job from the in-memory queue"
            );
            state.dropped.push(entry.job.match_id);
        }
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push(QueueEntry {
            id,
            job: job.clone(),
            attempts_remaining: self.max_attempts,
            leased_until: None,
        });
        Ok(())
    }
}

// ============================================================
//  🧭 InMemoryCoordinator
// ============================================================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemoryCoordinatorConfig {
    /// 🗺️ The fixed location table, e.g. `locations = [{ match_id = 1, cluster = 111, replay_salt = 2 }]`.
    #[serde(default)]
    pub locations: Vec<ReplayLocation>,
}

/// 🧭 A coordinator that knows a fixed set of matches and shrugs at everything else.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinator {
    locations: Arc<std::sync::RwLock<HashMap<u64, ReplayLocation>>>,
}

impl InMemoryCoordinator {
    pub fn from_config(config: &InMemoryCoordinatorConfig) -> Self {
        let coordinator = Self::default();
        for location in &config.locations {
            coordinator.insert(*location);
        }
        coordinator
    }

    pub fn insert(&self, location: ReplayLocation) {
        // -- a poisoned lock only means a test panicked mid-insert; the map is still fine
        let mut locations = self
            .locations
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locations.insert(location.match_id, location);
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn lookup(&self, match_id: u64) -> Result<ReplayLocation> {
        let locations = self
            .locations
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locations.get(&match_id).copied().with_context(|| {
            format!("💀 The coordinator has never heard of match {match_id}. Not even a rumour.")
        })
    }
}

// ============================================================
//  🗄️ InMemoryStore
// ============================================================

/// 📼 One `insert_match` call, exactly as it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCall {
    pub record: MergedMatchRecord,
    pub options: PersistOptions,
}

#[derive(Debug, Default)]
struct StoreState {
    calls: Vec<StoredCall>,
    by_match: HashMap<u64, MergedMatchRecord>,
    failing: bool,
}

/// 🗄️ Upserts by match id and keeps a log of every call for later inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    /// 💥 Make every following insert fail, until told otherwise.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    pub async fn calls(&self) -> Vec<StoredCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn record(&self, match_id: u64) -> Option<MergedMatchRecord> {
        self.state.lock().await.by_match.get(&match_id).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.by_match.len()
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn insert_match(
        &self,
        record: &MergedMatchRecord,
        options: &PersistOptions,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.failing {
            return Err(StoreError::Rejected {
                status: 503,
                body: "in-memory store is failing on purpose".to_string(),
            });
        }
        state.calls.push(StoredCall {
            record: record.clone(),
            options: *options,
        });
        if let Some(match_id) = record.match_id() {
            state.by_match.insert(match_id, record.clone());
        }
        Ok(())
    }
}

// ============================================================
//  🔔 InMemoryNotifier
// ============================================================

#[derive(Debug, Default)]
struct NotifierState {
    delivered: Vec<(u64, NotificationMessage)>,
    failing_accounts: HashSet<u64>,
}

/// 🔔 Records every delivery. Accounts on the failing list get an error instead.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl InMemoryNotifier {
    pub async fn fail_for(&self, account_id: u64) {
        self.state.lock().await.failing_accounts.insert(account_id);
    }

    pub async fn delivered(&self) -> Vec<(u64, NotificationMessage)> {
        self.state.lock().await.delivered.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(
        &self,
        account_id: u64,
        message: &NotificationMessage,
    ) -> Result<bool, NotifyError> {
        let mut state = self.state.lock().await;
        if state.failing_accounts.contains(&account_id) {
            return Err(NotifyError::Refused {
                account_id,
                reason: "no registered device".to_string(),
            });
        }
        state.delivered.push((account_id, message.clone()));
        Ok(true)
    }
}
