//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where replays pile up faster than anyone can watch them..."
//! 🎬 "One supervisor dared to parse them all." 🦆
//!
//! 📦 The Supervisor — the parse service's front office. Builds the collaborators from
//! config (or takes them ready-made), starts one slot per unit of parallelism, and hands
//! back a [`RunHandle`] to stop and join them.
//!
//! ⚠️ The workers stay private. Like Fight Club, but for async tasks.

mod workers;

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use workers::ParseContext;
use workers::{ParseWorker, SlotSettings, Worker};

use crate::app_config::{AppConfig, RuntimeConfig};
use crate::backends::{CoordinatorBackend, NotifierBackend, QueueBackend, StoreBackend};
use crate::pipeline::TransformPipeline;
use crate::resolver::DataSourceResolver;
use crate::stats::WorkerStats;

/// 📦 The Supervisor: because even async tasks need someone hovering over them.
#[derive(Debug)]
pub struct Supervisor {
    runtime: RuntimeConfig,
    context: Arc<ParseContext>,
    stats: Arc<WorkerStats>,
}

impl Supervisor {
    /// 🏗️ Wire every backend from config. Connection problems surface here, before any slot starts.
    pub async fn from_config(app_config: &AppConfig) -> Result<Self> {
        let runtime = &app_config.runtime;
        let queue = QueueBackend::from_config(&app_config.queue, &runtime.queue_name)
            .await
            .context("💀 The queue backend would not come up")?;
        let coordinator = CoordinatorBackend::from_config(&app_config.coordinator)
            .context("💀 The coordinator backend would not come up")?;
        let pipeline = TransformPipeline::from_config(&app_config.pipeline)
            .context("💀 The parse pipeline would not come up")?;
        let store = StoreBackend::from_config(&app_config.store)
            .await
            .context("💀 The match store would not come up")?;
        let notifier = NotifierBackend::from_config(&app_config.notifier)
            .context("💀 The notifier would not come up")?;

        let resolver = DataSourceResolver::new(
            coordinator,
            runtime.environment,
            app_config.resolver.clone(),
        );
        let context = ParseContext::new(
            queue,
            resolver,
            pipeline,
            store,
            notifier,
            runtime.scenarios_sample_percent,
        );
        Ok(Self::new(runtime.clone(), context))
    }

    pub fn new(runtime: RuntimeConfig, context: ParseContext) -> Self {
        Self {
            runtime,
            context: Arc::new(context),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// 🧵 Unleash the slots. Returns immediately.
    pub fn start(&self) -> RunHandle {
        let shutdown = CancellationToken::new();
        let settings = SlotSettings::from(&self.runtime);
        let slots = self.runtime.parallelism.max(1);

        let handles = (1..=slots)
            .map(|i| {
                let name = format!("parse-worker-{}-{i}", self.runtime.queue_name);
                info!(worker.name = %name, "🚀 starting slot");
                ParseWorker::new(
                    name,
                    Arc::clone(&self.context),
                    Arc::clone(&self.stats),
                    settings,
                    shutdown.clone(),
                )
                .start()
            })
            .collect();

        RunHandle {
            handles,
            shutdown,
            stats: Arc::clone(&self.stats),
        }
    }
}

/// 🎫 Handle to the running slots.
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<Result<()>>>,
    shutdown: CancellationToken,
    stats: Arc<WorkerStats>,
}

impl RunHandle {
    /// 🛑 Ask every slot to stop. A slot finishes the job it's holding first.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// 🔑 A token that stops the run when cancelled, for signal handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// ⏳ Wait for every slot to exit. Panicked or failed slots are logged, not propagated.
    pub async fn wait_for_shutdown(self) -> Arc<WorkerStats> {
        for result in join_all(self.handles).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!("💀 slot exited with an error: {error:#}"),
                Err(error) => warn!(%error, "💀 slot task panicked"),
            }
        }
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::app_config::{Environment, ResolverConfig};
    use crate::backends::{
        InMemoryCoordinator, InMemoryNotifier, InMemoryQueue, InMemoryStore, JobQueue,
        ReplayLocation,
    };
    use crate::common::{Job, NotificationMessage, Origin, Player};
    use crate::pipeline::{InMemoryReducer, PipelineConfig, ReducerBackend};

    /// 🧪 Fake CDN, fake parser, and in-memory everything else.
    struct Harness {
        cdn: MockServer,
        parser: MockServer,
        queue: InMemoryQueue,
        coordinator: InMemoryCoordinator,
        store: InMemoryStore,
        notifier: InMemoryNotifier,
    }

    impl Harness {
        async fn new() -> Self {
            let cdn = MockServer::start().await;
            let parser = MockServer::start().await;
            Self {
                cdn,
                parser,
                queue: InMemoryQueue::new(Duration::from_secs(60), 3),
                coordinator: InMemoryCoordinator::default(),
                store: InMemoryStore::default(),
                notifier: InMemoryNotifier::default(),
            }
        }

        async fn cdn_serves_replays(&self, delay: Duration) {
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(b"PBDEMS2 replay".to_vec())
                        .set_delay(delay),
                )
                .mount(&self.cdn)
                .await;
        }

        async fn parser_answers(&self, status: u16) {
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(status).set_body_string("{\"type\":\"interval\"}\n"),
                )
                .mount(&self.parser)
                .await;
        }

        async fn enqueue(&self, job: Job) -> anyhow::Result<()> {
            self.coordinator.insert(ReplayLocation {
                match_id: job.match_id,
                cluster: 111,
                replay_salt: 1,
            });
            self.queue.enqueue(&job).await?;
            Ok(())
        }

        fn supervisor(&self, parallelism: usize, scenarios_sample_percent: u8) -> Supervisor {
            self.supervisor_in(Environment::Test, parallelism, scenarios_sample_percent)
        }

        /// 🌍 Outside `Test`, canonical `.dem.bz2` urls point at the fake CDN as a mirror.
        fn supervisor_in(
            &self,
            environment: Environment,
            parallelism: usize,
            scenarios_sample_percent: u8,
        ) -> Supervisor {
            let runtime = RuntimeConfig {
                parallelism,
                poll_interval_ms: 10,
                jitter_ms: 5,
                scenarios_sample_percent,
                environment,
                shutdown_when_queue_empty: true,
                ..Default::default()
            };
            let resolver = DataSourceResolver::new(
                CoordinatorBackend::InMemory(self.coordinator.clone()),
                environment,
                ResolverConfig {
                    test_replay_base_url: self.cdn.uri(),
                    replay_mirror_url: Some(self.cdn.uri()),
                },
            );
            let mut canned = serde_json::Map::new();
            canned.insert("kills".into(), json!(10));
            canned.insert("origin".into(), json!("parser-noise"));
            let pipeline = TransformPipeline::from_config(&PipelineConfig {
                parser_host: self.parser.uri(),
                timeout_secs: 10,
                ..Default::default()
            })
            .expect("💀 pipeline should build")
            .with_reducer(ReducerBackend::InMemory(InMemoryReducer::new(canned)));

            Supervisor::new(
                runtime,
                ParseContext::new(
                    QueueBackend::InMemory(self.queue.clone()),
                    resolver,
                    pipeline,
                    StoreBackend::InMemory(self.store.clone()),
                    NotifierBackend::InMemory(self.notifier.clone()),
                    scenarios_sample_percent,
                ),
            )
        }

        /// ⏳ Fanout is detached from the slot, so give it a moment to land.
        async fn wait_for_notifications(&self, expected: usize) -> Vec<(u64, NotificationMessage)> {
            for _ in 0..100 {
                let delivered = self.notifier.delivered().await;
                if delivered.len() >= expected {
                    return delivered;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.notifier.delivered().await
        }
    }

    fn player(account_id: Option<u64>, hero_id: u32, player_slot: u8) -> Player {
        Player::new(account_id, hero_id, player_slot)
    }

    #[tokio::test]
    async fn the_one_where_match_42_goes_all_the_way() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        harness.cdn_serves_replays(Duration::ZERO).await;
        harness.parser_answers(200).await;

        let mut job = Job::new(42);
        job.origin = Origin::Scanner;
        job.start_time = Some(1_700_000_000);
        job.pgroup.insert("0".into(), player(Some(7), 1, 0));
        job.pgroup.insert("128".into(), player(None, 2, 128));
        harness.enqueue(job).await?;

        let stats = harness.supervisor(1, 50).start().wait_for_shutdown().await;

        assert_eq!(harness.queue.acked().await, vec![42]);
        assert!(harness.queue.is_empty().await);

        let calls = harness.store.calls().await;
        assert_eq!(calls.len(), 1);
        let stored = &calls[0];
        assert_eq!(stored.record.get("kills"), Some(&json!(10)));
        assert_eq!(stored.record.get("match_id"), Some(&json!(42)));
        // -- the job's origin beats the parser's
        assert_eq!(stored.record.get("origin"), Some(&json!("scanner")));
        // -- the fixture was fetched, but the record keeps the replay's own address
        assert_eq!(
            stored.record.get("url"),
            Some(&json!(format!("{}/570/42_1.dem", harness.cdn.uri())))
        );
        assert!(stored.options.skip_parse);
        // -- 42 % 100 < 50, and it came from the scanner
        assert!(stored.options.do_scenarios);

        let delivered = harness.wait_for_notifications(1).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, 7);
        assert_eq!(delivered[0].1.title, "Parsed 42");
        assert_eq!(delivered[0].1.payload.start_time, "1700000000");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.acked, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_parser_outage_touches_nothing() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        harness.cdn_serves_replays(Duration::ZERO).await;
        harness.parser_answers(500).await;

        let mut job = Job::new(5);
        job.pgroup.insert("0".into(), player(Some(7), 1, 0));
        harness.enqueue(job).await?;

        let stats = harness.supervisor(1, 100).start().wait_for_shutdown().await;

        assert!(harness.store.calls().await.is_empty(), "nothing persisted");
        assert!(harness.queue.acked().await.is_empty(), "nothing acked");
        assert_eq!(harness.queue.len().await, 1, "the job waits for redelivery");
        assert!(harness.notifier.delivered().await.is_empty(), "nobody notified");
        assert_eq!(stats.snapshot().failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_store_fails_and_the_job_is_not_acked() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        harness.cdn_serves_replays(Duration::ZERO).await;
        harness.parser_answers(200).await;
        harness.store.set_failing(true).await;
        harness.enqueue(Job::new(6)).await?;

        harness.supervisor(1, 0).start().wait_for_shutdown().await;

        assert!(harness.queue.acked().await.is_empty());
        assert_eq!(harness.queue.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_corrupt_bz2_touches_nothing() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        // -- plain bytes where the canonical url promises bzip2
        harness.cdn_serves_replays(Duration::ZERO).await;
        harness.parser_answers(200).await;

        let mut job = Job::new(11);
        job.pgroup.insert("0".into(), player(Some(7), 1, 0));
        harness.enqueue(job).await?;

        let stats = harness
            .supervisor_in(Environment::Production, 1, 0)
            .start()
            .wait_for_shutdown()
            .await;

        assert!(harness.store.calls().await.is_empty(), "nothing persisted");
        assert!(harness.queue.acked().await.is_empty(), "nothing acked");
        assert_eq!(harness.queue.len().await, 1, "the job waits for redelivery");
        assert!(harness.notifier.delivered().await.is_empty(), "nobody notified");
        assert_eq!(stats.snapshot().failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_ack_still_settles_the_delivery() -> anyhow::Result<()> {
        let mut harness = Harness::new().await;
        harness.queue = InMemoryQueue::new(Duration::from_secs(60), 1);
        harness.cdn_serves_replays(Duration::ZERO).await;
        harness.parser_answers(200).await;
        harness.queue.set_failing_acks(true).await;

        let mut job = Job::new(12);
        job.pgroup.insert("0".into(), player(Some(7), 1, 0));
        harness.enqueue(job).await?;

        harness.supervisor(1, 0).start().wait_for_shutdown().await;

        assert_eq!(harness.store.record_count().await, 1, "persisted before the ack");
        assert!(harness.queue.acked().await.is_empty());
        assert_eq!(harness.queue.in_flight().await, 0, "the lease was handed back");
        // -- that was its last attempt, so the entry is gone rather than stuck
        assert_eq!(harness.queue.dropped().await, vec![12]);
        assert!(harness.queue.is_empty().await);
        assert!(harness.notifier.delivered().await.is_empty(), "no ack, no notifications");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unlocated_match_never_reaches_the_cdn() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&harness.cdn)
            .await;
        // -- enqueued straight onto the queue, so the coordinator never heard of it
        harness.queue.enqueue(&Job::new(404)).await?;

        harness.supervisor(1, 0).start().wait_for_shutdown().await;

        assert!(harness.queue.acked().await.is_empty());
        assert!(harness.store.calls().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_one_failing_phone_does_not_unack_the_job() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        harness.cdn_serves_replays(Duration::ZERO).await;
        harness.parser_answers(200).await;
        harness.notifier.fail_for(2).await;

        let mut job = Job::new(9);
        job.pgroup.insert("0".into(), player(Some(1), 1, 0));
        job.pgroup.insert("1".into(), player(Some(2), 2, 1));
        job.pgroup.insert("2".into(), player(Some(3), 3, 2));
        harness.enqueue(job).await?;

        harness.supervisor(1, 0).start().wait_for_shutdown().await;

        assert_eq!(harness.queue.acked().await, vec![9]);
        let mut accounts: Vec<u64> = harness
            .wait_for_notifications(2)
            .await
            .iter()
            .map(|(account, _)| *account)
            .collect();
        accounts.sort_unstable();
        assert_eq!(accounts, vec![1, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_two_slots_never_hold_three_jobs() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        harness.cdn_serves_replays(Duration::from_millis(50)).await;
        harness.parser_answers(200).await;
        for match_id in 1..=8 {
            harness.enqueue(Job::new(match_id)).await?;
        }

        harness.supervisor(2, 0).start().wait_for_shutdown().await;

        let mut acked = harness.queue.acked().await;
        acked.sort_unstable();
        assert_eq!(acked, (1..=8).collect::<Vec<u64>>());
        let peak = harness.queue.peak_in_flight().await;
        assert!((1..=2).contains(&peak), "peak in flight was {peak}");
        assert_eq!(harness.store.record_count().await, 8);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_stop_means_stop() -> anyhow::Result<()> {
        let harness = Harness::new().await;
        let mut supervisor = harness.supervisor(3, 0);
        supervisor.runtime.shutdown_when_queue_empty = false;
        supervisor.runtime.poll_interval_ms = 60_000;

        let handle = supervisor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();

        tokio::time::timeout(Duration::from_secs(5), handle.wait_for_shutdown())
            .await
            .map_err(|_| anyhow::anyhow!("💀 slots ignored the stop request"))?;
        Ok(())
    }
}
