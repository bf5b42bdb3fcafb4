//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment: `PARSR_*` env vars first, an optional TOML file on top.
//! Nested keys use a double underscore: `PARSR_RUNTIME__PARALLELISM=8`.
//!
//! 🧠 Knowledge graph:
//! - `RuntimeConfig` — how the workers behave (slots, polling, sampling, environment)
//! - `ResolverConfig` — where test runs fetch their replays from
//! - `PipelineConfig` — parser endpoint, deadline, output bound, reducer choice
//! - Backend configs (`QueueConfig`, `CoordinatorConfig`, `StoreConfig`, `NotifierConfig`)
//!   live next to the backends that read them.

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub use crate::backends::{CoordinatorConfig, NotifierConfig, QueueConfig, StoreConfig};
pub use crate::pipeline::{PipelineConfig, ReducerConfig};

/// 📦 The AppConfig: one struct to rule them all.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub queue: QueueConfig,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// 🌍 Which world we're running in. `Test` swaps real replay URLs for fixtures.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Development,
    Test,
}

/// 🧵 Worker knobs. Every one of them has a default, because nobody reads docs at 3am.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 🧵 Parallel slots. Defaults to the number of cores.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// 🎲 0–100. Share of scanner jobs that also get scenarios generated.
    #[serde(default)]
    pub scenarios_sample_percent: u8,
    #[serde(default)]
    pub environment: Environment,
    /// 🏁 Exit each slot once a claim comes back empty. Handy for batch runs.
    #[serde(default)]
    pub shutdown_when_queue_empty: bool,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn default_queue_name() -> String {
    "parse".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_jitter_ms() -> u64 {
    100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            queue_name: default_queue_name(),
            poll_interval_ms: default_poll_interval_ms(),
            jitter_ms: default_jitter_ms(),
            scenarios_sample_percent: 0,
            environment: Environment::default(),
            shutdown_when_queue_empty: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// 🧪 In `Environment::Test`, replays come from `{base}/{match_id}_1.dem`.
    #[serde(default = "default_test_replay_base_url")]
    pub test_replay_base_url: String,
    /// 🪞 Serve canonical replays from this base URL instead of the cluster hosts,
    /// e.g. a local mirror. The `570/{match_id}_{salt}.dem.bz2` path is kept.
    #[serde(default)]
    pub replay_mirror_url: Option<String>,
}

fn default_test_replay_base_url() -> String {
    "https://cdn.rawgit.com/odota/testfiles/master".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            test_replay_base_url: default_test_replay_base_url(),
            replay_mirror_url: None,
        }
    }
}

/// 🚀 Load the config — env vars (`PARSR_*`) as the base, TOML file merged on top if given.
///
/// 📐 `None` means env vars only. No file, no assumptions.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("PARSR_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (PARSR_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (PARSR_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
