use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{Coordinator, ReplayLocation};

/// 🧭 Where the retriever service lives and how long we'll wait for it to speak.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrieverConfig {
    /// 📡 Base URL, e.g. `http://retriever.internal:5100`. We GET `{host}/?match_id={id}`.
    pub host: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// 📦 The retriever answers either with the location flat, or tucked under `"match"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RetrieverResponse {
    Nested {
        #[serde(rename = "match")]
        inner: LocationFields,
    },
    Flat(LocationFields),
}

#[derive(Debug, Deserialize)]
struct LocationFields {
    cluster: u32,
    replay_salt: u64,
}

/// 🧭 The coordinator, reached over HTTP.
///
/// One GET per lookup. No caching: salts rotate, and a stale one is a guaranteed 404
/// three steps later with a much worse error message.
#[derive(Debug)]
pub struct RetrieverCoordinator {
    client: reqwest::Client,
    config: RetrieverConfig,
}

impl RetrieverCoordinator {
    pub fn new(config: RetrieverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The retriever's HTTP client refused to be born. TLS, probably. It's always TLS.")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Coordinator for RetrieverCoordinator {
    async fn lookup(&self, match_id: u64) -> Result<ReplayLocation> {
        let url = format!(
            "{}/?match_id={match_id}",
            self.config.host.trim_end_matches('/')
        );
        trace!("📡 asking the retriever where match {match_id} lives");

        let response = self.client.get(&url).send().await.context(format!(
            "💀 The retriever at '{}' did not answer. We asked nicely about match {match_id}.",
            self.config.host
        ))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The retriever answered '{status}' for match {match_id}. It said: '{body}'. Not the location we were hoping for."
            );
        }

        let fields = match response
            .json::<RetrieverResponse>()
            .await
            .context(format!(
                "💀 The retriever's answer for match {match_id} had no cluster or replay_salt in it. Words, but not the right words."
            ))? {
            RetrieverResponse::Nested { inner } => inner,
            RetrieverResponse::Flat(fields) => fields,
        };

        debug!(
            match_id,
            cluster = fields.cluster,
            "🗺️ replay located"
        );
        Ok(ReplayLocation {
            match_id,
            cluster: fields.cluster,
            replay_salt: fields.replay_salt,
        })
    }
}
