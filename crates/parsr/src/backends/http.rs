//! 📡 HTTP backends: the match store API and the push webhook.
//!
//! Both are thin. Build a request, send it, look at the status code, move on.
//! No retries in here: a failed insert fails the job and the queue redelivers it,
//! a failed notification is logged by the fanout and forgotten.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::backends::{MatchStore, Notifier};
use crate::common::{MergedMatchRecord, NotificationMessage, PersistOptions};
use crate::errors::{NotifyError, StoreError};

fn default_timeout_secs() -> u64 {
    30
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("💀 The HTTP client refused to be born. The TLS stack wept. We tried to build a reqwest::Client and the universe said 'no'.")
}

// ============================================================
//  🗄️ HttpStore
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct HttpStoreConfig {
    /// 📡 Full URL of the insert endpoint. The record is POSTed here as JSON.
    pub url: String,
    /// 🔒 API key wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// 📦 What goes over the wire: the record and its options, side by side.
#[derive(Debug, Serialize)]
pub(crate) struct InsertRequest<'a> {
    #[serde(rename = "match")]
    pub(crate) record: &'a MergedMatchRecord,
    pub(crate) options: &'a PersistOptions,
}

#[derive(Debug)]
pub struct HttpStore {
    client: reqwest::Client,
    config: HttpStoreConfig,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl MatchStore for HttpStore {
    async fn insert_match(
        &self,
        record: &MergedMatchRecord,
        options: &PersistOptions,
    ) -> Result<(), StoreError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&InsertRequest { record, options });

        // -- 🔒 api_key beats basic auth in this club
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("ApiKey {api_key}"));
        } else if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        trace!(
            match_id = record.match_id(),
            "✅ the store took the record"
        );
        Ok(())
    }
}

// ============================================================
//  🔔 WebhookNotifier
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookNotifierConfig {
    /// 📡 Push gateway endpoint. One POST per account.
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    account_id: u64,
    #[serde(flatten)]
    message: &'a NotificationMessage,
}

#[derive(Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookNotifierConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookNotifierConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        account_id: u64,
        message: &NotificationMessage,
    ) -> Result<bool, NotifyError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&PushRequest {
                account_id,
                message,
            });
        if let Some(ref token) = self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        // -- 404: the account has no registered device. Nobody to tell, nothing wrong.
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Job, PersistKind, Player};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> PersistOptions {
        PersistOptions {
            kind: PersistKind::Parsed,
            skip_parse: true,
            do_log_parse: true,
            do_scenarios: false,
        }
    }

    #[tokio::test]
    async fn the_one_where_the_store_receives_match_and_options() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/matches"))
            .and(header("Authorization", "ApiKey sekrit"))
            .and(body_partial_json(serde_json::json!({
                "match": { "match_id": 42, "kills": 10 },
                "options": { "type": "parsed", "skipParse": true, "doLogParse": true, "doScenarios": false }
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpStore::new(HttpStoreConfig {
            url: format!("{}/matches", server.uri()),
            api_key: Some("sekrit".into()),
            username: None,
            password: None,
            timeout_secs: 5,
        })?;
        let mut aggregate = serde_json::Map::new();
        aggregate.insert("kills".into(), 10.into());
        let record = crate::merger::merge(aggregate, &Job::new(42))?;

        store.insert_match(&record, &options()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_store_says_no() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&server)
            .await;

        let store = HttpStore::new(HttpStoreConfig {
            url: server.uri(),
            api_key: None,
            username: None,
            password: None,
            timeout_secs: 5,
        })?;
        let record = crate::merger::merge(Default::default(), &Job::new(1))?;

        let err = store
            .insert_match(&record, &options())
            .await
            .expect_err("💀 a 500 should be a rejection");
        assert!(matches!(
            err,
            StoreError::Rejected { status: 500, ref body } if body == "disk full"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_webhook_gets_the_message_and_the_token() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer push-token"))
            .and(body_partial_json(serde_json::json!({
                "account_id": 77,
                "title": "Parsed 42",
                "payload": { "match_id": "42", "hero_id": "5" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(WebhookNotifierConfig {
            url: server.uri(),
            bearer_token: Some("push-token".into()),
            timeout_secs: 5,
        })?;
        let player = Player::new(Some(77), 5, 0);
        let message = NotificationMessage::parsed(&Job::new(42), &player);

        assert!(notifier.notify(77, &message).await?);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_has_a_device() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(WebhookNotifierConfig {
            url: server.uri(),
            bearer_token: None,
            timeout_secs: 5,
        })?;
        let message = NotificationMessage::parsed(&Job::new(1), &Player::default());
        assert!(!notifier.notify(1, &message).await?);
        Ok(())
    }
}
