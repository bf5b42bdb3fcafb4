//! 🔗 Turning a match id into somewhere we can download bytes from.
//!
//! Replay locations are ephemeral: the salt in the URL is only handed out by the
//! coordinator, and only for a while. So every attempt asks again, right before the
//! pipeline needs the URL, and nothing is cached between attempts.

use tracing::debug;

use crate::app_config::{Environment, ResolverConfig};
use crate::backends::{Coordinator, CoordinatorBackend};
use crate::common::Job;
use crate::errors::ParseError;

/// 🏗️ The canonical replay URL for a located match.
///
/// Cluster 236 is served from its own host. Test runs fetch uncompressed `.dem` files.
pub fn build_replay_url(
    match_id: u64,
    cluster: u32,
    replay_salt: u64,
    environment: Environment,
) -> String {
    let host = match cluster {
        236 => format!("replay{cluster}.wmsj.cn"),
        _ => format!("replay{cluster}.valve.net"),
    };
    format!("http://{host}/{}", replay_path(match_id, replay_salt, environment))
}

fn replay_path(match_id: u64, replay_salt: u64, environment: Environment) -> String {
    let suffix = match environment {
        Environment::Test => ".dem",
        Environment::Production | Environment::Development => ".dem.bz2",
    };
    format!("570/{match_id}_{replay_salt}{suffix}")
}

#[derive(Debug)]
pub struct DataSourceResolver {
    coordinator: CoordinatorBackend,
    environment: Environment,
    config: ResolverConfig,
}

impl DataSourceResolver {
    pub fn new(
        coordinator: CoordinatorBackend,
        environment: Environment,
        config: ResolverConfig,
    ) -> Self {
        Self {
            coordinator,
            environment,
            config,
        }
    }

    /// 🔗 Look the match up, write its canonical URL onto the job and return the URL
    /// to fetch from.
    ///
    /// The two only differ in `Environment::Test`, which downloads a fixture replay while
    /// the record keeps the real URL. The job is untouched on failure.
    pub async fn resolve(&self, job: &mut Job) -> Result<String, ParseError> {
        let location = self.coordinator.lookup(job.match_id).await.map_err(|source| {
            ParseError::DataSourceUnavailable {
                match_id: job.match_id,
                source: source.into(),
            }
        })?;

        let canonical = match self.config.replay_mirror_url.as_deref() {
            Some(mirror) => format!(
                "{}/{}",
                mirror.trim_end_matches('/'),
                replay_path(location.match_id, location.replay_salt, self.environment)
            ),
            None => build_replay_url(
                location.match_id,
                location.cluster,
                location.replay_salt,
                self.environment,
            ),
        };
        let fetch_url = match self.environment {
            Environment::Test => format!(
                "{}/{}_1.dem",
                self.config.test_replay_base_url.trim_end_matches('/'),
                job.match_id
            ),
            Environment::Production | Environment::Development => canonical.clone(),
        };
        debug!(match_id = job.match_id, url = %canonical, fetch_url = %fetch_url, "🔗 replay url resolved");
        job.url = Some(canonical);
        Ok(fetch_url)
    }
}
