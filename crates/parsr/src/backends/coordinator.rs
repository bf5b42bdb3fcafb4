use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::in_mem::{InMemoryCoordinator, InMemoryCoordinatorConfig};
use crate::backends::retriever::{RetrieverConfig, RetrieverCoordinator};

/// 🗺️ Where a replay lives: the cluster that hosts it and the salt that unlocks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReplayLocation {
    pub match_id: u64,
    pub cluster: u32,
    pub replay_salt: u64,
}

/// 🧭 The coordinator lookup: match id in, replay location out.
///
/// Locations are short-lived, so callers look them up right before fetching
/// and never cache them across attempts.
#[async_trait]
pub trait Coordinator: std::fmt::Debug + Send + Sync {
    async fn lookup(&self, match_id: u64) -> Result<ReplayLocation>;
}

#[derive(Debug, Deserialize, Clone)]
pub enum CoordinatorConfig {
    InMemory(InMemoryCoordinatorConfig),
    Retriever(RetrieverConfig),
}

#[derive(Debug)]
pub enum CoordinatorBackend {
    InMemory(InMemoryCoordinator),
    Retriever(RetrieverCoordinator),
}

impl CoordinatorBackend {
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self> {
        Ok(match config {
            CoordinatorConfig::InMemory(c) => {
                CoordinatorBackend::InMemory(InMemoryCoordinator::from_config(c))
            }
            CoordinatorConfig::Retriever(c) => {
                CoordinatorBackend::Retriever(RetrieverCoordinator::new(c.clone())?)
            }
        })
    }
}

#[async_trait]
impl Coordinator for CoordinatorBackend {
    async fn lookup(&self, match_id: u64) -> Result<ReplayLocation> {
        match self {
            CoordinatorBackend::InMemory(c) => c.lookup(match_id).await,
            CoordinatorBackend::Retriever(c) => c.lookup(match_id).await,
        }
    }
}
