//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 The queue pours jobs in, the coordinator says where the replay lives, the store
//! swallows the finished record, and the notifier tells the players. Each concern is a
//! trait plus an enum of concrete backends, so the supervisor never has to know
//! whether it's talking to Postgres or a `Vec` behind a mutex.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls → `*Backend` enum → `from_config` resolver
//! - `queue`: `JobQueue` (claim / ack / nack / enqueue) — InMemory, Postgres
//! - `coordinator`: `Coordinator` (match id → cluster + salt) — InMemory, Retriever
//! - `store`: `MatchStore` (insert_match) — InMemory, File, Http
//! - `notifier`: `Notifier` (one message, one account) — Disabled, InMemory, Webhook
//! - Configs are co-located with the backends that read them and re-exported here.
//!
//! 🦆 The duck is here because every file must have one. This is law.

pub(crate) mod coordinator;
pub(crate) mod file;
pub(crate) mod http;
pub(crate) mod in_mem;
pub(crate) mod notifier;
pub(crate) mod postgres;
pub(crate) mod queue;
pub(crate) mod retriever;
pub(crate) mod store;

pub use coordinator::{Coordinator, CoordinatorBackend, CoordinatorConfig, ReplayLocation};
pub use file::{FileStore, FileStoreConfig};
pub use http::{HttpStore, HttpStoreConfig, WebhookNotifier, WebhookNotifierConfig};
pub use in_mem::{
    InMemoryCoordinator, InMemoryCoordinatorConfig, InMemoryNotifier, InMemoryQueue,
    InMemoryQueueConfig, InMemoryStore, StoredCall,
};
pub use notifier::{Notifier, NotifierBackend, NotifierConfig};
pub use postgres::{PostgresQueue, PostgresQueueConfig};
pub use queue::{JobQueue, QueueBackend, QueueConfig};
pub use retriever::{RetrieverConfig, RetrieverCoordinator};
pub use store::{MatchStore, StoreBackend, StoreConfig};
