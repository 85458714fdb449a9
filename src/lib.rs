// src/lib.rs
// Public library surface for the `ainews` binary and integration tests.

pub mod config;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod staging;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod transform;

// ---- Re-exports for stable public API ----
pub use crate::config::AppConfig;
pub use crate::model::{article_id, CleanedArticle, RawCapture};
pub use crate::persist::{DedupIndex, PersistenceGateway};
pub use crate::pipeline::{CleanerContext, CleanerSummary};
pub use crate::staging::StagingStore;
pub use crate::store::{ArticleStore, MemoryStore, SqliteStore};
pub use crate::supervisor::Supervisor;
pub use crate::transform::client::{ScriptedClient, ServiceError, TextGenClient};
pub use crate::transform::TransformWorker;
