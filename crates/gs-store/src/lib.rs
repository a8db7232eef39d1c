//! GraphSync Event Store
//!
//! Durable persistence for sync events and webhook deliveries:
//! - SyncEventRepository: the event table, its state machine writes, and the
//!   optimistic lease primitive the scheduler builds on
//! - ConfigProvider: read-only access to sync configurations
//!
//! The only cross-instance coordination mechanism in the system is the
//! conditional status update implemented here (`claim`): a row moves to
//! PROCESSING only if its status still matches what the caller selected.

pub mod config;
pub mod repository;
pub mod sqlite;

pub use config::{ConfigProvider, InMemoryConfigProvider, SqliteConfigProvider};
pub use repository::{
    ClaimCandidate, DeadLetterSnapshot, EventFilter, RequeueOutcome, SyncEventRepository,
};
pub use sqlite::SqliteSyncEventRepository;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid stored source system: {0}")]
    InvalidSource(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
