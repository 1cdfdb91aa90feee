//! Visitor assignment persistence.
//!
//! Every backend implements [`AssignmentsManager`] with the same contract: a missing visitor is
//! `Ok(None)`, never an error, and saving merges new groups into whatever is already stored.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod dynamo;
pub mod empty;
pub mod local;
pub mod memory;
pub mod models;
pub mod redis;
pub mod scoped;

pub use empty::EmptyManager;
pub use local::{LocalManager, LocalOptions};
pub use memory::MemoryManager;
pub use models::{VisitorAssignments, VisitorCache};
pub use scoped::ScopedManager;

pub const DEFAULT_KEY_SEPARATOR: &str = ".";

#[derive(Error, Debug)]
pub enum AssignmentsError {
    #[error("{0} assignments manager not initialized")]
    NotInitialized(&'static str),
    #[error("assignments store did not answer in time")]
    Timeout,
    #[error("failed to (de)serialize assignments: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("local store error: {0}")]
    Local(#[from] rocksdb::Error),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("dynamo error: {0}")]
    Dynamo(String),
    #[error("malformed stored value: {0}")]
    Malformed(String),
    #[error("blocking store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentScope {
    /// Assignment computed while answering a decision request.
    Decision,
    /// Assignment confirmed by an explicit activation call.
    Activation,
}

#[derive(Debug, Clone, Copy)]
pub struct SaveAssignmentsContext {
    pub assignment_scope: AssignmentScope,
}

impl SaveAssignmentsContext {
    pub fn new(assignment_scope: AssignmentScope) -> Self {
        Self { assignment_scope }
    }
}

#[async_trait]
pub trait AssignmentsManager: Send + Sync {
    /// Whether assignments computed in `context` should be persisted at all.
    fn should_save_assignments(&self, context: SaveAssignmentsContext) -> bool;

    async fn load_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError>;

    async fn save_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
        assignments: HashMap<String, VisitorCache>,
        date: DateTime<Utc>,
    ) -> Result<(), AssignmentsError>;
}

pub fn visitor_key(env_id: &str, separator: &str, visitor_id: &str) -> String {
    format!("{env_id}{separator}{visitor_id}")
}
