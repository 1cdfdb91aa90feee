use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AssignmentScope, AssignmentsError, AssignmentsManager, SaveAssignmentsContext,
    VisitorAssignments, VisitorCache,
};

/// Which assignment scopes get persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistPolicy {
    #[default]
    All,
    ActivationOnly,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsePersistPolicyError(String);

impl std::fmt::Display for ParsePersistPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid persist policy: {}", self.0)
    }
}

impl std::error::Error for ParsePersistPolicyError {}

impl FromStr for PersistPolicy {
    type Err = ParsePersistPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "" => Ok(PersistPolicy::All),
            "activation" => Ok(PersistPolicy::ActivationOnly),
            other => Err(ParsePersistPolicyError(other.to_string())),
        }
    }
}

/// Wraps a backend to skip persistence for some scopes without touching call sites.
/// Loads and saves are forwarded unchanged.
pub struct ScopedManager {
    inner: Arc<dyn AssignmentsManager>,
    policy: PersistPolicy,
}

impl ScopedManager {
    pub fn new(inner: Arc<dyn AssignmentsManager>, policy: PersistPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl AssignmentsManager for ScopedManager {
    fn should_save_assignments(&self, context: SaveAssignmentsContext) -> bool {
        let allowed = match (self.policy, context.assignment_scope) {
            (PersistPolicy::All, _) => true,
            (PersistPolicy::ActivationOnly, AssignmentScope::Activation) => true,
            (PersistPolicy::ActivationOnly, AssignmentScope::Decision) => false,
        };
        allowed && self.inner.should_save_assignments(context)
    }

    async fn load_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        self.inner.load_assignments(env_id, visitor_id).await
    }

    async fn save_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
        assignments: HashMap<String, VisitorCache>,
        date: DateTime<Utc>,
    ) -> Result<(), AssignmentsError> {
        self.inner
            .save_assignments(env_id, visitor_id, assignments, date)
            .await
    }
}
