use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{error, info, instrument};

use crate::metrics_consts::{ASSIGNMENTS_LOADS_COUNTER, ASSIGNMENTS_SAVES_COUNTER};

use super::{
    AssignmentsError, AssignmentsManager, SaveAssignmentsContext, VisitorAssignments,
    VisitorCache,
};

pub mod mock;
pub mod store;

pub use mock::MockHashStore;
pub use store::{HashStore, RedisHashStore};

const BACKEND: &str = "redis";

/// Hash field holding the assignment time, next to the variation group fields.
pub const TIMESTAMP_FIELD: &str = "ts";

// ~3 months, same as the self-hosted default
pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 30 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RedisOptions {
    /// `redis://[user:password@]host:port/db`, or `rediss://` for TLS.
    pub url: String,
    pub ttl: Duration,
    pub response_timeout: Option<Duration>,
    pub connection_timeout: Option<Duration>,
}

/// Assignments stored as one Redis hash per visitor: one field per variation group, holding the
/// JSON `VisitorCache`, plus the `ts` field.
///
/// Saving only sets the fields it was given, so the merge with previously stored groups happens
/// server-side without reading first.
pub struct RedisManager {
    store: Option<Arc<dyn HashStore>>,
    ttl: Duration,
}

impl Default for RedisManager {
    /// A manager that was never connected; every call fails with `NotInitialized`.
    fn default() -> Self {
        Self {
            store: None,
            ttl: DEFAULT_TTL,
        }
    }
}

impl RedisManager {
    pub async fn connect(options: RedisOptions) -> Result<Self, AssignmentsError> {
        info!("connecting to redis assignments store...");
        let store = RedisHashStore::connect(
            &options.url,
            options.response_timeout,
            options.connection_timeout,
        )
        .await
        .map_err(|e| {
            error!("error when connecting to redis server: {}", e);
            e
        })?;

        Ok(Self::with_store(Arc::new(store), options.ttl))
    }

    pub fn with_store(store: Arc<dyn HashStore>, ttl: Duration) -> Self {
        Self {
            store: Some(store),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn store(&self) -> Result<&Arc<dyn HashStore>, AssignmentsError> {
        self.store
            .as_ref()
            .ok_or(AssignmentsError::NotInitialized(BACKEND))
    }

    fn parse_fields(
        fields: HashMap<String, String>,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let mut record = VisitorAssignments::default();
        for (field, value) in fields {
            if field == TIMESTAMP_FIELD {
                record.timestamp = value.parse().map_err(|_| {
                    AssignmentsError::Malformed(format!("timestamp field holds {value:?}"))
                })?;
                continue;
            }
            let cache: VisitorCache = serde_json::from_str(&value)?;
            record.assignments.insert(field, cache);
        }

        Ok(Some(record))
    }
}

#[async_trait]
impl AssignmentsManager for RedisManager {
    fn should_save_assignments(&self, _context: SaveAssignmentsContext) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn load_assignments(
        &self,
        _env_id: &str,
        visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        let result = match self.store() {
            Ok(store) => store
                .hgetall(visitor_id)
                .await
                .and_then(Self::parse_fields),
            Err(e) => Err(e),
        };

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(ASSIGNMENTS_LOADS_COUNTER, "backend" => BACKEND, "outcome" => outcome)
            .increment(1);
        result
    }

    #[instrument(skip(self, assignments))]
    async fn save_assignments(
        &self,
        _env_id: &str,
        visitor_id: &str,
        assignments: HashMap<String, VisitorCache>,
        date: DateTime<Utc>,
    ) -> Result<(), AssignmentsError> {
        let store = self.store()?;

        let mut fields = Vec::with_capacity(assignments.len() + 1);
        for (group_id, cache) in &assignments {
            fields.push((group_id.clone(), serde_json::to_string(cache)?));
        }
        fields.push((
            TIMESTAMP_FIELD.to_string(),
            date.timestamp_millis().to_string(),
        ));

        let result = store.hset_with_expire(visitor_id, fields, self.ttl).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(ASSIGNMENTS_SAVES_COUNTER, "backend" => BACKEND, "outcome" => outcome)
            .increment(1);
        result
    }
}
