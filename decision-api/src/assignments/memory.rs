use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;

use crate::metrics_consts::{ASSIGNMENTS_LOADS_COUNTER, ASSIGNMENTS_SAVES_COUNTER};

use super::{
    visitor_key, AssignmentsError, AssignmentsManager, SaveAssignmentsContext,
    VisitorAssignments, VisitorCache, DEFAULT_KEY_SEPARATOR,
};

/// Process-local assignments, lost on restart. Meant for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryManager {
    cache: Mutex<HashMap<String, VisitorAssignments>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, VisitorAssignments>> {
        // A poisoned map is still a valid map: every write below is a single insert.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AssignmentsManager for MemoryManager {
    fn should_save_assignments(&self, _context: SaveAssignmentsContext) -> bool {
        true
    }

    async fn load_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        let key = visitor_key(env_id, DEFAULT_KEY_SEPARATOR, visitor_id);
        let assignments = self.lock_cache().get(&key).cloned();

        counter!(ASSIGNMENTS_LOADS_COUNTER, "backend" => "memory", "outcome" => "ok").increment(1);
        Ok(assignments)
    }

    async fn save_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
        assignments: HashMap<String, VisitorCache>,
        date: DateTime<Utc>,
    ) -> Result<(), AssignmentsError> {
        let key = visitor_key(env_id, DEFAULT_KEY_SEPARATOR, visitor_id);

        let mut cache = self.lock_cache();
        cache.entry(key).or_default().merge(assignments, date);
        drop(cache);

        counter!(ASSIGNMENTS_SAVES_COUNTER, "backend" => "memory", "outcome" => "ok").increment(1);
        Ok(())
    }
}
