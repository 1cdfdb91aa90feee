use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AssignmentsError, AssignmentsManager, SaveAssignmentsContext, VisitorAssignments,
    VisitorCache,
};

/// Used when no cache is configured: nothing is ever stored, so every visitor looks new.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyManager;

#[async_trait]
impl AssignmentsManager for EmptyManager {
    fn should_save_assignments(&self, _context: SaveAssignmentsContext) -> bool {
        true
    }

    async fn load_assignments(
        &self,
        _env_id: &str,
        _visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        Ok(None)
    }

    async fn save_assignments(
        &self,
        _env_id: &str,
        _visitor_id: &str,
        _assignments: HashMap<String, VisitorCache>,
        _date: DateTime<Utc>,
    ) -> Result<(), AssignmentsError> {
        Ok(())
    }
}
