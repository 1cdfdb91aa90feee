use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The variation a visitor was assigned inside one variation group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VisitorCache {
    #[serde(rename = "vID")]
    pub variation_id: String,
    #[serde(default)]
    pub activated: bool,
}

impl VisitorCache {
    pub fn new(variation_id: impl Into<String>, activated: bool) -> Self {
        Self {
            variation_id: variation_id.into(),
            activated,
        }
    }
}

/// Every sticky assignment known for one visitor of one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VisitorAssignments {
    /// Assignment time, milliseconds since the epoch.
    pub timestamp: i64,
    /// Keyed by variation group ID.
    pub assignments: HashMap<String, VisitorCache>,
}

impl VisitorAssignments {
    pub fn new(timestamp: i64, assignments: HashMap<String, VisitorCache>) -> Self {
        Self {
            timestamp,
            assignments,
        }
    }

    /// Merges `entries` on top of the existing assignments and moves the timestamp to `date`.
    ///
    /// Groups that are not part of `entries` are left untouched, which is what keeps a visitor
    /// sticky on campaign A when they later get evaluated for campaign B.
    pub fn merge(&mut self, entries: HashMap<String, VisitorCache>, date: DateTime<Utc>) {
        self.assignments.extend(entries);
        self.timestamp = date.timestamp_millis();
    }
}
