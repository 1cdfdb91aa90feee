use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use metrics::counter;
use tracing::{error, info, instrument};

use crate::metrics_consts::{ASSIGNMENTS_LOADS_COUNTER, ASSIGNMENTS_SAVES_COUNTER};

use super::{
    visitor_key, AssignmentsError, AssignmentsManager, SaveAssignmentsContext,
    VisitorAssignments, VisitorCache, DEFAULT_KEY_SEPARATOR,
};

pub mod mock;
pub mod store;

pub use mock::MockItemStore;
pub use store::{AttrValue, DynamoItemStore, Item, ItemStore, ItemUpdate};

const BACKEND: &str = "dynamo";

/// Attribute holding the item's expiry, in epoch seconds. The table's TTL should point at it.
pub const EXPIRY_ATTRIBUTE: &str = "d";

const RETENTION: Months = Months::new(6);
const ACTIVATED_SUFFIX: &str = ":1";

#[derive(Debug, Clone)]
pub struct DynamoOptions {
    pub pk_separator: String,
    pub get_timeout: Duration,
}

impl Default for DynamoOptions {
    fn default() -> Self {
        Self {
            pk_separator: DEFAULT_KEY_SEPARATOR.to_string(),
            get_timeout: Duration::from_secs(1),
        }
    }
}

/// Assignments stored as one wide item per visitor: one string attribute per variation group
/// (`vID`, or `vID:1` once activated) and the expiry attribute.
///
/// A save is a single `UpdateItem` that only sets the attributes it names, so groups stored by
/// earlier saves are kept without a read.
pub struct DynamoManager {
    client: Arc<dyn ItemStore>,
    options: DynamoOptions,
}

impl DynamoManager {
    pub fn new(client: Arc<dyn ItemStore>, options: DynamoOptions) -> Self {
        Self { client, options }
    }

    fn primary_key(&self, env_id: &str, visitor_id: &str) -> String {
        visitor_key(env_id, &self.options.pk_separator, visitor_id)
    }

    fn expiry_for(date: DateTime<Utc>) -> Result<i64, AssignmentsError> {
        date.checked_add_months(RETENTION)
            .map(|expiry| expiry.timestamp())
            .ok_or_else(|| AssignmentsError::Malformed(format!("date out of range: {date}")))
    }

    // The item only keeps the expiry, so the assignment time is recovered by stepping back the
    // retention period. Precision is one second, and dates near a month end may shift by a few
    // days where the target month is shorter.
    fn timestamp_from_expiry(expiry: &str) -> Result<i64, AssignmentsError> {
        let secs: i64 = expiry.parse().map_err(|_| {
            AssignmentsError::Malformed(format!("expiry attribute holds {expiry:?}"))
        })?;

        DateTime::from_timestamp(secs, 0)
            .and_then(|expiry| expiry.checked_sub_months(RETENTION))
            .map(|date| date.timestamp_millis())
            .ok_or_else(|| AssignmentsError::Malformed(format!("expiry out of range: {secs}")))
    }

    fn parse_item(item: Item) -> Result<VisitorAssignments, AssignmentsError> {
        let mut record = VisitorAssignments::default();
        for (name, value) in item {
            if name == EXPIRY_ATTRIBUTE {
                let (AttrValue::N(expiry) | AttrValue::S(expiry)) = value;
                record.timestamp = Self::timestamp_from_expiry(&expiry)?;
                continue;
            }

            match value {
                AttrValue::S(value) => {
                    let cache = match value.strip_suffix(ACTIVATED_SUFFIX) {
                        Some(variation_id) => VisitorCache::new(variation_id, true),
                        None => VisitorCache::new(value, false),
                    };
                    record.assignments.insert(name, cache);
                }
                AttrValue::N(value) => {
                    return Err(AssignmentsError::Malformed(format!(
                        "group {name} holds a number: {value}"
                    )));
                }
            }
        }
        Ok(record)
    }

    /// `SET #d = :d, #vg0 = :vg0, ...` over the group IDs in sorted order. Placeholders are
    /// derived from the position, never from the IDs, so two groups can't share one.
    fn build_update(
        key: String,
        assignments: &HashMap<String, VisitorCache>,
        expiry: i64,
    ) -> ItemUpdate {
        let mut group_ids: Vec<&String> = assignments.keys().collect();
        group_ids.sort();

        let mut clauses = vec!["#d = :d".to_string()];
        let mut names = HashMap::from([("#d".to_string(), EXPIRY_ATTRIBUTE.to_string())]);
        let mut values = HashMap::from([(":d".to_string(), AttrValue::N(expiry.to_string()))]);

        for (n, group_id) in group_ids.into_iter().enumerate() {
            let cache = &assignments[group_id];
            let value = if cache.activated {
                format!("{}{ACTIVATED_SUFFIX}", cache.variation_id)
            } else {
                cache.variation_id.clone()
            };

            clauses.push(format!("#vg{n} = :vg{n}"));
            names.insert(format!("#vg{n}"), group_id.clone());
            values.insert(format!(":vg{n}"), AttrValue::S(value));
        }

        ItemUpdate {
            key,
            update_expression: format!("SET {}", clauses.join(", ")),
            names,
            values,
        }
    }
}

#[async_trait]
impl AssignmentsManager for DynamoManager {
    fn should_save_assignments(&self, _context: SaveAssignmentsContext) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn load_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        let key = self.primary_key(env_id, visitor_id);
        let result = self
            .client
            .get_item(&key, self.options.get_timeout)
            .await
            .and_then(|item| item.map(Self::parse_item).transpose());

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(ASSIGNMENTS_LOADS_COUNTER, "backend" => BACKEND, "outcome" => outcome)
            .increment(1);
        result
    }

    #[instrument(skip(self, assignments))]
    async fn save_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
        assignments: HashMap<String, VisitorCache>,
        date: DateTime<Utc>,
    ) -> Result<(), AssignmentsError> {
        let update = Self::build_update(
            self.primary_key(env_id, visitor_id),
            &assignments,
            Self::expiry_for(date)?,
        );
        let result = self.client.update_item(update).await;

        match &result {
            Ok(()) => info!(visitor_id, "persisted assignments"),
            Err(e) => error!(visitor_id, "error persisting assignments: {}", e),
        }
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(ASSIGNMENTS_SAVES_COUNTER, "backend" => BACKEND, "outcome" => outcome)
            .increment(1);
        result
    }
}
