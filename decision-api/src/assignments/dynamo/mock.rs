use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::assignments::AssignmentsError;

use super::store::{AttrValue, Item, ItemStore, ItemUpdate};
use super::EXPIRY_ATTRIBUTE;

#[derive(Debug, Default)]
struct MockState {
    items: HashMap<String, Item>,
    clock_offset_secs: i64,
    get_delay: Duration,
    unavailable: bool,
    updates: Vec<ItemUpdate>,
}

impl MockState {
    fn now_secs(&self) -> i64 {
        Utc::now().timestamp() + self.clock_offset_secs
    }

    fn is_expired(&self, item: &Item) -> bool {
        match item.get(EXPIRY_ATTRIBUTE) {
            Some(AttrValue::N(n)) => n.parse::<i64>().is_ok_and(|expiry| expiry <= self.now_secs()),
            _ => false,
        }
    }
}

/// In-memory stand-in for a DynamoDB table. Applies `SET` update expressions and treats items
/// whose expiry attribute has passed as deleted, like the table's TTL would.
#[derive(Debug, Default)]
pub struct MockItemStore {
    state: Mutex<MockState>,
}

impl MockItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fast_forward(&self, by: Duration) {
        let by_secs = i64::try_from(by.as_secs()).unwrap_or(i64::MAX);
        self.lock_state().clock_offset_secs += by_secs;
    }

    /// Delays every `get_item`, to exercise caller timeouts.
    pub fn set_get_delay(&self, delay: Duration) {
        self.lock_state().get_delay = delay;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock_state().unavailable = unavailable;
    }

    /// Every update received so far, in order.
    pub fn updates(&self) -> Vec<ItemUpdate> {
        self.lock_state().updates.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(state: &MockState) -> Result<(), AssignmentsError> {
        if state.unavailable {
            return Err(AssignmentsError::Dynamo(
                "service unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(item: &mut Item, update: &ItemUpdate) -> Result<(), AssignmentsError> {
        let assignments = update
            .update_expression
            .trim()
            .strip_prefix("SET ")
            .ok_or_else(|| {
                AssignmentsError::Dynamo(format!(
                    "unsupported update expression: {}",
                    update.update_expression
                ))
            })?;

        for assignment in assignments.split(',') {
            let (name, value) = assignment.split_once('=').ok_or_else(|| {
                AssignmentsError::Dynamo(format!("invalid SET clause: {assignment}"))
            })?;
            let (name, value) = (name.trim(), value.trim());

            let attribute = match name.strip_prefix('#') {
                Some(_) => update.names.get(name).cloned().ok_or_else(|| {
                    AssignmentsError::Dynamo(format!("unbound attribute name {name}"))
                })?,
                None => name.to_string(),
            };
            let value = update.values.get(value).cloned().ok_or_else(|| {
                AssignmentsError::Dynamo(format!("unbound attribute value {value}"))
            })?;

            item.insert(attribute, value);
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MockItemStore {
    async fn get_item(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Item>, AssignmentsError> {
        let delay = self.lock_state().get_delay;
        if !delay.is_zero() {
            tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .map_err(|_| AssignmentsError::Timeout)?;
        }

        let state = self.lock_state();
        Self::check_available(&state)?;

        Ok(state
            .items
            .get(key)
            .filter(|item| !state.is_expired(item))
            .cloned())
    }

    async fn update_item(&self, update: ItemUpdate) -> Result<(), AssignmentsError> {
        let mut state = self.lock_state();
        Self::check_available(&state)?;

        // An expired item is gone; the update recreates it from scratch.
        let mut item = state
            .items
            .get(&update.key)
            .filter(|item| !state.is_expired(item))
            .cloned()
            .unwrap_or_default();
        Self::apply(&mut item, &update)?;

        state.items.insert(update.key.clone(), item);
        state.updates.push(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(key: &str, group: &str, value: &str) -> ItemUpdate {
        ItemUpdate {
            key: key.to_string(),
            update_expression: "SET #vg0 = :vg0".to_string(),
            names: HashMap::from([("#vg0".to_string(), group.to_string())]),
            values: HashMap::from([(":vg0".to_string(), AttrValue::S(value.to_string()))]),
        }
    }

    #[tokio::test]
    async fn test_mock_item_store_applies_set() {
        let store = MockItemStore::new();
        store.update_item(update("id", "vg1", "v1")).await.unwrap();
        store.update_item(update("id", "vg2", "v2:1")).await.unwrap();

        let item = store
            .get_item("id", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item["vg1"], AttrValue::S("v1".to_string()));
        assert_eq!(item["vg2"], AttrValue::S("v2:1".to_string()));
        assert_eq!(store.updates().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_item_store_rejects_unbound_placeholder() {
        let store = MockItemStore::new();
        let mut bad = update("id", "vg1", "v1");
        bad.values.clear();

        let err = store.update_item(bad).await.unwrap_err();
        assert!(matches!(err, AssignmentsError::Dynamo(_)));
    }

    #[tokio::test]
    async fn test_mock_item_store_get_delay_times_out() {
        let store = MockItemStore::new();
        store.set_get_delay(Duration::from_millis(200));

        let err = store
            .get_item("id", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentsError::Timeout));
    }
}
