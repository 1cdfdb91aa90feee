use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::assignments::AssignmentsError;

use super::store::HashStore;

#[derive(Debug, Default)]
struct MockHash {
    fields: HashMap<String, String>,
    expires_at_ms: Option<i64>,
}

#[derive(Debug, Default)]
struct MockState {
    hashes: HashMap<String, MockHash>,
    clock_offset_ms: i64,
    unavailable: bool,
}

impl MockState {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.clock_offset_ms
    }

    fn evict_expired(&mut self) {
        let now = self.now_ms();
        self.hashes
            .retain(|_, hash| hash.expires_at_ms.map_or(true, |expires| expires > now));
    }
}

/// In-memory stand-in for Redis hashes, with key expiry driven by a clock tests can move.
#[derive(Debug, Default)]
pub struct MockHashStore {
    state: Mutex<MockState>,
}

impl MockHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the store's clock forward; keys whose TTL elapsed disappear.
    pub fn fast_forward(&self, by: Duration) {
        let by_ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.lock_state().clock_offset_ms += by_ms;
    }

    /// Makes every subsequent call fail like an unreachable server would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock_state().unavailable = unavailable;
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.lock_state();
        state.evict_expired();
        let now = state.now_ms();
        state
            .hashes
            .get(key)
            .and_then(|hash| hash.expires_at_ms)
            .map(|expires| Duration::from_millis(u64::try_from(expires - now).unwrap_or(0)))
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(state: &MockState) -> Result<(), AssignmentsError> {
        if state.unavailable {
            return Err(AssignmentsError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl HashStore for MockHashStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AssignmentsError> {
        let mut state = self.lock_state();
        Self::check_available(&state)?;
        state.evict_expired();

        Ok(state
            .hashes
            .get(key)
            .map(|hash| hash.fields.clone())
            .unwrap_or_default())
    }

    async fn hset_with_expire(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), AssignmentsError> {
        let mut state = self.lock_state();
        Self::check_available(&state)?;
        state.evict_expired();

        let expires_at_ms = state.now_ms() + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let hash = state.hashes.entry(key.to_string()).or_default();
        hash.fields.extend(fields);
        hash.expires_at_ms = Some(expires_at_ms);
        Ok(())
    }
}
