use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{HitsError, HitsProcessor, TrackingHits};

/// Records every call instead of sending anything.
#[derive(Debug, Default)]
pub struct MockHitsProcessor {
    tracked: Mutex<Vec<TrackingHits>>,
    shutdowns: Mutex<usize>,
}

impl MockHitsProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_hits(&self) -> Vec<TrackingHits> {
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The hits from the latest `track_hits` call.
    pub fn last_tracked(&self) -> Option<TrackingHits> {
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn shutdown_count(&self) -> usize {
        *self.shutdowns.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HitsProcessor for MockHitsProcessor {
    async fn track_hits(&self, hits: TrackingHits) -> Result<(), HitsError> {
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hits);
        Ok(())
    }

    async fn shutdown(&self, _deadline: Duration) -> Result<(), HitsError> {
        *self.shutdowns.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
