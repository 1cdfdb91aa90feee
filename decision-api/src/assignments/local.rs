use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use rocksdb::{Options, DB};
use tracing::{info, instrument};

use crate::metrics_consts::{ASSIGNMENTS_LOADS_COUNTER, ASSIGNMENTS_SAVES_COUNTER};

use super::{
    visitor_key, AssignmentsError, AssignmentsManager, SaveAssignmentsContext,
    VisitorAssignments, VisitorCache, DEFAULT_KEY_SEPARATOR,
};

const BACKEND: &str = "local";

#[derive(Debug, Clone)]
pub struct LocalOptions {
    // Directory holding the RocksDB files
    pub db_path: PathBuf,
    pub key_separator: String,
}

impl LocalOptions {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            key_separator: DEFAULT_KEY_SEPARATOR.to_string(),
        }
    }
}

/// Assignments persisted in an embedded RocksDB, one JSON blob per visitor.
///
/// RocksDB has no merge for our value shape, so saving is a read-merge-write done under a
/// single lock. The same lock guards the handle itself: once `close` has run, every call fails
/// with `NotInitialized` instead of touching released files.
pub struct LocalManager {
    db: Arc<Mutex<Option<DB>>>,
    key_separator: String,
}

impl LocalManager {
    pub fn open(options: LocalOptions) -> Result<Self, AssignmentsError> {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);

        let db = DB::open(&db_options, &options.db_path)?;
        info!(path = %options.db_path.display(), "opened local assignments store");

        let key_separator = if options.key_separator.is_empty() {
            DEFAULT_KEY_SEPARATOR.to_string()
        } else {
            options.key_separator
        };

        Ok(Self {
            db: Arc::new(Mutex::new(Some(db))),
            key_separator,
        })
    }

    /// Releases the underlying file handles. Safe to call more than once.
    pub fn close(&self) {
        let mut guard = self.db.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            info!("closed local assignments store");
        }
    }

    pub fn is_open(&self) -> bool {
        self.db.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn read_record(db: &DB, key: &str) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        match db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AssignmentsManager for LocalManager {
    fn should_save_assignments(&self, _context: SaveAssignmentsContext) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn load_assignments(
        &self,
        env_id: &str,
        visitor_id: &str,
    ) -> Result<Option<VisitorAssignments>, AssignmentsError> {
        let db = Arc::clone(&self.db);
        let key = visitor_key(env_id, &self.key_separator, visitor_id);

        let result = tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(|e| e.into_inner());
            let db = guard
                .as_ref()
                .ok_or(AssignmentsError::NotInitialized(BACKEND))?;
            Self::read_record(db, &key)
        })
        .await?;

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
        let db = Arc::clone(&self.db);
        let key = visitor_key(env_id, &self.key_separator, visitor_id);

        let result: Result<(), AssignmentsError> = tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(|e| e.into_inner());
            let db = guard
                .as_ref()
                .ok_or(AssignmentsError::NotInitialized(BACKEND))?;

            let mut record = Self::read_record(db, &key)?.unwrap_or_default();
            record.merge(assignments, date);

            let value = serde_json::to_vec(&record)?;
            db.put(key.as_bytes(), value)?;
            Ok(())
        })
        .await?;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(ASSIGNMENTS_SAVES_COUNTER, "backend" => BACKEND, "outcome" => outcome)
            .increment(1);
        result
    }
}

impl Drop for LocalManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_manager(dir: &TempDir) -> LocalManager {
        LocalManager::open(LocalOptions::new(dir.path().join("assignments")))
            .expect("failed to open local store")
    }

    #[tokio::test]
    async fn test_local_load_missing_visitor() {
        let dir = TempDir::new().unwrap();
        let manager = open_manager(&dir);

        let loaded = manager.load_assignments("env_id", "visID").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_local_save_merges() {
        let dir = TempDir::new().unwrap();
        let manager = open_manager(&dir);
        let t0 = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let t1 = Utc.timestamp_millis_opt(1_700_000_001_000).unwrap();

        manager
            .save_assignments(
                "env_id",
                "visID",
                HashMap::from([("vgID".to_string(), VisitorCache::new("vID", false))]),
                t0,
            )
            .await
            .unwrap();

        let loaded = manager
            .load_assignments("env_id", "visID")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.assignments["vgID"], VisitorCache::new("vID", false));

        manager
            .save_assignments(
                "env_id",
                "visID",
                HashMap::from([("vgID2".to_string(), VisitorCache::new("vID2", true))]),
                t1,
            )
            .await
            .unwrap();

        let loaded = manager
            .load_assignments("env_id", "visID")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.timestamp, t1.timestamp_millis());
        assert_eq!(loaded.assignments["vgID"], VisitorCache::new("vID", false));
        assert_eq!(loaded.assignments["vgID2"], VisitorCache::new("vID2", true));
    }

    #[tokio::test]
    async fn test_local_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let manager = open_manager(&dir);
            manager
                .save_assignments(
                    "env_id",
                    "visID",
                    HashMap::from([("vgID".to_string(), VisitorCache::new("vID", true))]),
                    Utc::now(),
                )
                .await
                .unwrap();
            manager.close();
        }

        let manager = open_manager(&dir);
        let loaded = manager
            .load_assignments("env_id", "visID")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.assignments["vgID"], VisitorCache::new("vID", true));
    }

    #[tokio::test]
    async fn test_local_not_initialized_after_close() {
        let dir = TempDir::new().unwrap();
        let manager = open_manager(&dir);
        manager.close();
        assert!(!manager.is_open());

        let err = manager
            .load_assignments("env_id", "visID")
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentsError::NotInitialized("local")));

        let err = manager
            .save_assignments("env_id", "visID", HashMap::new(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "local assignments manager not initialized");
    }

    #[tokio::test]
    async fn test_local_corrupted_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        let manager = open_manager(&dir);
        {
            let guard = manager.db.lock().unwrap();
            guard
                .as_ref()
                .unwrap()
                .put("env_id.visID".as_bytes(), b"not json")
                .unwrap();
        }

        let err = manager
            .load_assignments("env_id", "visID")
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentsError::Serialization(_)));
    }
}
