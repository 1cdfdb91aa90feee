use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::assignments::dynamo::{DynamoItemStore, DynamoManager, DynamoOptions};
use crate::assignments::redis::{RedisManager, RedisOptions};
use crate::assignments::scoped::PersistPolicy;
use crate::assignments::{
    AssignmentsError, AssignmentsManager, EmptyManager, LocalManager, LocalOptions,
    MemoryManager, ScopedManager,
};
use crate::config::{CacheType, Config};
use crate::environment::{CdnLoader, CdnLoaderOptions, EnvironmentError, EnvironmentLoader};
use crate::hits::{DataCollectOptions, DataCollectProcessor, HitsError, HitsProcessor};

#[derive(Error, Debug)]
pub enum ConnectorsError {
    #[error("failed to set up assignments cache: {0}")]
    Assignments(#[from] AssignmentsError),
    #[error("failed to set up environment loader: {0}")]
    Environment(#[from] EnvironmentError),
    #[error("failed to set up hits processor: {0}")]
    Hits(#[from] HitsError),
}

/// The three collaborators a decision needs. They never call each other; whoever builds the
/// bundle decides which implementation backs each one.
#[derive(Clone)]
pub struct Connectors {
    pub environment_loader: Arc<dyn EnvironmentLoader>,
    pub assignments_manager: Arc<dyn AssignmentsManager>,
    pub hits_processor: Arc<dyn HitsProcessor>,
    // Kept concrete so shutdown can release the files
    local_store: Option<Arc<LocalManager>>,
}

impl Connectors {
    pub fn new(
        environment_loader: Arc<dyn EnvironmentLoader>,
        assignments_manager: Arc<dyn AssignmentsManager>,
        hits_processor: Arc<dyn HitsProcessor>,
    ) -> Self {
        Self {
            environment_loader,
            assignments_manager,
            hits_processor,
            local_store: None,
        }
    }

    /// Builds the production connectors. Must run inside a Tokio runtime.
    pub async fn from_config(config: &Config) -> Result<Self, ConnectorsError> {
        let environment_loader = Arc::new(CdnLoader::new(CdnLoaderOptions {
            base_url: config.cdn_base_url.clone(),
            polling_interval: config.polling_interval.0,
            timeout: config.cdn_timeout.0,
        })?);

        let hits_processor = Arc::new(DataCollectProcessor::new(DataCollectOptions {
            tracking_url: config.tracking_url.clone(),
            batch_size: config.hits_batch_size,
            batching_window: config.hits_batching_window.0,
            timeout: config.hits_timeout.0,
        })?);

        let (assignments_manager, local_store) = assignments_manager_from_config(config).await?;

        Ok(Self {
            environment_loader,
            assignments_manager,
            hits_processor,
            local_store,
        })
    }

    pub async fn init(&self, env_id: &str, api_key: &str) -> Result<(), EnvironmentError> {
        self.environment_loader.init(env_id, api_key).await
    }

    /// Stops polling, drains pending hits within `deadline` and closes the local store.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), HitsError> {
        self.environment_loader.stop();
        let result = self.hits_processor.shutdown(deadline).await;
        if let Some(local) = &self.local_store {
            local.close();
        }
        result
    }
}

/// Picks the assignments backend named by `CACHE_TYPE`, wrapped in the persistence policy.
pub async fn assignments_manager_from_config(
    config: &Config,
) -> Result<(Arc<dyn AssignmentsManager>, Option<Arc<LocalManager>>), AssignmentsError> {
    let cache = &config.cache;
    let mut local_store = None;

    let manager: Arc<dyn AssignmentsManager> = match config.cache_type {
        CacheType::None => {
            info!("no assignments cache configured");
            let empty: Arc<dyn AssignmentsManager> = Arc::new(EmptyManager);
            return Ok((empty, None));
        }
        CacheType::Memory => Arc::new(MemoryManager::new()),
        CacheType::Local => {
            let local = Arc::new(LocalManager::open(LocalOptions::new(&cache.local_db_path))?);
            local_store = Some(Arc::clone(&local));
            local
        }
        CacheType::Redis => Arc::new(
            RedisManager::connect(RedisOptions {
                url: cache.redis_url.clone(),
                ttl: cache.redis_ttl.0,
                response_timeout: cache.redis_response_timeout.non_zero(),
                connection_timeout: cache.redis_connection_timeout.non_zero(),
            })
            .await?,
        ),
        CacheType::Dynamo => {
            let store = DynamoItemStore::from_env(
                &cache.dynamo_table_name,
                &cache.dynamo_pk_field,
                cache.dynamo_endpoint.as_ref().map(|e| e.as_str()),
            )
            .await;
            Arc::new(DynamoManager::new(
                Arc::new(store),
                DynamoOptions {
                    pk_separator: cache.dynamo_pk_separator.clone(),
                    get_timeout: cache.dynamo_get_timeout.0,
                },
            ))
        }
    };
    info!(cache_type = ?config.cache_type, "assignments cache ready");

    let manager = match cache.persist_on {
        PersistPolicy::All => manager,
        policy => {
            warn!(?policy, "assignments computed outside of activations won't be persisted");
            Arc::new(ScopedManager::new(manager, policy))
        }
    };

    Ok((manager, local_store))
}
