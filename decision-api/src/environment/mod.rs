//! Environment configuration: campaigns and account flags, kept fresh by polling.

use async_trait::async_trait;
use thiserror::Error;

pub mod bucketing;
pub mod cdn;
pub mod mock;
pub mod models;

pub use cdn::{CdnLoader, CdnLoaderOptions};
pub use mock::MockLoader;
pub use models::{Campaign, Environment, Modifications, Variation, VariationGroup};

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("failed to fetch environment: {0}")]
    Http(#[from] reqwest::Error),
    #[error("environment loader HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("failed to parse environment: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment {0} has not been loaded")]
    NotLoaded(String),
    #[error("environment unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EnvironmentLoader: Send + Sync {
    /// Loads the environment once and starts keeping it up to date. The initial load's error is
    /// returned, but background refreshing starts either way.
    async fn init(&self, env_id: &str, api_key: &str) -> Result<(), EnvironmentError>;

    /// The current environment. Callers own the returned value.
    async fn load_environment(
        &self,
        env_id: &str,
        api_key: &str,
    ) -> Result<Environment, EnvironmentError>;

    /// Stops background refreshing. The last loaded environment stays readable.
    fn stop(&self) {}
}
