use async_trait::async_trait;

use super::models::Environment;
use super::{EnvironmentError, EnvironmentLoader};

/// Serves a fixed environment, or always fails with the configured message.
#[derive(Debug, Clone, Default)]
pub struct MockLoader {
    environment: Option<Environment>,
    error: Option<String>,
}

impl MockLoader {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment: Some(environment),
            error: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            environment: None,
            error: Some(message.into()),
        }
    }
}

#[async_trait]
impl EnvironmentLoader for MockLoader {
    async fn init(&self, _env_id: &str, _api_key: &str) -> Result<(), EnvironmentError> {
        Ok(())
    }

    async fn load_environment(
        &self,
        env_id: &str,
        _api_key: &str,
    ) -> Result<Environment, EnvironmentError> {
        if let Some(message) = &self.error {
            return Err(EnvironmentError::Unavailable(message.clone()));
        }
        self.environment
            .clone()
            .ok_or_else(|| EnvironmentError::NotLoaded(env_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_environment;

    #[tokio::test]
    async fn test_mock_loader_returns_environment() {
        let loader = MockLoader::new(sample_environment("env_id"));
        loader.init("env_id", "api_key").await.unwrap();

        let env = loader.load_environment("env_id", "api_key").await.unwrap();
        assert_eq!(env.id, "env_id");
    }

    #[tokio::test]
    async fn test_mock_loader_error() {
        let loader = MockLoader::failing("boom");
        let err = loader
            .load_environment("env_id", "api_key")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "environment unavailable: boom");

        let empty = MockLoader::default();
        assert!(matches!(
            empty.load_environment("env_id", "api_key").await,
            Err(EnvironmentError::NotLoaded(_))
        ));
    }
}
