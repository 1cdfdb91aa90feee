use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics_consts::{ENVIRONMENT_LAST_UPDATE_GAUGE, ENVIRONMENT_POLLS_COUNTER};

use super::bucketing::BucketingResponse;
use super::models::Environment;
use super::{EnvironmentError, EnvironmentLoader};

pub const DEFAULT_BASE_URL: &str = "https://cdn.flagship.io";

/// Shorter intervals, zero included, are raised to this.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CdnLoaderOptions {
    pub base_url: String,
    pub polling_interval: Duration,
    pub timeout: Duration,
}

impl Default for CdnLoaderOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            polling_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct LoaderState {
    environment: Option<Arc<Environment>>,
    last_modified: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOutcome {
    Updated,
    NotModified,
}

impl FetchOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Updated => "updated",
            FetchOutcome::NotModified => "not_modified",
        }
    }
}

/// Everything a fetch needs, cloneable into the polling task.
#[derive(Clone)]
struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    state: Arc<RwLock<LoaderState>>,
}

impl Fetcher {
    async fn fetch(&self, env_id: &str) -> Result<FetchOutcome, EnvironmentError> {
        let result = self.fetch_inner(env_id).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        counter!(ENVIRONMENT_POLLS_COUNTER, "outcome" => outcome).increment(1);
        result
    }

    // The lock is only taken to read the marker and to swap the result in, never across the
    // request itself.
    async fn fetch_inner(&self, env_id: &str) -> Result<FetchOutcome, EnvironmentError> {
        let url = format!(
            "{}/{}/bucketing.json",
            self.base_url.trim_end_matches('/'),
            env_id
        );
        let last_modified = self.state.read().await.last_modified.clone();

        let mut request = self.client.get(&url);
        if let Some(last_modified) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!(env_id, "environment not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if status.is_client_error() || status.is_server_error() {
            error!(env_id, %status, "HTTP error when fetching environment");
            return Err(EnvironmentError::HttpStatus(status));
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        let bucketing: BucketingResponse = serde_json::from_slice(&body)?;
        let environment = Arc::new(bucketing.into_environment(env_id));
        let campaigns = environment.campaigns.len();

        {
            let mut state = self.state.write().await;
            state.environment = Some(environment);
            state.last_modified = last_modified;
        }

        gauge!(ENVIRONMENT_LAST_UPDATE_GAUGE).set(chrono::Utc::now().timestamp() as f64);
        info!(env_id, campaigns, "environment loaded");
        Ok(FetchOutcome::Updated)
    }

    async fn snapshot(&self) -> Option<Arc<Environment>> {
        self.state.read().await.environment.clone()
    }
}

/// Loads `{base_url}/{env_id}/bucketing.json` and refreshes it on a fixed interval.
///
/// Conditional requests use the last `Last-Modified` seen, so an unchanged environment costs a
/// `304`. A failed refresh keeps serving the previous environment.
pub struct CdnLoader {
    fetcher: Fetcher,
    polling_interval: Duration,
    polling: AtomicBool,
    cancel: CancellationToken,
}

impl CdnLoader {
    pub fn new(options: CdnLoaderOptions) -> Result<Self, EnvironmentError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("decision-api/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let polling_interval = options.polling_interval.max(MIN_POLLING_INTERVAL);
        if polling_interval != options.polling_interval {
            warn!(
                requested = ?options.polling_interval,
                using = ?polling_interval,
                "polling interval too short, raising it"
            );
        }

        Ok(Self {
            fetcher: Fetcher {
                client,
                base_url: options.base_url,
                state: Arc::new(RwLock::new(LoaderState::default())),
            },
            polling_interval,
            polling: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    fn spawn_polling(&self, env_id: &str) {
        if self.polling.swap(true, Ordering::SeqCst) {
            warn!(env_id, "environment polling already started");
            return;
        }

        let fetcher = self.fetcher.clone();
        let cancel = self.cancel.clone();
        let period = self.polling_interval;
        let env_id = env_id.to_string();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(%env_id, "environment polling stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = fetcher.fetch(&env_id).await {
                            error!(%env_id, error = %e, "error when fetching environment");
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl EnvironmentLoader for CdnLoader {
    async fn init(&self, env_id: &str, _api_key: &str) -> Result<(), EnvironmentError> {
        info!(env_id, "initializing CDN environment loader");
        let result = self.fetcher.fetch(env_id).await;
        self.spawn_polling(env_id);
        result.map(|_| ())
    }

    async fn load_environment(
        &self,
        env_id: &str,
        _api_key: &str,
    ) -> Result<Environment, EnvironmentError> {
        if let Some(environment) = self.fetcher.snapshot().await {
            return Ok(Environment::clone(&environment));
        }

        self.fetcher.fetch(env_id).await?;
        self.fetcher
            .snapshot()
            .await
            .map(|environment| Environment::clone(&environment))
            .ok_or_else(|| EnvironmentError::NotLoaded(env_id.to_string()))
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CdnLoader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_bucketing_json;
    use httpmock::prelude::*;

    fn loader_for(server: &MockServer, polling_interval: Duration) -> CdnLoader {
        CdnLoader::new(CdnLoaderOptions {
            base_url: server.base_url(),
            polling_interval,
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_init_loads_environment() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200)
                .header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                .json_body(sample_bucketing_json(true));
        });

        let loader = loader_for(&server, Duration::from_secs(60));
        loader.init("env_id", "api_key").await.unwrap();
        mock.assert();

        let env = loader.load_environment("env_id", "api_key").await.unwrap();
        assert!(env.is_panic);
        assert!(env.single_assignment);
        assert_eq!(env.campaigns.len(), 1);
        // served from the snapshot, no second request
        mock.assert_hits(1);

        loader.stop();
        assert!(!loader.is_polling());
    }

    #[tokio::test]
    async fn test_http_error_is_returned_and_nothing_loaded() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(500);
        });

        let loader = loader_for(&server, Duration::from_secs(60));
        let err = loader.init("env_id", "api_key").await.unwrap_err();
        assert!(matches!(
            err,
            EnvironmentError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR)
        ));

        let err = loader
            .load_environment("env_id", "api_key")
            .await
            .unwrap_err();
        assert!(matches!(err, EnvironmentError::HttpStatus(_)));
        loader.stop();
    }

    #[tokio::test]
    async fn test_invalid_body_is_a_parse_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).body("{not json");
        });

        let loader = loader_for(&server, Duration::from_secs(60));
        let err = loader.init("env_id", "api_key").await.unwrap_err();
        assert!(matches!(err, EnvironmentError::Parse(_)));
        loader.stop();
    }

    #[tokio::test]
    async fn test_not_modified_keeps_snapshot() {
        let server = MockServer::start();
        let mut first = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200)
                .header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                .json_body(sample_bucketing_json(true));
        });

        let loader = loader_for(&server, Duration::from_secs(60));
        loader.init("env_id", "api_key").await.unwrap();
        let before = loader.load_environment("env_id", "api_key").await.unwrap();
        first.delete();

        let not_modified = server.mock(|when, then| {
            when.method(GET)
                .path("/env_id/bucketing.json")
                .header("if-modified-since", "Wed, 21 Oct 2015 07:28:00 GMT");
            then.status(304);
        });

        let outcome = loader.fetcher.fetch("env_id").await.unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
        not_modified.assert();

        let after = loader.load_environment("env_id", "api_key").await.unwrap();
        assert_eq!(before, after);
        loader.stop();
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_snapshot() {
        let server = MockServer::start();
        let mut ok = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).json_body(sample_bucketing_json(true));
        });

        let loader = loader_for(&server, Duration::from_secs(60));
        loader.init("env_id", "api_key").await.unwrap();
        ok.delete();

        server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(503);
        });
        assert!(loader.fetcher.fetch("env_id").await.is_err());

        let env = loader.load_environment("env_id", "api_key").await.unwrap();
        assert!(env.is_panic);
        loader.stop();
    }

    #[tokio::test]
    async fn test_poll_picks_up_panic_change() {
        let server = MockServer::start();
        let mut panicking = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).json_body(sample_bucketing_json(true));
        });

        let loader = loader_for(&server, Duration::from_millis(100));
        loader.init("env_id", "api_key").await.unwrap();
        assert!(
            loader
                .load_environment("env_id", "api_key")
                .await
                .unwrap()
                .is_panic
        );

        panicking.delete();
        let calm = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).json_body(sample_bucketing_json(false));
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(calm.hits() >= 1);
        assert!(
            !loader
                .load_environment("env_id", "api_key")
                .await
                .unwrap()
                .is_panic
        );
        loader.stop();
    }

    #[tokio::test]
    async fn test_returned_campaigns_are_isolated() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).json_body(sample_bucketing_json(false));
        });

        let loader = loader_for(&server, Duration::from_secs(60));
        let mut env = loader.load_environment("env_id", "api_key").await.unwrap();
        env.campaigns.clear();
        env.is_panic = true;

        let again = loader.load_environment("env_id", "api_key").await.unwrap();
        assert_eq!(again.campaigns.len(), 1);
        assert!(!again.is_panic);
    }

    #[tokio::test]
    async fn test_zero_interval_keeps_polling() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).json_body(sample_bucketing_json(false));
        });

        let loader = loader_for(&server, Duration::ZERO);
        assert_eq!(loader.polling_interval(), MIN_POLLING_INTERVAL);

        loader.init("env_id", "api_key").await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert!(mock.hits() >= 2);
        assert!(loader.is_polling());
        assert!(loader.load_environment("env_id", "api_key").await.is_ok());
        loader.stop();
    }

    #[tokio::test]
    async fn test_stop_ends_polling() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/env_id/bucketing.json");
            then.status(200).json_body(sample_bucketing_json(false));
        });

        let loader = loader_for(&server, Duration::from_millis(50));
        loader.init("env_id", "api_key").await.unwrap();
        loader.stop();
        assert!(!loader.is_polling());

        let hits_at_stop = mock.hits();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mock.hits(), hits_at_stop);
    }
}
