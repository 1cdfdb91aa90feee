use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::assignments::scoped::PersistPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

impl EnvMsDuration {
    /// `None` for a zero duration, which disables the timeout it configures.
    pub fn non_zero(&self) -> Option<Duration> {
        (!self.0.is_zero()).then_some(self.0)
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// Where visitor assignments are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    None,
    Memory,
    Local,
    Redis,
    Dynamo,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCacheTypeError(pub String);

impl FromStr for CacheType {
    type Err = ParseCacheTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(CacheType::None),
            "memory" => Ok(CacheType::Memory),
            "local" => Ok(CacheType::Local),
            "redis" => Ok(CacheType::Redis),
            "dynamo" => Ok(CacheType::Dynamo),
            other => Err(ParseCacheTypeError(other.to_string())),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    pub env_id: NonEmptyString,

    pub api_key: NonEmptyString,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    #[envconfig(default = "127.0.0.1:9102")]
    pub metrics_address: SocketAddr,

    #[envconfig(default = "false")]
    pub enable_metrics: FlexBool,

    #[envconfig(default = "60000")]
    pub polling_interval: EnvMsDuration,

    #[envconfig(default = "https://cdn.flagship.io")]
    pub cdn_base_url: String,

    #[envconfig(default = "5000")]
    pub cdn_timeout: EnvMsDuration,

    #[envconfig(default = "https://ariane.abtasty.com")]
    pub tracking_url: String,

    #[envconfig(default = "50")]
    pub hits_batch_size: usize,

    #[envconfig(default = "30000")]
    pub hits_batching_window: EnvMsDuration,

    #[envconfig(default = "2000")]
    pub hits_timeout: EnvMsDuration,

    #[envconfig(default = "3000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(default = "none")]
    pub cache_type: CacheType,

    #[envconfig(nested = true)]
    pub cache: CacheConfig,
}

#[derive(Envconfig, Clone)]
pub struct CacheConfig {
    #[envconfig(from = "CACHE_LOCAL_DB_PATH", default = "cache_data")]
    pub local_db_path: String,

    #[envconfig(from = "CACHE_REDIS_URL", default = "redis://localhost:6379/")]
    pub redis_url: String,

    // 90 days
    #[envconfig(from = "CACHE_REDIS_TTL", default = "7776000000")]
    pub redis_ttl: EnvMsDuration,

    #[envconfig(from = "CACHE_REDIS_RESPONSE_TIMEOUT", default = "1000")]
    pub redis_response_timeout: EnvMsDuration,

    #[envconfig(from = "CACHE_REDIS_CONNECTION_TIMEOUT", default = "5000")]
    pub redis_connection_timeout: EnvMsDuration,

    #[envconfig(from = "CACHE_DYNAMO_TABLE_NAME", default = "visitor-assignments")]
    pub dynamo_table_name: String,

    #[envconfig(from = "CACHE_DYNAMO_PK_SEPARATOR", default = ".")]
    pub dynamo_pk_separator: String,

    #[envconfig(from = "CACHE_DYNAMO_PK_FIELD", default = "id")]
    pub dynamo_pk_field: String,

    #[envconfig(from = "CACHE_DYNAMO_GET_TIMEOUT", default = "1000")]
    pub dynamo_get_timeout: EnvMsDuration,

    // Points the client at a local DynamoDB, mostly for development
    #[envconfig(from = "CACHE_DYNAMO_ENDPOINT")]
    pub dynamo_endpoint: Option<NonEmptyString>,

    #[envconfig(from = "CACHE_PERSIST_ON", default = "all")]
    pub persist_on: PersistPolicy,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            env_id: NonEmptyString("env_id".to_string()),
            api_key: NonEmptyString("api_key".to_string()),
            debug: FlexBool(false),
            metrics_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            enable_metrics: FlexBool(false),
            polling_interval: EnvMsDuration(Duration::from_secs(60)),
            cdn_base_url: "http://localhost:8080".to_string(),
            cdn_timeout: EnvMsDuration(Duration::from_secs(1)),
            tracking_url: "http://localhost:8081".to_string(),
            hits_batch_size: 50,
            hits_batching_window: EnvMsDuration(Duration::from_secs(30)),
            hits_timeout: EnvMsDuration(Duration::from_secs(1)),
            shutdown_timeout: EnvMsDuration(Duration::from_secs(1)),
            cache_type: CacheType::Memory,
            cache: CacheConfig {
                local_db_path: "cache_data".to_string(),
                redis_url: "redis://localhost:6379/".to_string(),
                redis_ttl: EnvMsDuration(Duration::from_secs(90 * 24 * 3600)),
                redis_response_timeout: EnvMsDuration(Duration::from_secs(1)),
                redis_connection_timeout: EnvMsDuration(Duration::from_secs(1)),
                dynamo_table_name: "visitor-assignments".to_string(),
                dynamo_pk_separator: ".".to_string(),
                dynamo_pk_field: "id".to_string(),
                dynamo_get_timeout: EnvMsDuration(Duration::from_secs(1)),
                dynamo_endpoint: None,
                persist_on: PersistPolicy::All,
            },
        }
    }
}
