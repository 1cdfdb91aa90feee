use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use crate::assignments::AssignmentsError;

/// The two hash operations the assignments manager needs from Redis.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// All fields of the hash at `key`. A missing key is an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AssignmentsError>;

    /// Sets `fields` on the hash at `key` and resets its expiry to `ttl`, in one round trip.
    /// Fields not listed keep their current value.
    async fn hset_with_expire(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), AssignmentsError>;
}

pub struct RedisHashStore {
    connection: MultiplexedConnection,
}

impl RedisHashStore {
    /// Connects and pings the server, so an unreachable Redis fails here rather than on the
    /// first request.
    ///
    /// `None` timeouts block indefinitely; `Some(Duration::ZERO)` is rejected by the client.
    pub async fn connect(
        url: &str,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<Self, AssignmentsError> {
        let client = redis::Client::open(url)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let mut connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await?;
        info!("connected to redis assignments store");

        Ok(Self { connection })
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, AssignmentsError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn hset_with_expire(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), AssignmentsError> {
        let mut conn = self.connection.clone();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        redis::pipe()
            .atomic()
            .hset_multiple(key, &fields)
            .ignore()
            .pexpire(key, ttl_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
