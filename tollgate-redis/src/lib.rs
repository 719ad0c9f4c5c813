//! Redis backend for `tollgate` (companion crate).
//!
//! Each admission check is one `EVALSHA` of a Lua script that reads, refills,
//! consumes, writes back and re-arms expiry for a single hash key. Redis runs
//! scripts to completion before serving any other command, so concurrent
//! checks for the same identity from any number of processes are serialized.
//!
//! Stored layout per identity: a hash at `userKey:<identity>` with fields
//! `tokens` and `last_time`, expiring after 60 idle seconds.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Script};
use tollgate::distributed::{AtomicBucketStore, EvalRequest, StoreCredentials};
use tollgate::{ConfigError, StoreError};
use tracing::{info, warn};

/// Refill/consume step evaluated inside Redis.
///
/// KEYS[1] bucket key; ARGV: capacity, refill rate (tokens/sec), caller's
/// now (Unix seconds, fractional), idle expiry (whole seconds).
/// Returns 1 when a token was taken, 0 otherwise.
pub const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local bucket = redis.call("HMGET", key, "tokens", "last_time")
local tokens = tonumber(bucket[1]) or capacity
local last_time = tonumber(bucket[2]) or now

local delta = math.max(0, now - last_time)
tokens = math.min(capacity, tokens + delta * rate)
tokens = math.max(0, tokens)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call("HSET", key, "tokens", tokens, "last_time", now)
redis.call("EXPIRE", key, ttl)

return allowed
"#;

/// Bound on establishing the connection and the initial `PING`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while connecting. All are fatal at startup.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not connect to redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("connecting to redis timed out after {0:?}")]
    Timeout(Duration),
}

/// [`AtomicBucketStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisBucketStore {
    conn: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("conn", &"<redis::aio::ConnectionManager>")
            .field("script_hash", &self.script.get_hash())
            .finish()
    }
}

impl RedisBucketStore {
    /// Validate credentials, connect, and `PING`.
    ///
    /// # Errors
    /// [`ConnectError::Config`] if any credential is blank (nothing is dialed),
    /// otherwise a Redis error or timeout from the connection attempt.
    pub async fn connect(credentials: &StoreCredentials) -> Result<Self, ConnectError> {
        Self::connect_with_timeout(credentials, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        credentials: &StoreCredentials,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let client = client_for(credentials)?;

        let conn = tokio::time::timeout(timeout, async {
            let mut conn = ConnectionManager::new(client).await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        })
        .await
        .map_err(|_| ConnectError::Timeout(timeout))?
        .map_err(|e| {
            warn!(target: "tollgate_redis", address = %credentials.address, error = %e, "redis connection failed");
            e
        })?;

        info!(target: "tollgate_redis", address = %credentials.address, "connected to redis");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn, script: Script::new(BUCKET_SCRIPT) }
    }
}

#[async_trait]
impl AtomicBucketStore for RedisBucketStore {
    async fn evaluate(&self, key: &str, request: EvalRequest) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .script
            .key(key)
            .arg(request.limits.capacity())
            .arg(request.limits.refill_rate())
            .arg(request.now)
            .arg(request.idle_ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        decode_reply(reply)
    }
}

/// Validate credentials and build an (unconnected) client with them applied.
///
/// # Errors
/// [`ConnectError::Config`] for a blank field, [`ConnectError::Redis`] for an
/// unparseable address.
pub fn client_for(credentials: &StoreCredentials) -> Result<redis::Client, ConnectError> {
    credentials.validate()?;

    let mut info = redis_url(&credentials.address).into_connection_info()?;
    info.redis.username = Some(credentials.username.clone());
    info.redis.password = Some(credentials.password.clone());
    Ok(redis::Client::open(info)?)
}

fn decode_reply(reply: i64) -> Result<bool, StoreError> {
    match reply {
        1 => Ok(true),
        0 => Ok(false),
        other => Err(StoreError::MalformedReply(format!("expected 0 or 1, got {}", other))),
    }
}

fn redis_url(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("redis://") || address.starts_with("rediss://") {
        address.to_string()
    } else {
        format!("redis://{}", address)
    }
}

/// Read credentials from `REDIS_ADDR`, `REDIS_USERNAME` and `REDIS_PASSWORD`.
///
/// # Errors
/// [`ConfigError::MissingCredential`] if any variable is unset or blank.
pub fn credentials_from_env() -> Result<StoreCredentials, ConfigError> {
    credentials_from_lookup(|name| std::env::var(name).ok())
}

/// Same as [`credentials_from_env`] with a custom variable source.
pub fn credentials_from_lookup<F>(lookup: F) -> Result<StoreCredentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).unwrap_or_default();
    let credentials = StoreCredentials::new(
        read("REDIS_ADDR"),
        read("REDIS_USERNAME"),
        read("REDIS_PASSWORD"),
    );
    credentials.validate()?;
    Ok(credentials)
}
