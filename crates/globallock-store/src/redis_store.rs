//! Redis lease store
//!
//! Leases are plain string keys holding the owner token:
//! - acquire: `SET key token NX PX ttl`
//! - extend: compare the token, then `PEXPIRE` (Lua, atomic)
//! - release: compare the token, then `DEL` (Lua, atomic)

use std::time::Duration;

use async_trait::async_trait;
use globallock_common::StoreError;
use redis::Script;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::{debug, info};

use crate::model::{AcquireOutcome, LeaseToken, ReleaseOutcome};
use crate::store::LeaseStore;

/// Prefix applied to every lock key unless configured otherwise
pub const DEFAULT_KEY_PREFIX: &str = "globallock:";

/// Upper bound on connecting and on every request to Redis
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lease store on a single Redis instance
pub struct RedisLeaseStore {
    conn: ConnectionManager,
    key_prefix: String,
    extend_script: Script,
    release_script: Script,
}

impl RedisLeaseStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        Self::connect_with_timeout(url, key_prefix, DEFAULT_RESPONSE_TIMEOUT).await
    }

    /// Connect with a custom bound on connection setup and each request.
    ///
    /// A request exceeding `timeout` fails with `StoreError::Timeout`.
    pub async fn connect_with_timeout(
        url: &str,
        key_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout);
        let conn = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(store_error)?;

        let key_prefix = key_prefix.into();
        info!(
            prefix = %key_prefix,
            timeout_ms = timeout.as_millis() as u64,
            "Connected to redis lease store"
        );

        Ok(Self {
            conn,
            key_prefix,
            extend_script: Script::new(EXTEND_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn store_error(err: redis::RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<AcquireOutcome, StoreError> {
        let token = LeaseToken::generate();
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        match reply {
            Some(_) => {
                debug!(key = %key, "Redis lease acquired");
                Ok(AcquireOutcome::Acquired(token))
            }
            None => Ok(AcquireOutcome::Busy),
        }
    }

    async fn extend(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let extended: i64 = self
            .extend_script
            .key(self.full_key(key))
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        if extended == 1 {
            Ok(())
        } else {
            Err(StoreError::LeaseLost {
                key: key.to_string(),
            })
        }
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> Result<ReleaseOutcome, StoreError> {
        let mut conn = self.conn.clone();

        let deleted: i64 = self
            .release_script
            .key(self.full_key(key))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        if deleted == 1 {
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::AlreadyLost)
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Redis tests need a reachable server; they are skipped unless `TEST_REDIS_URL` is set
    fn redis_url() -> Option<String> {
        std::env::var("TEST_REDIS_URL").ok().filter(|u| !u.is_empty())
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(5)), 5000);
    }

    #[test]
    fn test_timeouts_are_classified() {
        let slow = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "response timed out",
        ));
        assert_eq!(store_error(slow), StoreError::Timeout);

        let refused = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(store_error(refused).kind(), "store_unavailable");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisLeaseStore::connect("not-a-url", DEFAULT_KEY_PREFIX)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[tokio::test]
    async fn test_redis_lease_lifecycle() {
        let Some(url) = redis_url() else {
            eprintln!("TEST_REDIS_URL not set, skipping");
            return;
        };
        let store = RedisLeaseStore::connect(&url, "globallock-test:").await.unwrap();
        let key = format!("lifecycle-{}", uuid::Uuid::new_v4());
        let ttl = Duration::from_secs(5);

        let AcquireOutcome::Acquired(token) = store.acquire(&key, ttl).await.unwrap() else {
            panic!("expected lease to be acquired");
        };
        assert_eq!(store.acquire(&key, ttl).await.unwrap(), AcquireOutcome::Busy);

        store.extend(&key, &token, ttl).await.unwrap();

        let stranger = LeaseToken::generate();
        assert!(store.extend(&key, &stranger, ttl).await.is_err());
        assert_eq!(
            store.release(&key, &stranger).await.unwrap(),
            ReleaseOutcome::AlreadyLost
        );

        assert_eq!(
            store.release(&key, &token).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert!(store.extend(&key, &token, ttl).await.is_err());
    }
}
