use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use redis::{AsyncCommands, ExistenceCheck, RedisResult, SetExpiry, SetOptions};

use super::{ttl_millis, validate_delta, CacheStore, Expiry, SetOp, SetPlan};
use crate::configuration::RedisSettings;
use crate::error::CacheError;

/// Escape glob metacharacters so a prefix only matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn prefix_pattern(prefix: &str) -> String {
    format!("{}*", escape_glob(prefix))
}

/// Redis-backed store over a shared `deadpool-redis` pool.
///
/// Pool checkout and each command are bounded by the configured timeout;
/// exceeding it reports `CacheError::Unavailable`.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool,
    timeout: Duration,
}

impl RedisCacheStore {
    /// Build the pool and check that Redis answers.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, CacheError> {
        let timeout = settings.timeout();
        tracing::info!(url = %settings.url, pool_size = settings.pool_size, "Connecting to Redis");

        let mut config = deadpool_redis::Config::from_url(&settings.url);
        let mut pool_config = PoolConfig::new(settings.pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let store = Self::from_pool(pool, timeout);
        store.ping().await?;
        tracing::info!("Connected to Redis");
        Ok(store)
    }

    pub fn from_pool(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    /// Close the pool. Outstanding and future calls fail with `Unavailable`.
    pub fn close(&self) {
        self.pool.close();
        tracing::info!("Redis pool closed");
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        match tokio::time::timeout(self.timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to get Redis connection");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Timed out waiting for Redis connection");
                Err(CacheError::Unavailable("connection checkout timed out".to_string()))
            }
        }
    }

    /// Collect every key matching `pattern` with incremental `SCAN`, so a large
    /// keyspace never blocks the server the way `KEYS` does.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("SCAN", async {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok::<_, redis::RedisError>(keys)
        })
        .await
    }

    async fn bounded<T, F>(&self, op: &'static str, command: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(op = op, error = %e, "Redis command failed");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(op = op, timeout_ms = self.timeout.as_millis() as u64, "Redis command timed out");
                Err(CacheError::Unavailable(format!("{} timed out", op)))
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let Some(ms) = ttl_millis(ttl) else {
            return Ok(true);
        };
        let mut conn = self.connection().await?;
        self.bounded("PEXPIRE", conn.pexpire(key, ms as i64)).await
    }

    async fn expiry(&self, key: &str) -> Result<Expiry, CacheError> {
        let mut conn = self.connection().await?;
        let pttl: i64 = self.bounded("PTTL", conn.pttl(key)).await?;
        Ok(Expiry::from_pttl(pttl))
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        self.bounded("DEL", conn.del(keys)).await
    }

    async fn keys_with_prefix(&self, prefixes: &[&str]) -> Result<HashSet<String>, CacheError> {
        if prefixes.is_empty() {
            return Ok(self.scan("*").await?.into_iter().collect());
        }

        // SCAN may yield a key more than once; the set absorbs duplicates
        let mut found = HashSet::new();
        for prefix in prefixes {
            found.extend(self.scan(&prefix_pattern(prefix)).await?);
        }
        Ok(found)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("GET", conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match ttl_millis(ttl) {
            Some(ms) => self.bounded("PSETEX", conn.pset_ex(key, value, ms)).await,
            None => self.bounded("SET", conn.set(key, value)).await,
        }
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::XX)
            .with_expiration(SetExpiry::KEEPTTL);
        let mut conn = self.connection().await?;
        let reply: Option<String> = self
            .bounded("SET", conn.set_options(key, value, options))
            .await?;
        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let delta = validate_delta(delta)?;
        let mut conn = self.connection().await?;
        self.bounded("INCRBY", conn.incr(key, delta)).await
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let delta = validate_delta(delta)?;
        let mut conn = self.connection().await?;
        self.bounded("DECRBY", conn.decr(key, delta)).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("HGET", conn.hget(key, field)).await
    }

    async fn hmget(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("HGETALL", conn.hgetall(key)).await
    }

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: usize = self.bounded("HSET", conn.hset(key, field, value)).await?;
        drop(conn);
        self.expire(key, ttl).await?;
        Ok(())
    }

    async fn hmset(
        &self,
        key: &str,
        map: &HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if !map.is_empty() {
            let items: Vec<(&str, &str)> =
                map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let mut conn = self.connection().await?;
            let _: () = self.bounded("HSET", conn.hset_multiple(key, &items)).await?;
        }
        self.expire(key, ttl).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize, CacheError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        self.bounded("HDEL", conn.hdel(key, fields)).await
    }

    async fn has_field(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("HEXISTS", conn.hexists(key, field)).await
    }

    async fn hincrement(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("HINCRBY", conn.hincr(key, field, delta)).await
    }

    async fn hincrement_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("HINCRBYFLOAT", conn.hincr(key, field, delta)).await
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("SMEMBERS", conn.smembers(key)).await
    }

    async fn is_member(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("SISMEMBER", conn.sismember(key, value)).await
    }

    async fn add(&self, key: &str, values: &[&str], ttl: Duration) -> Result<usize, CacheError> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let added: usize = self.bounded("SADD", conn.sadd(key, values)).await?;
        drop(conn);
        self.expire(key, ttl).await?;
        Ok(added)
    }

    async fn remove(&self, key: &str, values: &[&str]) -> Result<usize, CacheError> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        self.bounded("SREM", conn.srem(key, values)).await
    }

    async fn set_size(&self, key: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("SCARD", conn.scard(key)).await
    }

    async fn set_algebra(
        &self,
        op: SetOp,
        key: &str,
        others: &[&str],
    ) -> Result<HashSet<String>, CacheError> {
        let mut keys = vec![key];
        match SetPlan::for_others(others) {
            SetPlan::Members => return self.members(key).await,
            SetPlan::Pairwise(other) => keys.push(other),
            SetPlan::MultiKey(others) => keys.extend_from_slice(others),
        }

        let mut conn = self.connection().await?;
        let command = match op {
            SetOp::Union => conn.sunion::<_, HashSet<String>>(&keys),
            SetOp::Intersect => conn.sinter::<_, HashSet<String>>(&keys),
            SetOp::Difference => conn.sdiff::<_, HashSet<String>>(&keys),
        };
        self.bounded(op.command(), command).await
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("LRANGE", conn.lrange(key, start as isize, end as isize))
            .await
    }

    async fn list_size(&self, key: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("LLEN", conn.llen(key)).await
    }

    async fn index_of(&self, key: &str, index: i64) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("LINDEX", conn.lindex(key, index as isize)).await
    }

    async fn push_right(
        &self,
        key: &str,
        values: &[&str],
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        if values.is_empty() {
            return self.list_size(key).await;
        }
        let mut conn = self.connection().await?;
        let len: usize = self.bounded("RPUSH", conn.rpush(key, values)).await?;
        drop(conn);
        self.expire(key, ttl).await?;
        Ok(len)
    }

    async fn set_at(&self, key: &str, index: i64, value: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("LSET", conn.lset(key, index as isize, value)).await
    }

    async fn remove_n(&self, key: &str, count: i64, value: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("LREM", conn.lrem(key, count as isize, value)).await
    }
}
