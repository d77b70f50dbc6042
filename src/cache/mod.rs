/// Cache Store
///
/// TTL-aware key-value store with scalar, hash, set and list views over one
/// keyspace. `RedisCacheStore` is the production backend; `InMemoryCacheStore`
/// keeps the same semantics inside the process for tests and single-instance runs.

mod memory;
mod redis_store;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

pub use self::memory::InMemoryCacheStore;
pub use self::redis_store::RedisCacheStore;

/// TTL meaning "never expires"
pub const NO_EXPIRY: Duration = Duration::ZERO;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Key does not exist
    Missing,
    /// Key exists without a TTL
    Persistent,
    Remaining(Duration),
}

impl Expiry {
    /// Interpret a Redis `PTTL` reply (`-2` missing, `-1` no TTL).
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -1 => Expiry::Persistent,
            ms if ms >= 0 => Expiry::Remaining(Duration::from_millis(ms as u64)),
            _ => Expiry::Missing,
        }
    }
}

/// Milliseconds to apply for `ttl`, or `None` when the entry should not expire.
///
/// Sub-millisecond TTLs round up so they never turn into "no expiry".
pub(crate) fn ttl_millis(ttl: Duration) -> Option<u64> {
    if ttl.is_zero() {
        None
    } else {
        Some((ttl.as_millis() as u64).max(1))
    }
}

/// Counter deltas must be strictly positive.
pub(crate) fn validate_delta(delta: i64) -> Result<i64, CacheError> {
    if delta <= 0 {
        tracing::error!(delta = delta, "Rejected non-positive counter delta");
        return Err(CacheError::InvalidDelta(delta));
    }
    Ok(delta)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Difference,
}

impl SetOp {
    pub(crate) fn command(&self) -> &'static str {
        match self {
            SetOp::Union => "SUNION",
            SetOp::Intersect => "SINTER",
            SetOp::Difference => "SDIFF",
        }
    }
}

/// How a set operation against `others` is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPlan<'a> {
    /// No other keys: the result is the members of the base key
    Members,
    Pairwise(&'a str),
    MultiKey(&'a [&'a str]),
}

impl<'a> SetPlan<'a> {
    pub fn for_others(others: &'a [&'a str]) -> Self {
        match others {
            [] => SetPlan::Members,
            [other] => SetPlan::Pairwise(*other),
            _ => SetPlan::MultiKey(others),
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    // ---------------------- keys ----------------------

    /// Apply `ttl` to `key`. A zero TTL leaves the key untouched and still succeeds.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn expiry(&self, key: &str) -> Result<Expiry, CacheError>;

    /// Delete keys, returning how many existed. Zero keys is a no-op.
    async fn delete(&self, keys: &[&str]) -> Result<usize, CacheError>;

    /// Keys starting with any of `prefixes`; every key when `prefixes` is empty.
    async fn keys_with_prefix(&self, prefixes: &[&str]) -> Result<HashSet<String>, CacheError>;

    async fn key_count(&self, prefixes: &[&str]) -> Result<usize, CacheError> {
        Ok(self.keys_with_prefix(prefixes).await?.len())
    }

    /// Delete every key matched by `keys_with_prefix`.
    async fn clear(&self, prefixes: &[&str]) -> Result<usize, CacheError> {
        let keys = self.keys_with_prefix(prefixes).await?;
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let removed = self.delete(&keys).await?;
        tracing::debug!(prefixes = ?prefixes, removed = removed, "cache cleared");
        Ok(removed)
    }

    // ---------------------- scalar ----------------------

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`; a zero `ttl` stores it without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Overwrite `value` in one step, keeping the key's remaining TTL.
    /// Returns `false` (and writes nothing) if the key does not exist.
    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError>;

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    // ---------------------- hash ----------------------

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    async fn hmget(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// A positive `ttl` replaces the key's current expiry.
    async fn hset(&self, key: &str, field: &str, value: &str, ttl: Duration)
        -> Result<(), CacheError>;

    async fn hmset(
        &self,
        key: &str,
        map: &HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize, CacheError>;

    async fn has_field(&self, key: &str, field: &str) -> Result<bool, CacheError>;

    /// Add `delta` to `field`, creating it at 0 first. `delta` may be negative.
    async fn hincrement(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError>;

    async fn hdecrement(&self, key: &str, field: &str, by: i64) -> Result<i64, CacheError> {
        self.hincrement(key, field, -by).await
    }

    /// Floating-point form of `hincrement`.
    async fn hincrement_float(&self, key: &str, field: &str, delta: f64)
        -> Result<f64, CacheError>;

    async fn hdecrement_float(&self, key: &str, field: &str, by: f64) -> Result<f64, CacheError> {
        self.hincrement_float(key, field, -by).await
    }

    // ---------------------- set ----------------------

    async fn members(&self, key: &str) -> Result<HashSet<String>, CacheError>;

    async fn is_member(&self, key: &str, value: &str) -> Result<bool, CacheError>;

    /// Returns how many values were newly added.
    async fn add(&self, key: &str, values: &[&str], ttl: Duration) -> Result<usize, CacheError>;

    async fn remove(&self, key: &str, values: &[&str]) -> Result<usize, CacheError>;

    async fn set_size(&self, key: &str) -> Result<usize, CacheError>;

    async fn set_algebra(
        &self,
        op: SetOp,
        key: &str,
        others: &[&str],
    ) -> Result<HashSet<String>, CacheError>;

    async fn union(&self, key: &str, others: &[&str]) -> Result<HashSet<String>, CacheError> {
        self.set_algebra(SetOp::Union, key, others).await
    }

    async fn intersect(&self, key: &str, others: &[&str]) -> Result<HashSet<String>, CacheError> {
        self.set_algebra(SetOp::Intersect, key, others).await
    }

    async fn difference(&self, key: &str, others: &[&str]) -> Result<HashSet<String>, CacheError> {
        self.set_algebra(SetOp::Difference, key, others).await
    }

    // ---------------------- list ----------------------

    /// Inclusive range; negative indices count from the tail (`0, -1` is everything).
    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, CacheError>;

    async fn list_size(&self, key: &str) -> Result<usize, CacheError>;

    async fn index_of(&self, key: &str, index: i64) -> Result<Option<String>, CacheError>;

    /// Append `values`, returning the new length.
    async fn push_right(&self, key: &str, values: &[&str], ttl: Duration)
        -> Result<usize, CacheError>;

    async fn set_at(&self, key: &str, index: i64, value: &str) -> Result<(), CacheError>;

    /// Remove up to `|count|` occurrences of `value`: from the head when
    /// positive, from the tail when negative, all of them when zero.
    async fn remove_n(&self, key: &str, count: i64, value: &str) -> Result<usize, CacheError>;
}
