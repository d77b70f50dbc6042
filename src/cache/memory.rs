use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ttl_millis, validate_delta, CacheStore, Expiry, SetOp, SetPlan};
use crate::error::CacheError;

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(Vec<String>),
}

impl Value {
    /// Collections that became empty disappear, as they do in Redis.
    fn is_drained(&self) -> bool {
        match self {
            Value::Scalar(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::List(list) => list.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map_or(false, |deadline| Instant::now() >= deadline)
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    ttl_millis(ttl).map(|ms| Instant::now() + Duration::from_millis(ms))
}

fn parse_counter(raw: &str) -> Result<i64, CacheError> {
    raw.parse::<i64>()
        .map_err(|_| CacheError::Command("value is not an integer".to_string()))
}

fn parse_float(raw: &str) -> Result<f64, CacheError> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CacheError::Command("value is not a valid float".to_string()))
}

fn checked_add(current: i64, delta: i64) -> Result<i64, CacheError> {
    current
        .checked_add(delta)
        .ok_or_else(|| CacheError::Command("increment would overflow".to_string()))
}

/// Resolve a Redis-style inclusive range against a list of `len` items.
fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Process-local store backed by `DashMap`.
///
/// Expired entries are evicted lazily when touched.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| entry.is_expired());
    }

    fn read<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Value) -> Result<T, CacheError>,
    ) -> Result<Option<T>, CacheError> {
        self.purge(key);
        match self.entries.get(key) {
            Some(entry) => f(&entry.value).map(Some),
            None => Ok(None),
        }
    }

    fn write<T>(
        &self,
        key: &str,
        empty: fn() -> Value,
        f: impl FnOnce(&mut Value) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        self.purge(key);
        let (result, drained) = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: empty(),
                expires_at: None,
            });
            let result = f(&mut entry.value);
            (result, entry.value.is_drained())
        };
        // Re-checked under the shard lock: a concurrent write may have refilled it
        if drained {
            self.entries.remove_if(key, |_, entry| entry.value.is_drained());
        }
        result
    }

    fn touch_ttl(&self, key: &str, ttl: Duration) {
        if let Some(at) = deadline(ttl) {
            if let Some(mut entry) = self.entries.get_mut(key) {
                entry.expires_at = Some(at);
            }
        }
    }

    fn load_set(&self, key: &str) -> Result<HashSet<String>, CacheError> {
        self.read(key, |value| match value {
            Value::Set(set) => Ok(set.clone()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(Option::unwrap_or_default)
    }

    fn adjust_counter(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.write(
            key,
            || Value::Scalar("0".to_string()),
            |value| match value {
                Value::Scalar(raw) => {
                    let next = checked_add(parse_counter(raw)?, delta)?;
                    *raw = next.to_string();
                    Ok(next)
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let Some(at) = deadline(ttl) else {
            return Ok(true);
        };
        self.purge(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expiry(&self, key: &str) -> Result<Expiry, CacheError> {
        self.purge(key);
        Ok(match self.entries.get(key) {
            None => Expiry::Missing,
            Some(entry) => match entry.expires_at {
                None => Expiry::Persistent,
                Some(at) => Expiry::Remaining(at.saturating_duration_since(Instant::now())),
            },
        })
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys {
            self.purge(key);
            if self.entries.remove(*key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefixes: &[&str]) -> Result<HashSet<String>, CacheError> {
        self.entries.retain(|_, entry| !entry.is_expired());
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| prefixes.is_empty() || prefixes.iter().any(|p| key.starts_with(p)))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.read(key, |value| match value {
            Value::Scalar(raw) => Ok(raw.clone()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        self.purge(key);
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.value = Value::Scalar(value.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let delta = validate_delta(delta)?;
        self.adjust_counter(key, delta)
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let delta = validate_delta(delta)?;
        self.adjust_counter(key, -delta)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.read(key, |value| match value {
            Value::Hash(map) => Ok(map.get(field).cloned()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(Option::flatten)
    }

    async fn hmget(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.read(key, |value| match value {
            Value::Hash(map) => Ok(map.clone()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(Option::unwrap_or_default)
    }

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(map) => {
                    map.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )?;
        self.touch_ttl(key, ttl);
        Ok(())
    }

    async fn hmset(
        &self,
        key: &str,
        map: &HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(existing) => {
                    existing.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(())
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )?;
        self.touch_ttl(key, ttl);
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize, CacheError> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(map) => Ok(fields
                    .iter()
                    .filter(|field| map.remove(**field).is_some())
                    .count()),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    async fn has_field(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        self.read(key, |value| match value {
            Value::Hash(map) => Ok(map.contains_key(field)),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(|found| found.unwrap_or(false))
    }

    async fn hincrement(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(map) => {
                    let slot = map.entry(field.to_string()).or_insert_with(|| "0".to_string());
                    let next = checked_add(parse_counter(slot)?, delta)?;
                    *slot = next.to_string();
                    Ok(next)
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    async fn hincrement_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, CacheError> {
        if !delta.is_finite() {
            return Err(CacheError::Command("increment is not a valid float".to_string()));
        }
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |current| match current {
                Value::Hash(map) => {
                    let slot = map.entry(field.to_string()).or_insert_with(|| "0".to_string());
                    let next = parse_float(slot)? + delta;
                    if !next.is_finite() {
                        return Err(CacheError::Command(
                            "increment would produce NaN or Infinity".to_string(),
                        ));
                    }
                    *slot = next.to_string();
                    Ok(next)
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, CacheError> {
        self.load_set(key)
    }

    async fn is_member(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        self.read(key, |current| match current {
            Value::Set(set) => Ok(set.contains(value)),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(|found| found.unwrap_or(false))
    }

    async fn add(&self, key: &str, values: &[&str], ttl: Duration) -> Result<usize, CacheError> {
        let added = self.write(
            key,
            || Value::Set(HashSet::new()),
            |current| match current {
                Value::Set(set) => Ok(values
                    .iter()
                    .filter(|value| set.insert(value.to_string()))
                    .count()),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )?;
        self.touch_ttl(key, ttl);
        Ok(added)
    }

    async fn remove(&self, key: &str, values: &[&str]) -> Result<usize, CacheError> {
        self.write(
            key,
            || Value::Set(HashSet::new()),
            |current| match current {
                Value::Set(set) => Ok(values.iter().filter(|value| set.remove(**value)).count()),
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    async fn set_size(&self, key: &str) -> Result<usize, CacheError> {
        Ok(self.load_set(key)?.len())
    }

    async fn set_algebra(
        &self,
        op: SetOp,
        key: &str,
        others: &[&str],
    ) -> Result<HashSet<String>, CacheError> {
        let combine = |base: HashSet<String>, other: HashSet<String>| -> HashSet<String> {
            match op {
                SetOp::Union => base.union(&other).cloned().collect(),
                SetOp::Intersect => base.intersection(&other).cloned().collect(),
                SetOp::Difference => base.difference(&other).cloned().collect(),
            }
        };

        match SetPlan::for_others(others) {
            SetPlan::Members => self.load_set(key),
            SetPlan::Pairwise(other) => Ok(combine(self.load_set(key)?, self.load_set(other)?)),
            SetPlan::MultiKey(others) => {
                let mut result = self.load_set(key)?;
                for other in others {
                    result = combine(result, self.load_set(other)?);
                }
                Ok(result)
            }
        }
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, CacheError> {
        self.read(key, |value| match value {
            Value::List(list) => Ok(match resolve_range(list.len(), start, end) {
                Some((from, to)) => list[from..=to].to_vec(),
                None => Vec::new(),
            }),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(Option::unwrap_or_default)
    }

    async fn list_size(&self, key: &str) -> Result<usize, CacheError> {
        self.read(key, |value| match value {
            Value::List(list) => Ok(list.len()),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(|len| len.unwrap_or(0))
    }

    async fn index_of(&self, key: &str, index: i64) -> Result<Option<String>, CacheError> {
        self.read(key, |value| match value {
            Value::List(list) => Ok(resolve_index(list.len(), index).map(|i| list[i].clone())),
            _ => Err(CacheError::WrongType(key.to_string())),
        })
        .map(Option::flatten)
    }

    async fn push_right(
        &self,
        key: &str,
        values: &[&str],
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        let len = self.write(
            key,
            || Value::List(Vec::new()),
            |current| match current {
                Value::List(list) => {
                    list.extend(values.iter().map(|value| value.to_string()));
                    Ok(list.len())
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )?;
        self.touch_ttl(key, ttl);
        Ok(len)
    }

    async fn set_at(&self, key: &str, index: i64, value: &str) -> Result<(), CacheError> {
        self.write(
            key,
            || Value::List(Vec::new()),
            |current| match current {
                Value::List(list) => match resolve_index(list.len(), index) {
                    Some(i) => {
                        list[i] = value.to_string();
                        Ok(())
                    }
                    None => Err(CacheError::Command("index out of range".to_string())),
                },
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }

    async fn remove_n(&self, key: &str, count: i64, value: &str) -> Result<usize, CacheError> {
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };

        self.write(
            key,
            || Value::List(Vec::new()),
            |current| match current {
                Value::List(list) => {
                    let mut removed = 0;
                    if count >= 0 {
                        list.retain(|item| {
                            if removed < limit && item == value {
                                removed += 1;
                                false
                            } else {
                                true
                            }
                        });
                    } else {
                        let mut i = list.len();
                        while i > 0 && removed < limit {
                            i -= 1;
                            if list[i] == value {
                                list.remove(i);
                                removed += 1;
                            }
                        }
                    }
                    Ok(removed)
                }
                _ => Err(CacheError::WrongType(key.to_string())),
            },
        )
    }
}
