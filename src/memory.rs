// src/memory.rs
//! Process-local [`KeyedStore`] with the same expiry semantics as Redis.
//!
//! Keys expire lazily: an expired entry is dropped the next time anything
//! touches it. Keys nobody touches again are reclaimed by a sweep that runs on
//! writes at most once per [`SWEEP_INTERVAL`]. Time comes from `tokio::time`, so
//! paused test clocks drive expiry.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::store::{KeyedStore, StoreResult, TTL_MISSING, TTL_PERSISTENT};

enum Value {
    Str(String),
    Hash(HashMap<String, i64>),
    SortedSet(HashMap<String, f64>),
    Set(HashSet<String>),
    List(Vec<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Minimum time between two sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entries {
    map: HashMap<String, Entry>,
    last_sweep: Instant,
}

pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A poisoned map is still structurally valid; keep serving it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Locks the map for a write, sweeping expired entries if one is due.
    fn lock_for_write(&self) -> MutexGuard<'_, Entries> {
        let mut entries = self.lock();
        let now = Instant::now();
        if now.duration_since(entries.last_sweep) >= SWEEP_INTERVAL {
            let before = entries.map.len();
            entries.map.retain(|_, entry| !entry.is_expired(now));
            entries.last_sweep = now;
            debug!(evicted = before - entries.map.len(), "Swept expired keys");
        }
        entries
    }

    /// Number of entries held, expired or not.
    #[cfg(test)]
    fn held(&self) -> usize {
        self.lock().map.len()
    }
}

/// Returns the live entry for `key`, evicting it first if it has expired.
fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if map.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        map.remove(key);
    }
    map.get_mut(key)
}

fn live_or_insert<'a>(
    map: &'a mut HashMap<String, Entry>,
    key: &str,
    empty: fn() -> Value,
) -> &'a mut Entry {
    if map.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        map.remove(key);
    }
    map.entry(key.to_string())
        .or_insert_with(|| Entry::new(empty()))
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        Ok(match live(map, key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        Ok(match live(map, key) {
            None => TTL_MISSING,
            Some(Entry {
                expires_at: None, ..
            }) => TTL_PERSISTENT,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                // Same rounding as Redis TTL.
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        if let Some(entry) = live(map, key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        Ok(live(map, key).is_some())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, i64)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        let entry = live_or_insert(map, key, || Value::Hash(HashMap::new()));
        if let Value::Hash(hash) = &mut entry.value {
            for (field, value) in fields {
                hash.insert(field.clone(), *value);
            }
        }
        Ok(())
    }

    async fn hincr_existing(&self, key: &str, field: &str, by: i64) -> StoreResult<Option<i64>> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        Ok(match live(map, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                let count = hash.entry(field.to_string()).or_insert(0);
                *count += by;
                Some(*count)
            }
            _ => None,
        })
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        Ok(match live(map, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.clone(),
            _ => HashMap::new(),
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        let entry = live_or_insert(map, key, || Value::SortedSet(HashMap::new()));
        if let Value::SortedSet(zset) = &mut entry.value {
            zset.insert(member.to_string(), score);
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        let now_empty = match live(map, key) {
            Some(Entry {
                value: Value::SortedSet(zset),
                ..
            }) => {
                zset.remove(member);
                zset.is_empty()
            }
            _ => false,
        };
        if now_empty {
            map.remove(key);
        }
        Ok(())
    }

    async fn zrevrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        let Some(Entry {
            value: Value::SortedSet(zset),
            ..
        }) = live(map, key)
        else {
            return Ok(Vec::new());
        };

        let mut members: Vec<(&String, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
        // Redis breaks score ties lexicographically; reversed range reverses that too.
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        let entry = live_or_insert(map, key, || Value::Set(HashSet::new()));
        if let Value::Set(set) = &mut entry.value {
            set.insert(member.to_string());
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<HashSet<String>> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        Ok(match live(map, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.clone(),
            _ => HashSet::new(),
        })
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.lock_for_write();
        let map = &mut entries.map;
        let entry = live_or_insert(map, key, || Value::List(Vec::new()));
        if let Value::List(list) = &mut entry.value {
            list.push(value.to_string());
        }
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        let map = &mut entries.map;
        Ok(match live(map, key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.clone(),
            _ => Vec::new(),
        })
    }
}
