//! In-process key-value cache
//!
//! Typed get/set/delete with JSON serialization, per-key TTLs and sorted-set
//! operations for the realtime trending index. Misses are distinguished from
//! errors, and `get_or_set` is the canonical read-through helper: cache-write
//! failures are logged and never fail the read.
//!
//! The cache is process-local. The surface (stable key prefixes, TTLs,
//! JSON values) is the contract; a networked store could be swapped in
//! behind the same operations.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// TTL for cached recommendation responses
pub const RECOMMENDATIONS_TTL: Duration = Duration::from_secs(15 * 60);

/// TTL for cached user stats
pub const USER_STATS_TTL: Duration = Duration::from_secs(30 * 60);

/// Cache key for a user's recommendation response
pub fn recommendations_key(user_id: &str, algorithm: Option<&str>, context: Option<&str>) -> String {
    format!(
        "recommendations:{}:{}:{}",
        user_id,
        algorithm.unwrap_or("all"),
        context.unwrap_or("all")
    )
}

/// Cache key for a user's follower stats
pub fn user_stats_key(user_id: &str) -> String {
    format!("user_stats:{}", user_id)
}

/// Sorted-set key for realtime trending, one per action
pub fn trending_key(action: &str) -> String {
    format!("trending:{}", action)
}

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process TTL cache with JSON values and sorted sets
pub struct Cache {
    entries: RwLock<HashMap<String, Entry>>,
    zsets: RwLock<HashMap<String, HashMap<String, f64>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            zsets: RwLock::new(HashMap::new()),
        }
    }

    /// Typed read. Expired entries count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                let value = serde_json::from_value(entry.value.clone())?;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    /// Typed write with optional TTL
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    /// Remove one or more keys; absent keys are ignored
    pub async fn delete(&self, keys: &[&str]) {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(*key);
        }
    }

    /// Remove every key starting with `prefix`. Used to invalidate key
    /// families whose suffixes are not enumerable at the call site.
    pub async fn delete_prefix(&self, prefix: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !key.starts_with(prefix));
    }

    /// Read-through helper: on miss, invoke `fetch`, cache the value and
    /// return it. A failed cache write is logged and does not fail the read.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await? {
            debug!(key, "cache hit");
            return Ok(cached);
        }

        let value = fetch().await?;
        if let Err(e) = self.set(key, &value, Some(ttl)).await {
            warn!(key, "failed to cache value: {}", e);
        }
        Ok(value)
    }

    /// Add a member to a sorted set, replacing its score if present
    pub async fn zadd(&self, key: &str, score: f64, member: &str) {
        let mut zsets = self.zsets.write().await;
        zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    /// Members of a sorted set ordered by score descending, inclusive
    /// index range; `stop = -1` means "through the end"
    pub async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let zsets = self.zsets.read().await;
        let Some(set) = zsets.get(key) else {
            return Vec::new();
        };

        let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let len = members.len() as i64;
        let resolve = |idx: i64| -> i64 {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx
            }
        };
        let start = resolve(start).min(len);
        let stop = (resolve(stop) + 1).min(len);
        if start >= stop {
            return Vec::new();
        }

        members[start as usize..stop as usize]
            .iter()
            .map(|(m, _)| (*m).clone())
            .collect()
    }

    /// Drop expired entries
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic sweeper for expired entries
pub fn spawn_sweeper(
    cache: Arc<Cache>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep().await;
                    if removed > 0 {
                        debug!("cache sweep removed {} expired entries", removed);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Cache sweeper shutting down");
                    break;
                }
            }
        }
    })
}
