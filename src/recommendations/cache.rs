//! Two-tier recommendation cache.
//!
//! ```text
//! [Request] → [In-Memory] → [SQLite] → [Generation]
//! ```
//!
//! Both tiers share one TTL (1 hour by default) and an absolute `expires_at`.
//! Expiry is checked lazily on read. The SQLite tier keeps at most one
//! active row per user: storing a new set deactivates the previous one.

use crate::recommendations::errors::RecommendationError;
use crate::recommendations::types::{CacheEntryStats, CacheStats, RecommendationResponse};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default lifetime of a cached recommendation set.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Maximum number of in-memory entries before evicting the one closest to expiry.
pub const MAX_MEMORY_ENTRIES: usize = 10_000;

/// Where a user's cached recommendations currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    MemoryOnly,
    Persisted,
    Expired,
}

struct MemoryEntry {
    response: RecommendationResponse,
    expires_at: DateTime<Utc>,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// An active row from the persistent tier.
#[derive(Debug, Clone)]
pub struct CachedRecommendation {
    pub id: String,
    pub user_id: String,
    pub response: RecommendationResponse,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedRecommendation {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn cache_err(e: impl std::fmt::Display) -> RecommendationError {
    RecommendationError::Cache(e.to_string())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// SQLite-backed durable tier.
#[derive(Debug, Clone)]
pub struct PersistentCache {
    pool: Pool<Sqlite>,
}

impl PersistentCache {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// The user's active entry, expired or not.
    pub async fn find_active(
        &self,
        user_id: &str,
    ) -> Result<Option<CachedRecommendation>, RecommendationError> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, response_json, created_at, expires_at
            FROM recommendation_cache
            WHERE user_id = ? AND is_active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(cache_err)?;

        match row {
            Some((id, response_json, created_at, expires_at)) => {
                let response: RecommendationResponse = serde_json::from_str(&response_json)
                    .map_err(|e| {
                        RecommendationError::Cache(format!(
                            "Failed to deserialize cached response: {}",
                            e
                        ))
                    })?;

                Ok(Some(CachedRecommendation {
                    id,
                    user_id: user_id.to_string(),
                    response,
                    created_at: from_millis(created_at),
                    expires_at: from_millis(expires_at),
                }))
            }
            None => Ok(None),
        }
    }

    /// Store a new active entry, deactivating any previous one for the user.
    pub async fn store(
        &self,
        user_id: &str,
        response: &RecommendationResponse,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RecommendationError> {
        let response_json = serde_json::to_string(response).map_err(|e| {
            RecommendationError::Cache(format!("Failed to serialize response: {}", e))
        })?;

        let mut tx = self.pool.begin().await.map_err(cache_err)?;

        sqlx::query(
            "UPDATE recommendation_cache SET is_active = 0 WHERE user_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(cache_err)?;

        sqlx::query(
            r#"
            INSERT INTO recommendation_cache (id, user_id, response_json, is_active, created_at, expires_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(&response_json)
        .bind(created_at.timestamp_millis())
        .bind(expires_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(cache_err)?;

        tx.commit().await.map_err(cache_err)?;

        log::debug!(
            "Persisted recommendation cache for '{}' (expires {})",
            user_id,
            expires_at
        );
        Ok(())
    }

    pub async fn delete(&self, entry_id: &str) -> Result<(), RecommendationError> {
        sqlx::query("DELETE FROM recommendation_cache WHERE id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    /// Remove every row (active or superseded) for a user.
    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64, RecommendationError> {
        let result = sqlx::query("DELETE FROM recommendation_cache WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;
        Ok(result.rows_affected())
    }

    /// Remove all expired entries. Returns the number of evicted rows.
    pub async fn evict_expired(&self) -> Result<u64, RecommendationError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query("DELETE FROM recommendation_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;

        let count = result.rows_affected();
        if count > 0 {
            log::info!("Evicted {} expired recommendation cache entries", count);
        }
        Ok(count)
    }

    pub async fn clear(&self) -> Result<u64, RecommendationError> {
        let result = sqlx::query("DELETE FROM recommendation_cache")
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;
        log::info!("Persistent recommendation cache cleared");
        Ok(result.rows_affected())
    }

    /// Number of live recommendation sets across all users.
    pub async fn count_active(&self) -> Result<i64, RecommendationError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM recommendation_cache WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(cache_err)?;
        Ok(count.0)
    }

    pub async fn count_active_for_user(&self, user_id: &str) -> Result<i64, RecommendationError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM recommendation_cache WHERE user_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(cache_err)?;
        Ok(count.0)
    }
}

/// Snapshot of a user's invalidation counter, taken before a read or a
/// generation. Writes made under a stale token are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeneration {
    epoch: u64,
    user: u64,
}

/// Invalidation counters. `epoch` moves on `clear_all`, `per_user` on
/// `invalidate`; a cleared epoch forgets every per-user counter.
#[derive(Default)]
struct Generations {
    epoch: u64,
    per_user: HashMap<String, u64>,
}

impl Generations {
    fn current(&self, user_id: &str) -> CacheGeneration {
        CacheGeneration {
            epoch: self.epoch,
            user: self.per_user.get(user_id).copied().unwrap_or(0),
        }
    }
}

/// Memory tier in front of an optional persistent tier.
///
/// Writes and invalidations are serialized on the generation lock, so a
/// response computed before an invalidation can never land after it.
pub struct RecommendationCache {
    ttl: TimeDelta,
    memory: Mutex<HashMap<String, MemoryEntry>>,
    /// Persistent SQLite tier, attached once the database is ready.
    persistent: OnceLock<PersistentCache>,
    /// Locked before `memory` whenever both are held.
    generations: Mutex<Generations>,
}

impl Default for RecommendationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl RecommendationCache {
    /// Memory-only cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::hours(1)),
            memory: Mutex::new(HashMap::new()),
            persistent: OnceLock::new(),
            generations: Mutex::new(Generations::default()),
        }
    }

    /// Cache with both tiers.
    pub fn with_persistence(ttl: Duration, pool: Pool<Sqlite>) -> Self {
        let cache = Self::new(ttl);
        cache.init_persistent_cache(pool);
        cache
    }

    /// Attach the persistent tier. Later calls are ignored.
    pub fn init_persistent_cache(&self, pool: Pool<Sqlite>) {
        if self.persistent.set(PersistentCache::new(pool)).is_ok() {
            log::info!("Persistent recommendation cache initialized");
        }
    }

    pub fn persistent(&self) -> Option<&PersistentCache> {
        self.persistent.get()
    }

    /// Current invalidation token for a user. Take it before reading the
    /// user's activity and hand it to [`RecommendationCache::put_if_current`].
    pub async fn generation(&self, user_id: &str) -> CacheGeneration {
        self.generations.lock().await.current(user_id)
    }

    /// Memory first, then the persistent tier. A persistent hit is promoted
    /// into memory with its original expiry, unless the user was invalidated
    /// while it was being read. Expired entries are dropped.
    pub async fn get(&self, user_id: &str) -> Option<RecommendationResponse> {
        let now = Utc::now();

        {
            let mut memory = self.memory.lock().await;
            let expired = match memory.get(user_id) {
                Some(entry) if !entry.is_expired(now) => {
                    log::debug!("Memory cache hit for user '{}'", user_id);
                    return Some(entry.response.clone());
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                log::debug!("Memory cache entry expired for user '{}'", user_id);
                memory.remove(user_id);
            }
        }

        let pcache = self.persistent.get()?;
        let token = self.generation(user_id).await;

        match pcache.find_active(user_id).await {
            Ok(Some(cached)) if !cached.is_expired() => {
                let generations = self.generations.lock().await;
                if generations.current(user_id) != token {
                    log::debug!("Cache for '{}' invalidated during read, skipping", user_id);
                    return None;
                }
                log::debug!("Persistent cache hit for user '{}'", user_id);
                self.insert_memory(user_id, cached.response.clone(), cached.expires_at).await;
                Some(cached.response)
            }
            Ok(Some(expired)) => {
                log::debug!("Persistent cache entry expired for user '{}'", user_id);
                if let Err(e) = pcache.delete(&expired.id).await {
                    log::warn!("Failed to drop expired cache row for '{}': {}", user_id, e);
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Persistent cache read error for '{}': {}", user_id, e);
                None
            }
        }
    }

    /// Write to both tiers. The memory write always happens; an error only
    /// reports that the persistent write failed.
    pub async fn put(
        &self,
        user_id: &str,
        response: &RecommendationResponse,
    ) -> Result<(), RecommendationError> {
        let _generations = self.generations.lock().await;
        self.write_tiers(user_id, response).await
    }

    /// Like [`RecommendationCache::put`], but only if the user has not been
    /// invalidated since `token` was taken. Returns whether anything was written.
    pub async fn put_if_current(
        &self,
        user_id: &str,
        response: &RecommendationResponse,
        token: CacheGeneration,
    ) -> Result<bool, RecommendationError> {
        let generations = self.generations.lock().await;
        if generations.current(user_id) != token {
            log::debug!("Dropping stale recommendations for '{}'", user_id);
            return Ok(false);
        }

        self.write_tiers(user_id, response).await?;
        Ok(true)
    }

    async fn write_tiers(
        &self,
        user_id: &str,
        response: &RecommendationResponse,
    ) -> Result<(), RecommendationError> {
        let created_at = Utc::now();
        let expires_at = created_at + self.ttl;

        self.insert_memory(user_id, response.clone(), expires_at).await;

        match self.persistent.get() {
            Some(pcache) => pcache.store(user_id, response, created_at, expires_at).await,
            None => Ok(()),
        }
    }

    /// Drop a user's entries from both tiers. Any write still in flight for
    /// the user is discarded.
    pub async fn invalidate(&self, user_id: &str) -> Result<(), RecommendationError> {
        let mut generations = self.generations.lock().await;
        *generations.per_user.entry(user_id.to_string()).or_insert(0) += 1;

        self.memory.lock().await.remove(user_id);

        if let Some(pcache) = self.persistent.get() {
            pcache.delete_for_user(user_id).await?;
        }

        log::debug!("Invalidated recommendation cache for '{}'", user_id);
        Ok(())
    }

    /// Drop every entry from both tiers.
    pub async fn clear_all(&self) -> Result<(), RecommendationError> {
        let mut generations = self.generations.lock().await;
        generations.epoch += 1;
        generations.per_user.clear();

        self.memory.lock().await.clear();

        if let Some(pcache) = self.persistent.get() {
            pcache.clear().await?;
        }

        log::info!("Recommendation cache cleared (memory + persistent)");
        Ok(())
    }

    /// Live memory entries with their remaining lifetime.
    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let memory = self.memory.lock().await;

        let mut entries: Vec<CacheEntryStats> = memory
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(user_id, entry)| CacheEntryStats {
                user_id: user_id.clone(),
                expires_in_ms: (entry.expires_at - now).num_milliseconds(),
            })
            .collect();
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        CacheStats {
            size: entries.len(),
            entries,
        }
    }

    /// Where the user's entry currently lives.
    pub async fn state(&self, user_id: &str) -> CacheState {
        let now = Utc::now();
        let memory_expired = {
            let memory = self.memory.lock().await;
            memory.get(user_id).map(|e| e.is_expired(now))
        };

        let persisted = match self.persistent.get() {
            Some(pcache) => match pcache.find_active(user_id).await {
                Ok(found) => found.map(|c| c.is_expired()),
                Err(e) => {
                    log::warn!("Persistent cache read error for '{}': {}", user_id, e);
                    None
                }
            },
            None => None,
        };

        match (memory_expired, persisted) {
            (_, Some(false)) => CacheState::Persisted,
            (Some(false), _) => CacheState::MemoryOnly,
            (None, None) => CacheState::Absent,
            _ => CacheState::Expired,
        }
    }

    /// Sweep expired entries from both tiers. Returns the number removed.
    pub async fn evict_expired(&self) -> Result<u64, RecommendationError> {
        let now = Utc::now();
        let removed_memory = {
            let mut memory = self.memory.lock().await;
            let before = memory.len();
            memory.retain(|_, entry| !entry.is_expired(now));
            (before - memory.len()) as u64
        };

        let removed_persistent = match self.persistent.get() {
            Some(pcache) => pcache.evict_expired().await?,
            None => 0,
        };

        Ok(removed_memory + removed_persistent)
    }

    /// Live persistent recommendation sets across all users.
    pub async fn count_active_entries(&self) -> Result<i64, RecommendationError> {
        match self.persistent.get() {
            Some(pcache) => pcache.count_active().await,
            None => Ok(self.stats().await.size as i64),
        }
    }

    async fn insert_memory(
        &self,
        user_id: &str,
        response: RecommendationResponse,
        expires_at: DateTime<Utc>,
    ) {
        let now = Utc::now();
        let mut memory = self.memory.lock().await;

        if !memory.contains_key(user_id) && memory.len() >= MAX_MEMORY_ENTRIES {
            memory.retain(|_, entry| !entry.is_expired(now));
            if memory.len() >= MAX_MEMORY_ENTRIES {
                if let Some(oldest_key) = memory
                    .iter()
                    .min_by_key(|(_, v)| v.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    memory.remove(&oldest_key);
                }
            }
        }

        memory.insert(
            user_id.to_string(),
            MemoryEntry {
                response,
                expires_at,
            },
        );
    }
}
