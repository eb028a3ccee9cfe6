//! Recommendation engine implementation.
//!
//! Serves book recommendations by:
//! 1. Checking the two-tier cache (memory, then SQLite)
//! 2. Analyzing the user's reviews and favorites into a preference profile
//! 3. Asking the AI generator when the user is eligible and it is configured
//! 4. Padding or replacing its output with the rule-based fallback
//! 5. Writing the result through both cache tiers
//!
//! The final list always holds between one and three items.

use crate::activity::ActivityStore;
use crate::config::RecommendationConfig;
use crate::errors::AppError;
use crate::recommendations::ai::{OpenAiClient, PrimaryGenerator};
use crate::recommendations::analyzer::PreferenceAnalyzer;
use crate::recommendations::cache::RecommendationCache;
use crate::recommendations::errors::RecommendationError;
use crate::recommendations::fallback::FallbackGenerator;
use crate::recommendations::types::{
    matches_any, CacheStats, HealthReport, PreferenceProfile, RecommendationItem,
    RecommendationResponse, RecommendationSource, ResponseMetadata, ResponseSource,
    MAX_RECOMMENDATIONS,
};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Cache key used by the self-test. Never a real user id.
const HEALTH_CHECK_USER: &str = "__health_check__";

/// Engine for generating book recommendations.
///
/// Owns its cache; tests can build isolated instances and inspect the
/// cache directly through [`RecommendationEngine::cache`].
pub struct RecommendationEngine {
    store: Arc<dyn ActivityStore>,
    analyzer: PreferenceAnalyzer,
    primary: Option<PrimaryGenerator>,
    fallback: FallbackGenerator,
    cache: Arc<RecommendationCache>,
}

impl RecommendationEngine {
    /// Fallback-only engine over the given store and cache.
    pub fn new(store: Arc<dyn ActivityStore>, cache: RecommendationCache) -> Self {
        Self {
            analyzer: PreferenceAnalyzer::new(store.clone()),
            store,
            primary: None,
            fallback: FallbackGenerator::new(),
            cache: Arc::new(cache),
        }
    }

    /// Engine wired from configuration: OpenAI-backed primary generator and
    /// a two-tier cache persisted in `pool`.
    pub fn from_config(
        config: &RecommendationConfig,
        store: Arc<dyn ActivityStore>,
        pool: Pool<Sqlite>,
    ) -> Result<Self, AppError> {
        let cache = RecommendationCache::with_persistence(config.cache_ttl, pool);
        let client = OpenAiClient::new(config)?;

        if !config.ai_configured() {
            log::info!("No OpenAI API key configured, serving rule-based recommendations only");
        }

        Ok(Self::new(store, cache).with_primary(PrimaryGenerator::new(Arc::new(client), config)))
    }

    pub fn with_primary(mut self, primary: PrimaryGenerator) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackGenerator) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn cache(&self) -> &RecommendationCache {
        &self.cache
    }

    /// Recommendations for a user, served from cache when possible.
    ///
    /// Fails only when the user is unknown or their activity cannot be read;
    /// every primary-generator problem degrades to fallback output.
    pub async fn get_recommendations(
        &self,
        user_id: &str,
    ) -> Result<RecommendationResponse, RecommendationError> {
        if let Some(mut cached) = self.cache.get(user_id).await {
            cached.metadata.cache_hit = true;
            return Ok(cached);
        }

        let started = Instant::now();
        let token = self.cache.generation(user_id).await;

        if !self.store.user_exists(user_id).await? {
            return Err(RecommendationError::UserNotFound(user_id.to_string()));
        }

        let profile = self.analyzer.analyze(user_id).await?;
        let eligible = self
            .analyzer
            .has_enough_data_for_personalization(user_id)
            .await;

        let (recommendations, source) = self.generate(user_id, &profile, eligible).await?;
        let recommendations = self.enrich_with_catalog_stats(recommendations).await;

        let response = RecommendationResponse {
            recommendations,
            metadata: ResponseMetadata {
                user_id: user_id.to_string(),
                generated_at: Utc::now(),
                source,
                profile: profile.summary(),
                processing_time: started.elapsed().as_millis() as u64,
                cache_hit: false,
            },
        };

        log::info!(
            "Generated {} recommendations for {} (source {:?}, {}ms)",
            response.recommendations.len(),
            user_id,
            source,
            response.metadata.processing_time
        );

        match self.cache.put_if_current(user_id, &response, token).await {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Activity for {} changed during generation, not caching", user_id);
            }
            Err(e) => {
                log::warn!("Failed to persist recommendation cache for '{}': {}", user_id, e);
            }
        }

        Ok(response)
    }

    /// Pick between primary, hybrid and fallback output.
    async fn generate(
        &self,
        user_id: &str,
        profile: &PreferenceProfile,
        eligible: bool,
    ) -> Result<(Vec<RecommendationItem>, ResponseSource), RecommendationError> {
        let reviewed = self.analyzer.get_user_reviewed_books(user_id).await;

        let primary = match &self.primary {
            Some(primary) if eligible && primary.is_available() => primary,
            _ => {
                log::debug!(
                    "Using fallback for {} (eligible: {}, primary available: {})",
                    user_id,
                    eligible,
                    self.primary.as_ref().is_some_and(|p| p.is_available())
                );
                return self.fallback_only(user_id, profile, &reviewed);
            }
        };

        let items = match primary.generate(profile).await {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Primary generation failed for {}, falling back: {}", user_id, e);
                return self.fallback_only(user_id, profile, &reviewed);
            }
        };

        let mut picks: Vec<RecommendationItem> = items
            .into_iter()
            .filter(|item| !matches_any(&item.label(), &reviewed))
            .take(MAX_RECOMMENDATIONS)
            .collect();

        if picks.len() == MAX_RECOMMENDATIONS {
            return Ok((picks, ResponseSource::Ai));
        }

        if picks.is_empty() {
            log::info!("Every AI pick for {} was already reviewed", user_id);
            return self.fallback_only(user_id, profile, &reviewed);
        }

        let mut exclude = reviewed;
        exclude.extend(picks.iter().map(|item| item.label()));

        let needed = MAX_RECOMMENDATIONS - picks.len();
        let padding: Vec<RecommendationItem> = self
            .fallback
            .generate(user_id, profile, &exclude)
            .into_iter()
            .filter(|item| !matches_any(&item.label(), &exclude))
            .take(needed)
            .collect();

        if padding.is_empty() {
            return Ok((picks, ResponseSource::Ai));
        }

        log::debug!(
            "Padded {} AI picks with {} fallback items for {}",
            picks.len(),
            padding.len(),
            user_id
        );
        picks.extend(padding);
        Ok((picks, ResponseSource::Hybrid))
    }

    fn fallback_only(
        &self,
        user_id: &str,
        profile: &PreferenceProfile,
        reviewed: &[String],
    ) -> Result<(Vec<RecommendationItem>, ResponseSource), RecommendationError> {
        let mut items = self.fallback.generate(user_id, profile, reviewed);
        items.truncate(MAX_RECOMMENDATIONS);

        if items.is_empty() {
            log::error!("Fallback generator returned nothing for {}", user_id);
            return Err(RecommendationError::Internal(
                "Fallback generator produced no recommendations".to_string(),
            ));
        }

        Ok((items, ResponseSource::Fallback))
    }

    /// Attach platform rating stats to items that exist in the catalog.
    async fn enrich_with_catalog_stats(
        &self,
        mut items: Vec<RecommendationItem>,
    ) -> Vec<RecommendationItem> {
        for item in items.iter_mut() {
            match self.store.find_book(&item.title, &item.author).await {
                Ok(Some(book)) if book.review_count > 0 => {
                    item.average_rating = Some(book.average_rating);
                    item.review_count = Some(book.review_count);
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Catalog lookup failed for '{}': {}", item.label(), e);
                }
            }
        }
        items
    }

    /// Drop a user's cached recommendations. Call after any change to the
    /// user's reviews or favorites.
    pub async fn invalidate_user_cache(&self, user_id: &str) -> Result<(), RecommendationError> {
        self.cache.invalidate(user_id).await.inspect_err(|e| {
            log::warn!("Failed to invalidate cache for '{}': {}", user_id, e);
        })
    }

    /// Clear every user's cached recommendations.
    pub async fn clear_cache(&self) -> Result<(), RecommendationError> {
        self.cache.clear_all().await
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Periodically sweep expired cache entries. Not needed for correctness.
    pub fn spawn_cache_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.evict_expired().await {
                    log::warn!("Cache sweep failed: {}", e);
                }
            }
        })
    }

    /// Synthetic self-test that touches no real user data.
    pub async fn test_system_health(&self) -> HealthReport {
        let openai_available = self.primary.as_ref().is_some_and(|p| p.is_available());

        let probe_profile = PreferenceProfile {
            favorite_genres: vec!["Fiction".to_string()],
            ..PreferenceProfile::default()
        };
        let probe = self
            .fallback
            .generate(HEALTH_CHECK_USER, &probe_profile, &[]);
        let fallback_working = !probe.is_empty()
            && probe.len() <= MAX_RECOMMENDATIONS
            && probe
                .iter()
                .all(|i| i.source == RecommendationSource::Fallback);

        let cache_working = self.check_cache(probe, probe_profile).await;

        let report = HealthReport {
            openai_available,
            fallback_working,
            cache_working,
        };
        log::info!("Recommendation system health: {:?}", report);
        report
    }

    async fn check_cache(
        &self,
        recommendations: Vec<RecommendationItem>,
        profile: PreferenceProfile,
    ) -> bool {
        let response = RecommendationResponse {
            recommendations,
            metadata: ResponseMetadata {
                user_id: HEALTH_CHECK_USER.to_string(),
                generated_at: Utc::now(),
                source: ResponseSource::Fallback,
                profile: profile.summary(),
                processing_time: 0,
                cache_hit: false,
            },
        };

        if let Err(e) = self.cache.put(HEALTH_CHECK_USER, &response).await {
            log::warn!("Health check cache write failed: {}", e);
            if let Err(e) = self.cache.invalidate(HEALTH_CHECK_USER).await {
                log::warn!("Health check cache cleanup failed: {}", e);
            }
            return false;
        }

        let read_back = self.cache.get(HEALTH_CHECK_USER).await;
        let cleaned = match self.cache.invalidate(HEALTH_CHECK_USER).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Health check cache cleanup failed: {}", e);
                false
            }
        };

        cleaned && read_back.as_ref() == Some(&response)
    }
}
