//! Data types for the recommendation system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of recommendations in a response.
pub const MAX_RECOMMENDATIONS: usize = 3;

/// Maximum length of a recommendation reason, in characters.
pub const MAX_REASON_CHARS: usize = 500;

/// A highly rated (>= 4) book from the user's reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighRatedBook {
    pub title: String,
    pub author: String,
    pub rating: f64,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPatterns {
    /// Average rating >= 4.0
    pub is_selective_reader: bool,
    /// At least 10 reviews considered
    pub is_active_reviewer: bool,
    /// Few distinct genres, or one genre dominating
    pub has_genre_preference: bool,
}

/// A user's derived taste profile. Recomputed on every cache miss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceProfile {
    pub favorite_genres: Vec<String>,
    pub recent_genres: Vec<String>,
    pub high_rated_books: Vec<HighRatedBook>,
    pub preferred_authors: Vec<String>,
    pub average_rating: f64,
    pub total_reviews: usize,
    /// Rating bucket (1..=5) to count.
    pub rating_distribution: BTreeMap<u8, u32>,
    pub reading_patterns: ReadingPatterns,
}

impl PreferenceProfile {
    /// Summary fields carried in response metadata.
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            favorite_genres: self.favorite_genres.clone(),
            recent_genres: self.recent_genres.clone(),
            preferred_authors: self.preferred_authors.clone(),
            average_rating: self.average_rating,
            total_reviews: self.total_reviews,
        }
    }
}

/// Where an individual recommendation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSource {
    Ai,
    Fallback,
}

/// Where a whole response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Ai,
    Fallback,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationItem {
    pub title: String,
    pub author: String,
    pub genre: Option<String>,
    pub reason: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub source: RecommendationSource,
    pub average_rating: Option<f64>,
    pub review_count: Option<i64>,
}

impl RecommendationItem {
    /// "Title by Author", the form used for de-duplication.
    pub fn label(&self) -> String {
        format!("{} by {}", self.title, self.author)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub favorite_genres: Vec<String>,
    pub recent_genres: Vec<String>,
    pub preferred_authors: Vec<String>,
    pub average_rating: f64,
    pub total_reviews: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub source: ResponseSource,
    pub profile: ProfileSummary,
    /// Milliseconds spent generating (not serving) this response.
    pub processing_time: u64,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub recommendations: Vec<RecommendationItem>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryStats {
    pub user_id: String,
    pub expires_in_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<CacheEntryStats>,
}

/// Result of the synthetic self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub openai_available: bool,
    pub fallback_working: bool,
    pub cache_working: bool,
}

/// Case-insensitive substring match in either direction, the fuzzy
/// "same book" test used against already-reviewed titles.
pub fn fuzzy_matches(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Whether `label` fuzzily matches any entry of `list`.
pub fn matches_any(label: &str, list: &[String]) -> bool {
    list.iter().any(|entry| fuzzy_matches(label, entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_matches_both_directions() {
        assert!(fuzzy_matches("Dune by Frank Herbert", "dune by frank herbert"));
        assert!(fuzzy_matches("Dune", "Dune by Frank Herbert"));
        assert!(fuzzy_matches("Dune by Frank Herbert", "DUNE"));
        assert!(!fuzzy_matches("Emma by Jane Austen", "Dune by Frank Herbert"));
    }

    #[test]
    fn test_empty_entries_never_match() {
        assert!(!fuzzy_matches("Dune by Frank Herbert", ""));
        assert!(!matches_any("Dune", &["   ".to_string()]));
    }

    #[test]
    fn test_sources_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ResponseSource::Hybrid).unwrap(), "\"hybrid\"");
        assert_eq!(serde_json::to_string(&RecommendationSource::Ai).unwrap(), "\"ai\"");
    }
}
