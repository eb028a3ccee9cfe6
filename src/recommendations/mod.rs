//! Recommendation engine for book discovery.
//!
//! Builds a taste profile from a reader's reviews and favorites, asks an
//! OpenAI-compatible model for picks when the reader has enough history,
//! and falls back to a curated rule-based corpus otherwise. Results are
//! cached per user in memory and in SQLite.

pub mod ai;
pub mod analyzer;
pub mod cache;
pub mod engine;
pub mod errors;
pub mod fallback;
pub mod types;

#[cfg(test)]
mod test_support;

pub use engine::RecommendationEngine;
pub use errors::RecommendationError;
pub use types::{
    CacheStats, HealthReport, PreferenceProfile, RecommendationItem, RecommendationResponse,
    RecommendationSource, ResponseSource,
};
