//! Typed errors for the recommendation system.
//!
//! Uses `thiserror` for ergonomic error definitions and implements
//! `Serialize` so errors can cross a transport boundary cleanly.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during recommendation generation.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum RecommendationError {
    /// Activity store lookup failed. Surfaced to the caller.
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// The requested user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Text-generation backend is not configured.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Text-generation call failed or timed out.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Text-generation reply could not be turned into valid recommendations.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Persistent cache read or write failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for RecommendationError {
    fn from(e: sqlx::Error) -> Self {
        RecommendationError::DataAccess(e.to_string())
    }
}

impl From<reqwest::Error> for RecommendationError {
    fn from(e: reqwest::Error) -> Self {
        RecommendationError::Upstream(e.to_string())
    }
}
