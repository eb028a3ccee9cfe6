//! Shared test doubles for the recommendation modules.

use crate::activity::models::{Book, BookRef, FavoriteRecord, ReviewRecord};
use crate::activity::ActivityStore;
use crate::recommendations::ai::TextGenerator;
use crate::recommendations::errors::RecommendationError;
use crate::recommendations::types::{
    ProfileSummary, RecommendationItem, RecommendationResponse, RecommendationSource,
    ResponseMetadata, ResponseSource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

fn book_ref(title: &str, author: &str, genres: &[&str]) -> BookRef {
    BookRef {
        title: title.to_string(),
        author: author.to_string(),
        genres: genres.iter().map(|g| g.to_string()).collect(),
        published_year: None,
    }
}

pub fn review(
    title: &str,
    author: &str,
    genres: &[&str],
    rating: f64,
    created_at: DateTime<Utc>,
) -> ReviewRecord {
    ReviewRecord {
        id: format!("review-{}", title),
        book_id: format!("book-{}", title),
        rating,
        created_at,
        book: Some(book_ref(title, author, genres)),
    }
}

pub fn favorite(title: &str, author: &str, genres: &[&str]) -> FavoriteRecord {
    FavoriteRecord {
        id: format!("favorite-{}", title),
        book_id: format!("book-{}", title),
        created_at: Utc::now(),
        book: Some(book_ref(title, author, genres)),
    }
}

pub fn sample_response(user_id: &str) -> RecommendationResponse {
    RecommendationResponse {
        recommendations: vec![RecommendationItem {
            title: "The Hobbit".to_string(),
            author: "J.R.R. Tolkien".to_string(),
            genre: Some("Fantasy".to_string()),
            reason: "A classic adventure.".to_string(),
            confidence: 0.6,
            source: RecommendationSource::Fallback,
            average_rating: Some(4.5),
            review_count: Some(12),
        }],
        metadata: ResponseMetadata {
            user_id: user_id.to_string(),
            generated_at: Utc::now(),
            source: ResponseSource::Fallback,
            profile: ProfileSummary {
                favorite_genres: vec!["Fantasy".to_string()],
                recent_genres: vec![],
                preferred_authors: vec![],
                average_rating: 4.0,
                total_reviews: 1,
            },
            processing_time: 3,
            cache_hit: false,
        },
    }
}

/// Activity store whose every lookup fails.
pub struct FailingStore;

fn store_down() -> RecommendationError {
    RecommendationError::DataAccess("activity store unavailable".to_string())
}

#[async_trait]
impl ActivityStore for FailingStore {
    async fn user_exists(&self, _user_id: &str) -> Result<bool, RecommendationError> {
        Err(store_down())
    }

    async fn find_reviews_by_user(
        &self,
        _user_id: &str,
        _limit: i64,
    ) -> Result<Vec<ReviewRecord>, RecommendationError> {
        Err(store_down())
    }

    async fn find_favorites_by_user(
        &self,
        _user_id: &str,
    ) -> Result<Vec<FavoriteRecord>, RecommendationError> {
        Err(store_down())
    }

    async fn find_reviewed_books(
        &self,
        _user_id: &str,
    ) -> Result<Vec<BookRef>, RecommendationError> {
        Err(store_down())
    }

    async fn count_reviews(&self, _user_id: &str) -> Result<i64, RecommendationError> {
        Err(store_down())
    }

    async fn count_favorites(&self, _user_id: &str) -> Result<i64, RecommendationError> {
        Err(store_down())
    }

    async fn find_book(
        &self,
        _title: &str,
        _author: &str,
    ) -> Result<Option<Book>, RecommendationError> {
        Err(store_down())
    }
}

/// Replies with a fixed payload and counts calls.
pub struct StaticGenerator {
    reply: Option<String>,
    available: bool,
    calls: AtomicUsize,
}

impl StaticGenerator {
    pub fn with_reply(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always errors with `Upstream`, as a failed HTTP call would.
    pub fn failing() -> Self {
        Self {
            reply: None,
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            reply: None,
            available: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, RecommendationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| RecommendationError::Upstream("connection refused".to_string()))
    }
}

/// Never answers.
pub struct HangingGenerator;

#[async_trait]
impl TextGenerator for HangingGenerator {
    fn is_available(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, RecommendationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(RecommendationError::Upstream("unreachable".to_string()))
    }
}

/// Holds the first call until [`GatedGenerator::open`]; later calls pass straight through.
pub struct GatedGenerator {
    reply: String,
    entered: Notify,
    release: Notify,
    opened: AtomicBool,
}

impl GatedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
            opened: AtomicBool::new(false),
        }
    }

    /// Resolves once a call is parked at the gate.
    pub async fn wait_for_call(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.opened.store(true, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    fn is_available(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, RecommendationError> {
        if !self.opened.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(self.reply.clone())
    }
}
