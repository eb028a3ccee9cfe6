//! Preference analysis: turns a user's reviews and favorites into a
//! scored [`PreferenceProfile`].
//!
//! Genre weighting:
//! - each genre of a reviewed book scores 1, plus 1 more when the review is rated >= 4
//! - each genre of a favorited book scores 2
//!
//! Records whose book could not be joined are left out of every aggregate.

use crate::activity::models::{FavoriteRecord, ReviewRecord};
use crate::activity::ActivityStore;
use crate::recommendations::errors::RecommendationError;
use crate::recommendations::types::{HighRatedBook, PreferenceProfile, ReadingPatterns};
use chrono::{DateTime, Months, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Only the most recent reviews feed a profile.
pub const MAX_REVIEWS_ANALYZED: i64 = 50;

const MAX_FAVORITE_GENRES: usize = 5;
const MAX_RECENT_GENRES: usize = 3;
const MAX_HIGH_RATED_BOOKS: usize = 10;
const MAX_PREFERRED_AUTHORS: usize = 5;
const RECENT_WINDOW_MONTHS: u32 = 6;

const HIGH_RATING: f64 = 4.0;
const MIN_REVIEWS_FOR_PERSONALIZATION: i64 = 3;
const MIN_FAVORITES_FOR_PERSONALIZATION: i64 = 2;

/// Score accumulator that ranks ties by first appearance.
#[derive(Default)]
struct Tally {
    order: Vec<String>,
    scores: HashMap<String, u32>,
}

impl Tally {
    fn add(&mut self, key: &str, points: u32) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        match self.scores.get_mut(key) {
            Some(score) => *score += points,
            None => {
                self.order.push(key.to_string());
                self.scores.insert(key.to_string(), points);
            }
        }
    }

    fn top(&self, n: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, u32)> = self
            .order
            .iter()
            .map(|k| (k, self.scores.get(k).copied().unwrap_or(0)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }

    fn distinct(&self) -> usize {
        self.order.len()
    }

    fn total(&self) -> u32 {
        self.scores.values().sum()
    }

    fn max(&self) -> u32 {
        self.scores.values().copied().max().unwrap_or(0)
    }
}

struct AuthorStats {
    name: String,
    rating_sum: f64,
    count: usize,
}

impl AuthorStats {
    fn average(&self) -> f64 {
        self.rating_sum / self.count as f64
    }
}

/// Map a raw rating onto its 1..=5 distribution bucket.
pub fn rating_bucket(rating: f64) -> u8 {
    (rating.round() as i64).clamp(1, 5) as u8
}

/// Compute a profile from already-fetched activity. `reviews` must be most
/// recent first.
pub fn build_profile(
    reviews: &[ReviewRecord],
    favorites: &[FavoriteRecord],
    now: DateTime<Utc>,
) -> PreferenceProfile {
    let recent_cutoff = now
        .checked_sub_months(Months::new(RECENT_WINDOW_MONTHS))
        .unwrap_or(now);

    let mut genre_scores = Tally::default();
    let mut recent_genre_scores = Tally::default();
    let mut genre_occurrences = Tally::default();
    let mut authors: Vec<AuthorStats> = Vec::new();
    let mut high_rated_books = Vec::new();
    let mut rating_distribution: BTreeMap<u8, u32> = (1..=5).map(|b| (b, 0)).collect();
    let mut rating_sum = 0.0;
    let mut total_reviews = 0usize;

    for review in reviews {
        let Some(book) = review.book.as_ref() else {
            continue;
        };

        total_reviews += 1;
        rating_sum += review.rating;
        *rating_distribution
            .entry(rating_bucket(review.rating))
            .or_insert(0) += 1;

        let is_high = review.rating >= HIGH_RATING;
        let is_recent = review.created_at >= recent_cutoff;

        for genre in &book.genres {
            genre_scores.add(genre, if is_high { 2 } else { 1 });
            genre_occurrences.add(genre, 1);
            if is_recent {
                recent_genre_scores.add(genre, 1);
            }
        }

        match authors.iter_mut().find(|a| a.name == book.author) {
            Some(stats) => {
                stats.rating_sum += review.rating;
                stats.count += 1;
            }
            None => authors.push(AuthorStats {
                name: book.author.clone(),
                rating_sum: review.rating,
                count: 1,
            }),
        }

        if is_high && high_rated_books.len() < MAX_HIGH_RATED_BOOKS {
            high_rated_books.push(HighRatedBook {
                title: book.title.clone(),
                author: book.author.clone(),
                rating: review.rating,
                genre: book.genres.first().cloned(),
            });
        }
    }

    for favorite in favorites {
        let Some(book) = favorite.book.as_ref() else {
            continue;
        };
        for genre in &book.genres {
            genre_scores.add(genre, 2);
            genre_occurrences.add(genre, 1);
        }
    }

    let mut preferred: Vec<&AuthorStats> = authors
        .iter()
        .filter(|a| a.count >= 2 && a.average() >= HIGH_RATING)
        .collect();
    preferred.sort_by(|a, b| {
        b.average()
            .total_cmp(&a.average())
            .then_with(|| b.count.cmp(&a.count))
    });
    let preferred_authors = preferred
        .into_iter()
        .take(MAX_PREFERRED_AUTHORS)
        .map(|a| a.name.clone())
        .collect();

    let average_rating = if total_reviews > 0 {
        rating_sum / total_reviews as f64
    } else {
        0.0
    };

    let occurrences = genre_occurrences.total();
    let dominant_share = if occurrences > 0 {
        genre_occurrences.max() as f64 / occurrences as f64
    } else {
        0.0
    };

    PreferenceProfile {
        favorite_genres: genre_scores.top(MAX_FAVORITE_GENRES),
        recent_genres: recent_genre_scores.top(MAX_RECENT_GENRES),
        high_rated_books,
        preferred_authors,
        average_rating,
        total_reviews,
        rating_distribution,
        reading_patterns: ReadingPatterns {
            is_selective_reader: average_rating >= 4.0,
            is_active_reviewer: total_reviews >= 10,
            has_genre_preference: genre_occurrences.distinct() <= 3 || dominant_share >= 0.4,
        },
    }
}

/// Reads user activity and derives preference profiles.
pub struct PreferenceAnalyzer {
    store: Arc<dyn ActivityStore>,
}

impl PreferenceAnalyzer {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    /// Build the preference profile for a user from their 50 most recent
    /// reviews and all favorites.
    pub async fn analyze(&self, user_id: &str) -> Result<PreferenceProfile, RecommendationError> {
        let reviews = self
            .store
            .find_reviews_by_user(user_id, MAX_REVIEWS_ANALYZED)
            .await?;
        let favorites = self.store.find_favorites_by_user(user_id).await?;

        let profile = build_profile(&reviews, &favorites, Utc::now());

        log::debug!(
            "Analyzed preferences for {}: {} reviews, {} favorites, top genres {:?}",
            user_id,
            profile.total_reviews,
            favorites.len(),
            profile.favorite_genres
        );

        Ok(profile)
    }

    /// Eligibility gate for personalized (primary) generation.
    /// Fails closed: a lookup error means "not enough data".
    pub async fn has_enough_data_for_personalization(&self, user_id: &str) -> bool {
        let reviews = self.store.count_reviews(user_id).await;
        let favorites = self.store.count_favorites(user_id).await;

        match (reviews, favorites) {
            (Ok(r), Ok(f)) => {
                r >= MIN_REVIEWS_FOR_PERSONALIZATION || f >= MIN_FAVORITES_FOR_PERSONALIZATION
            }
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Eligibility check failed for {}: {}", user_id, e);
                false
            }
        }
    }

    /// "Title by Author" for every reviewed book that still resolves.
    /// Never fails; a lookup error yields an empty list.
    pub async fn get_user_reviewed_books(&self, user_id: &str) -> Vec<String> {
        match self.store.find_reviewed_books(user_id).await {
            Ok(books) => books.iter().map(|b| b.label()).collect(),
            Err(e) => {
                log::warn!("Could not load reviewed books for {}: {}", user_id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::SqliteActivityStore;
    use crate::database::DatabaseManager;
    use crate::recommendations::test_support::{favorite, review, FailingStore};
    use chrono::TimeDelta;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_favorites_outweigh_single_high_review() {
        let reviews = vec![review("A Book", "Author A", &["Genre A"], 5.0, now())];
        let favorites = vec![
            favorite("B One", "Author B", &["Genre B"]),
            favorite("B Two", "Author B", &["Genre B"]),
        ];

        let profile = build_profile(&reviews, &favorites, now());
        assert_eq!(profile.favorite_genres, vec!["Genre B", "Genre A"]);
    }

    #[test]
    fn test_high_ratings_score_double() {
        let reviews = vec![
            review("Low 1", "X", &["Low"], 2.0, now()),
            review("High", "Y", &["High"], 4.0, now()),
            review("Low 2", "Z", &["Low"], 3.0, now()),
            review("Low 3", "W", &["Low"], 1.0, now()),
        ];

        // Low: 3 points, High: 2 points
        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.favorite_genres, vec!["Low", "High"]);

        let reviews = vec![
            review("Low 1", "X", &["Low"], 2.0, now()),
            review("High", "Y", &["High"], 4.5, now()),
        ];
        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.favorite_genres, vec!["High", "Low"]);
    }

    #[test]
    fn test_favorite_genres_capped_at_five() {
        let genres = ["G1", "G2", "G3", "G4", "G5", "G6", "G7"];
        let favorites: Vec<_> = genres
            .iter()
            .map(|g| favorite(&format!("Book {}", g), "Someone", &[g]))
            .collect();

        let profile = build_profile(&[], &favorites, now());
        assert_eq!(profile.favorite_genres, vec!["G1", "G2", "G3", "G4", "G5"]);
    }

    #[test]
    fn test_rating_distribution_rounds_and_clamps() {
        let reviews: Vec<_> = [0.5, 5.5, 3.7, 4.2]
            .iter()
            .map(|r| review("T", "A", &["G"], *r, now()))
            .collect();

        let profile = build_profile(&reviews, &[], now());
        let expected: BTreeMap<u8, u32> = [(1, 1), (2, 0), (3, 0), (4, 2), (5, 1)].into();
        assert_eq!(profile.rating_distribution, expected);
    }

    #[test]
    fn test_preferred_authors_threshold() {
        let reviews = vec![
            review("X1", "Author X", &["G"], 5.0, now()),
            review("X2", "Author X", &["G"], 4.0, now()),
            review("Y1", "Author Y", &["G"], 2.0, now()),
            review("Y2", "Author Y", &["G"], 3.0, now()),
            review("Z1", "Author Z", &["G"], 5.0, now()),
        ];

        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.preferred_authors, vec!["Author X"]);
    }

    #[test]
    fn test_preferred_authors_sorted_by_average_then_count() {
        let reviews = vec![
            review("A1", "A", &["G"], 4.0, now()),
            review("A2", "A", &["G"], 4.0, now()),
            review("B1", "B", &["G"], 5.0, now()),
            review("B2", "B", &["G"], 5.0, now()),
            review("C1", "C", &["G"], 4.0, now()),
            review("C2", "C", &["G"], 4.0, now()),
            review("C3", "C", &["G"], 4.0, now()),
        ];

        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.preferred_authors, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_recent_genres_only_count_last_six_months() {
        let old = now() - TimeDelta::days(300);
        let reviews = vec![
            review("New", "A", &["Fresh"], 3.0, now()),
            review("Old 1", "B", &["Stale"], 5.0, old),
            review("Old 2", "C", &["Stale"], 5.0, old),
        ];

        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.recent_genres, vec!["Fresh"]);
        assert_eq!(profile.favorite_genres[0], "Stale");
    }

    #[test]
    fn test_high_rated_books_most_recent_first_capped() {
        let reviews: Vec<_> = (0..12)
            .map(|i| review(&format!("Book {}", i), "A", &["G"], 4.0, now()))
            .collect();

        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.high_rated_books.len(), 10);
        assert_eq!(profile.high_rated_books[0].title, "Book 0");
        assert_eq!(profile.high_rated_books[0].genre.as_deref(), Some("G"));
    }

    #[test]
    fn test_missing_books_are_excluded() {
        let mut orphan = review("Gone", "Nobody", &["Ghost"], 1.0, now());
        orphan.book = None;
        let reviews = vec![orphan, review("Here", "Someone", &["Real"], 5.0, now())];

        let profile = build_profile(&reviews, &[], now());
        assert_eq!(profile.total_reviews, 1);
        assert_eq!(profile.average_rating, 5.0);
        assert_eq!(profile.favorite_genres, vec!["Real"]);
    }

    #[test]
    fn test_reading_patterns() {
        let empty = build_profile(&[], &[], now());
        assert_eq!(empty.average_rating, 0.0);
        assert!(!empty.reading_patterns.is_selective_reader);
        assert!(!empty.reading_patterns.is_active_reviewer);

        let reviews: Vec<_> = (0..10)
            .map(|i| {
                let genre = format!("Genre {}", i % 5);
                review(&format!("B{}", i), "A", &[genre.as_str()], 4.5, now())
            })
            .collect();
        let profile = build_profile(&reviews, &[], now());
        assert!(profile.reading_patterns.is_selective_reader);
        assert!(profile.reading_patterns.is_active_reviewer);
        // five evenly spread genres: 20% share each
        assert!(!profile.reading_patterns.has_genre_preference);

        let reviews = vec![
            review("1", "A", &["Main"], 3.0, now()),
            review("2", "A", &["Main"], 3.0, now()),
            review("3", "A", &["Other 1"], 3.0, now()),
            review("4", "A", &["Other 2"], 3.0, now()),
            review("5", "A", &["Other 3"], 3.0, now()),
        ];
        let profile = build_profile(&reviews, &[], now());
        assert!(profile.reading_patterns.has_genre_preference);
    }

    #[tokio::test]
    async fn test_analyze_propagates_data_access_error() {
        let analyzer = PreferenceAnalyzer::new(Arc::new(FailingStore));
        let err = analyzer.analyze("user").await.unwrap_err();
        assert!(matches!(err, RecommendationError::DataAccess(_)));
    }

    #[tokio::test]
    async fn test_reviewed_books_cover_entire_history() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let store = Arc::new(SqliteActivityStore::new(db.pool.clone()));
        let user = store.create_user("completionist").await.unwrap();

        sqlx::query(
            r#"
            WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 1200)
            INSERT INTO books (id, title, author, genres)
            SELECT 'book-' || i, 'Volume ' || i, 'Prolific Author', '["Fantasy"]' FROM n
            "#,
        )
        .execute(&db.pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 1200)
            INSERT INTO reviews (id, user_id, book_id, rating, created_at)
            SELECT 'review-' || i, ?, 'book-' || i, 4.0, i FROM n
            "#,
        )
        .bind(&user)
        .execute(&db.pool)
        .await
        .unwrap();

        let analyzer = PreferenceAnalyzer::new(store);
        let reviewed = analyzer.get_user_reviewed_books(&user).await;
        assert_eq!(reviewed.len(), 1200);
        // the oldest review is still listed
        assert!(reviewed.contains(&"Volume 1 by Prolific Author".to_string()));
    }

    #[tokio::test]
    async fn test_gate_and_reviewed_books_fail_soft() {
        let analyzer = PreferenceAnalyzer::new(Arc::new(FailingStore));
        assert!(!analyzer.has_enough_data_for_personalization("user").await);
        assert!(analyzer.get_user_reviewed_books("user").await.is_empty());
    }
}
