//! User activity store: users, the book catalog, reviews and favorites.
//!
//! The recommendation engine only reads through [`ActivityStore`]; the write
//! side lives on [`SqliteActivityStore`] for the rest of the application.

pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{Book, BookRef, FavoriteRecord, NewBook, ReviewRecord};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::recommendations::errors::RecommendationError;

/// Read access to a user's activity, as consumed by the recommendation engine.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn user_exists(&self, user_id: &str) -> Result<bool, RecommendationError>;

    /// Most recent reviews first, at most `limit`.
    async fn find_reviews_by_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ReviewRecord>, RecommendationError>;

    /// All favorites, most recent first.
    async fn find_favorites_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<FavoriteRecord>, RecommendationError>;

    /// Every book the user has reviewed, with no limit. Reviews whose book
    /// is missing or malformed are skipped.
    async fn find_reviewed_books(
        &self,
        user_id: &str,
    ) -> Result<Vec<BookRef>, RecommendationError>;

    async fn count_reviews(&self, user_id: &str) -> Result<i64, RecommendationError>;

    async fn count_favorites(&self, user_id: &str) -> Result<i64, RecommendationError>;

    /// Case-insensitive catalog lookup by exact title and author.
    async fn find_book(
        &self,
        title: &str,
        author: &str,
    ) -> Result<Option<Book>, RecommendationError>;
}

pub struct SqliteActivityStore {
    pool: Pool<Sqlite>,
}

impl SqliteActivityStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create_user(&self, username: &str) -> Result<String, RecommendationError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(username)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    pub async fn add_book(&self, book: &NewBook) -> Result<String, RecommendationError> {
        let id = Uuid::new_v4().to_string();
        let genres = serde_json::to_string(&book.genres)
            .map_err(|e| RecommendationError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO books (id, title, author, genres, published_year) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(genres)
        .bind(book.published_year)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Remove a book from the catalog. Reviews and favorites pointing at it stay
    /// behind as dangling references.
    pub async fn delete_book(&self, book_id: &str) -> Result<(), RecommendationError> {
        sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_review(
        &self,
        user_id: &str,
        book_id: &str,
        rating: f64,
        body: Option<&str>,
    ) -> Result<String, RecommendationError> {
        self.add_review_at(user_id, book_id, rating, body, Utc::now()).await
    }

    pub async fn add_review_at(
        &self,
        user_id: &str,
        book_id: &str,
        rating: f64,
        body: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<String, RecommendationError> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO reviews (id, user_id, book_id, rating, body, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(book_id)
        .bind(rating)
        .bind(body)
        .bind(created_at.timestamp())
        .execute(&mut *tx)
        .await?;

        Self::refresh_book_stats(&mut tx, book_id).await?;
        tx.commit().await?;

        log::debug!("Recorded review {} by {} for book {}", id, user_id, book_id);
        Ok(id)
    }

    pub async fn delete_review(&self, review_id: &str) -> Result<(), RecommendationError> {
        let mut tx = self.pool.begin().await?;

        let book_id: Option<(String,)> = sqlx::query_as("SELECT book_id FROM reviews WHERE id = ?")
            .bind(review_id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(review_id)
            .execute(&mut *tx)
            .await?;

        if let Some((book_id,)) = book_id {
            Self::refresh_book_stats(&mut tx, &book_id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn add_favorite(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> Result<(), RecommendationError> {
        self.add_favorite_at(user_id, book_id, Utc::now()).await
    }

    pub async fn add_favorite_at(
        &self,
        user_id: &str,
        book_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), RecommendationError> {
        sqlx::query(
            "INSERT OR IGNORE INTO favorites (id, user_id, book_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(book_id)
        .bind(created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove_favorite(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> Result<(), RecommendationError> {
        sqlx::query("DELETE FROM favorites WHERE user_id = ? AND book_id = ?")
            .bind(user_id)
            .bind(book_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn refresh_book_stats(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        book_id: &str,
    ) -> Result<(), RecommendationError> {
        sqlx::query(
            r#"
            UPDATE books SET
                average_rating = COALESCE((SELECT AVG(rating) FROM reviews WHERE book_id = ?), 0),
                review_count = (SELECT COUNT(*) FROM reviews WHERE book_id = ?)
            WHERE id = ?
            "#,
        )
        .bind(book_id)
        .bind(book_id)
        .bind(book_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Build the joined book from a `LEFT JOIN books` row. A missing row or
    /// unparseable genre list yields `None`.
    fn book_ref_from_row(row: &SqliteRow) -> Option<BookRef> {
        let title = row.try_get::<Option<String>, _>("book_title").ok().flatten();
        let author = row.try_get::<Option<String>, _>("book_author").ok().flatten();
        let genres_json = row.try_get::<Option<String>, _>("book_genres").ok().flatten();
        let published_year = row.try_get::<Option<i64>, _>("book_year").ok().flatten();

        let (title, author, genres_json) = (title?, author?, genres_json?);
        let genres = match serde_json::from_str::<Vec<String>>(&genres_json) {
            Ok(genres) => genres,
            Err(e) => {
                log::debug!("Skipping book '{}' with malformed genres: {}", title, e);
                return None;
            }
        };

        Some(BookRef {
            title,
            author,
            genres,
            published_year: published_year.map(|y| y as i32),
        })
    }
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn user_exists(&self, user_id: &str) -> Result<bool, RecommendationError> {
        let result = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    async fn find_reviews_by_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ReviewRecord>, RecommendationError> {
        let rows = sqlx::query(
            r#"
            SELECT
                r.id, r.book_id, r.rating, r.created_at,
                b.title as book_title, b.author as book_author,
                b.genres as book_genres, b.published_year as book_year
            FROM reviews r
            LEFT JOIN books b ON r.book_id = b.id
            WHERE r.user_id = ?
            ORDER BY r.created_at DESC, r.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut reviews = Vec::with_capacity(rows.len());
        for row in rows {
            reviews.push(ReviewRecord {
                id: row.try_get("id")?,
                book_id: row.try_get("book_id")?,
                rating: row.try_get("rating")?,
                created_at: timestamp_to_datetime(row.try_get("created_at")?),
                book: Self::book_ref_from_row(&row),
            });
        }

        Ok(reviews)
    }

    async fn find_favorites_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<FavoriteRecord>, RecommendationError> {
        let rows = sqlx::query(
            r#"
            SELECT
                f.id, f.book_id, f.created_at,
                b.title as book_title, b.author as book_author,
                b.genres as book_genres, b.published_year as book_year
            FROM favorites f
            LEFT JOIN books b ON f.book_id = b.id
            WHERE f.user_id = ?
            ORDER BY f.created_at DESC, f.rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut favorites = Vec::with_capacity(rows.len());
        for row in rows {
            favorites.push(FavoriteRecord {
                id: row.try_get("id")?,
                book_id: row.try_get("book_id")?,
                created_at: timestamp_to_datetime(row.try_get("created_at")?),
                book: Self::book_ref_from_row(&row),
            });
        }

        Ok(favorites)
    }

    async fn find_reviewed_books(
        &self,
        user_id: &str,
    ) -> Result<Vec<BookRef>, RecommendationError> {
        let rows = sqlx::query(
            r#"
            SELECT
                b.title as book_title, b.author as book_author,
                b.genres as book_genres, b.published_year as book_year
            FROM reviews r
            LEFT JOIN books b ON r.book_id = b.id
            WHERE r.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(Self::book_ref_from_row).collect())
    }

    async fn count_reviews(&self, user_id: &str) -> Result<i64, RecommendationError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn count_favorites(&self, user_id: &str) -> Result<i64, RecommendationError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM favorites WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn find_book(
        &self,
        title: &str,
        author: &str,
    ) -> Result<Option<Book>, RecommendationError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, author, genres, published_year, average_rating, review_count
            FROM books
            WHERE title = ? COLLATE NOCASE AND author = ? COLLATE NOCASE
            LIMIT 1
            "#,
        )
        .bind(title.trim())
        .bind(author.trim())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let genres_json: String = row.try_get("genres")?;
        let published_year: Option<i64> = row.try_get("published_year")?;

        Ok(Some(Book {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            genres: serde_json::from_str(&genres_json).unwrap_or_default(),
            published_year: published_year.map(|y| y as i32),
            average_rating: row.try_get("average_rating")?,
            review_count: row.try_get("review_count")?,
        }))
    }
}
