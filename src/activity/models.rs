use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog book with its aggregate review stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
    pub published_year: Option<i32>,
    pub average_rating: f64,
    pub review_count: i64,
}

/// Input for adding a book to the catalog.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
    pub published_year: Option<i32>,
}

impl NewBook {
    pub fn new(title: &str, author: &str, genres: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            author: author.to_string(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            published_year: None,
        }
    }
}

/// The joined book side of a review or favorite.
#[derive(Debug, Clone, PartialEq)]
pub struct BookRef {
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
    pub published_year: Option<i32>,
}

impl BookRef {
    /// "Title by Author", the form used for de-duplicating recommendations.
    pub fn label(&self) -> String {
        format!("{} by {}", self.title, self.author)
    }
}

#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub id: String,
    pub book_id: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    /// `None` when the referenced book is gone or its row is malformed.
    pub book: Option<BookRef>,
}

#[derive(Debug, Clone)]
pub struct FavoriteRecord {
    pub id: String,
    pub book_id: String,
    pub created_at: DateTime<Utc>,
    pub book: Option<BookRef>,
}
