//! Rule-based fallback recommendations.
//!
//! Scores a fixed corpus of well-known books against the preference profile.
//! No I/O, no randomness: the same inputs always give the same output, and
//! the output is never empty.

use crate::recommendations::types::{
    matches_any, PreferenceProfile, RecommendationItem, RecommendationSource,
    MAX_RECOMMENDATIONS,
};

/// A candidate in the built-in corpus.
#[derive(Debug, Clone, Copy)]
pub struct CorpusBook {
    pub title: &'static str,
    pub author: &'static str,
    pub genre: &'static str,
    /// Broad appeal, 0..=3. Breaks ties for readers with little history.
    pub popularity: u8,
}

impl CorpusBook {
    fn label(&self) -> String {
        format!("{} by {}", self.title, self.author)
    }
}

const fn book(
    title: &'static str,
    author: &'static str,
    genre: &'static str,
    popularity: u8,
) -> CorpusBook {
    CorpusBook {
        title,
        author,
        genre,
        popularity,
    }
}

pub static CORPUS: &[CorpusBook] = &[
    book("To Kill a Mockingbird", "Harper Lee", "Fiction", 3),
    book("1984", "George Orwell", "Science Fiction", 3),
    book("The Great Gatsby", "F. Scott Fitzgerald", "Classics", 3),
    book("Pride and Prejudice", "Jane Austen", "Romance", 3),
    book("The Hobbit", "J.R.R. Tolkien", "Fantasy", 3),
    book("Sapiens", "Yuval Noah Harari", "Non-Fiction", 3),
    book("The Girl with the Dragon Tattoo", "Stieg Larsson", "Mystery", 2),
    book("Gone Girl", "Gillian Flynn", "Thriller", 2),
    book("Dune", "Frank Herbert", "Science Fiction", 2),
    book("The Name of the Wind", "Patrick Rothfuss", "Fantasy", 2),
    book("The Night Circus", "Erin Morgenstern", "Fantasy", 1),
    book("The Martian", "Andy Weir", "Science Fiction", 2),
    book("Project Hail Mary", "Andy Weir", "Science Fiction", 2),
    book("The Silent Patient", "Alex Michaelides", "Thriller", 2),
    book("And Then There Were None", "Agatha Christie", "Mystery", 2),
    book("The Hound of the Baskervilles", "Arthur Conan Doyle", "Mystery", 1),
    book("Outlander", "Diana Gabaldon", "Romance", 1),
    book("The Notebook", "Nicholas Sparks", "Romance", 1),
    book("All the Light We Cannot See", "Anthony Doerr", "Historical Fiction", 2),
    book("The Book Thief", "Markus Zusak", "Historical Fiction", 2),
    book("Wolf Hall", "Hilary Mantel", "Historical Fiction", 1),
    book("Educated", "Tara Westover", "Biography", 2),
    book("Becoming", "Michelle Obama", "Biography", 2),
    book("Steve Jobs", "Walter Isaacson", "Biography", 1),
    book("Atomic Habits", "James Clear", "Self-Help", 2),
    book("Thinking, Fast and Slow", "Daniel Kahneman", "Non-Fiction", 2),
    book("The Shining", "Stephen King", "Horror", 2),
    book("Dracula", "Bram Stoker", "Horror", 1),
    book("The Hunger Games", "Suzanne Collins", "Young Adult", 2),
    book("The Fault in Our Stars", "John Green", "Young Adult", 1),
    book("Beloved", "Toni Morrison", "Literary Fiction", 2),
    book("The Road", "Cormac McCarthy", "Literary Fiction", 1),
    book("Jane Eyre", "Charlotte Bronte", "Classics", 2),
    book("Crime and Punishment", "Fyodor Dostoevsky", "Classics", 1),
];

/// Candidates from one genre allowed before the rest of the list gets a turn.
const MAX_PER_GENRE: usize = 2;

const PREFERRED_AUTHOR_POINTS: u32 = 6;
const LIKED_AUTHOR_POINTS: u32 = 4;
const RECENT_GENRE_POINTS: u32 = 3;

struct Scored {
    book: CorpusBook,
    score: u32,
    reason: String,
}

pub struct FallbackGenerator {
    corpus: &'static [CorpusBook],
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackGenerator {
    pub fn new() -> Self {
        Self { corpus: CORPUS }
    }

    /// Use a different candidate corpus. An empty corpus still yields the
    /// built-in defaults.
    pub fn with_corpus(corpus: &'static [CorpusBook]) -> Self {
        Self { corpus }
    }

    /// Up to three recommendations, never zero. Candidates whose
    /// "Title by Author" fuzzily matches `exclude_titles` are skipped.
    pub fn generate(
        &self,
        user_id: &str,
        profile: &PreferenceProfile,
        exclude_titles: &[String],
    ) -> Vec<RecommendationItem> {
        let mut scored: Vec<Scored> = self
            .corpus
            .iter()
            .filter(|b| !matches_any(&b.label(), exclude_titles))
            .map(|b| Self::score(*b, profile))
            .collect();

        // stable: equal scores keep corpus order
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        let picks = Self::pick_diverse(scored);
        if picks.is_empty() {
            log::warn!(
                "Fallback corpus exhausted for {} ({} exclusions), using defaults",
                user_id,
                exclude_titles.len()
            );
            return Self::default_recommendations();
        }

        log::debug!("Fallback generator produced {} items for {}", picks.len(), user_id);
        picks.into_iter().map(Self::to_item).collect()
    }

    /// Static list served when nothing else is left.
    pub fn default_recommendations() -> Vec<RecommendationItem> {
        CORPUS
            .iter()
            .take(MAX_RECOMMENDATIONS)
            .map(|b| {
                Self::to_item(Scored {
                    book: *b,
                    score: 0,
                    reason: format!(
                        "A widely loved {} title that many readers return to.",
                        b.genre.to_lowercase()
                    ),
                })
            })
            .collect()
    }

    fn score(book: CorpusBook, profile: &PreferenceProfile) -> Scored {
        let mut score = book.popularity as u32;
        let mut reasons = Vec::new();

        let favorite_rank = profile
            .favorite_genres
            .iter()
            .position(|g| g.eq_ignore_ascii_case(book.genre));
        if let Some(rank) = favorite_rank {
            score += (5 - rank.min(4) as u32) * 2;
            reasons.push(format!("it matches your love of {}", book.genre.to_lowercase()));
        }

        if profile
            .recent_genres
            .iter()
            .any(|g| g.eq_ignore_ascii_case(book.genre))
        {
            score += RECENT_GENRE_POINTS;
            if favorite_rank.is_none() {
                reasons.push(format!(
                    "you've been reading {} lately",
                    book.genre.to_lowercase()
                ));
            }
        }

        if profile
            .preferred_authors
            .iter()
            .any(|a| a.eq_ignore_ascii_case(book.author))
        {
            score += PREFERRED_AUTHOR_POINTS;
            reasons.push(format!("you consistently rate {} highly", book.author));
        } else if profile
            .high_rated_books
            .iter()
            .any(|b| b.author.eq_ignore_ascii_case(book.author))
        {
            score += LIKED_AUTHOR_POINTS;
            reasons.push(format!("you enjoyed another book by {}", book.author));
        }

        let reason = if reasons.is_empty() {
            format!(
                "A widely loved {} title that many readers return to.",
                book.genre.to_lowercase()
            )
        } else {
            format!("Recommended because {}.", reasons.join(" and "))
        };

        Scored {
            book,
            score,
            reason,
        }
    }

    /// Take the best candidates while letting no genre crowd out the rest,
    /// then top up from whatever is left.
    fn pick_diverse(scored: Vec<Scored>) -> Vec<Scored> {
        let mut picks: Vec<Scored> = Vec::with_capacity(MAX_RECOMMENDATIONS);
        let mut leftovers = Vec::new();

        for candidate in scored {
            if picks.len() >= MAX_RECOMMENDATIONS {
                break;
            }
            let same_genre = picks
                .iter()
                .filter(|p| p.book.genre == candidate.book.genre)
                .count();
            if same_genre < MAX_PER_GENRE {
                picks.push(candidate);
            } else {
                leftovers.push(candidate);
            }
        }

        let missing = MAX_RECOMMENDATIONS.saturating_sub(picks.len());
        picks.extend(leftovers.into_iter().take(missing));
        picks
    }

    fn to_item(scored: Scored) -> RecommendationItem {
        // 0.3 for a cold start, approaching 0.85 for a strong match
        let confidence = (0.3 + scored.score as f64 / 40.0).min(0.85);

        RecommendationItem {
            title: scored.book.title.to_string(),
            author: scored.book.author.to_string(),
            genre: Some(scored.book.genre.to_string()),
            reason: scored.reason,
            confidence: (confidence * 100.0).round() / 100.0,
            source: RecommendationSource::Fallback,
            average_rating: None,
            review_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommendations::types::HighRatedBook;

    fn profile_with_genres(genres: &[&str]) -> PreferenceProfile {
        PreferenceProfile {
            favorite_genres: genres.iter().map(|g| g.to_string()).collect(),
            ..PreferenceProfile::default()
        }
    }

    #[test]
    fn test_cold_start_returns_three_popular_books() {
        let items = FallbackGenerator::new().generate("u", &PreferenceProfile::default(), &[]);
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.source == RecommendationSource::Fallback));
        assert!(items.iter().all(|i| (0.0..=1.0).contains(&i.confidence)));
        assert_eq!(items[0].title, "To Kill a Mockingbird");
    }

    #[test]
    fn test_is_deterministic() {
        let generator = FallbackGenerator::new();
        let profile = profile_with_genres(&["Mystery", "Fantasy"]);
        let first = generator.generate("u", &profile, &[]);
        let second = generator.generate("u", &profile, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_favorite_genre_ranks_first() {
        let items = FallbackGenerator::new().generate("u", &profile_with_genres(&["horror"]), &[]);
        assert_eq!(items[0].genre.as_deref(), Some("Horror"));
        assert!(items[0].reason.contains("horror"));
    }

    #[test]
    fn test_genre_diversity_limit() {
        let items =
            FallbackGenerator::new().generate("u", &profile_with_genres(&["Science Fiction"]), &[]);
        let sci_fi = items
            .iter()
            .filter(|i| i.genre.as_deref() == Some("Science Fiction"))
            .count();
        assert_eq!(items.len(), 3);
        assert_eq!(sci_fi, MAX_PER_GENRE);
    }

    #[test]
    fn test_preferred_author_boost() {
        let profile = PreferenceProfile {
            preferred_authors: vec!["Andy Weir".to_string()],
            high_rated_books: vec![HighRatedBook {
                title: "Artemis".into(),
                author: "Andy Weir".into(),
                rating: 5.0,
                genre: None,
            }],
            ..PreferenceProfile::default()
        };
        let items = FallbackGenerator::new().generate("u", &profile, &[]);
        assert_eq!(items[0].author, "Andy Weir");
        assert!(items[0].reason.contains("consistently rate Andy Weir"));
    }

    #[test]
    fn test_exclusions_match_case_insensitively_both_ways() {
        let exclude = vec![
            "to kill a mockingbird by harper lee".to_string(),
            "1984".to_string(),
            "The Great Gatsby by F. Scott Fitzgerald (Annotated Edition)".to_string(),
        ];
        let items = FallbackGenerator::new().generate("u", &PreferenceProfile::default(), &exclude);
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert!(!titles.contains(&"To Kill a Mockingbird"));
        assert!(!titles.contains(&"1984"));
        assert!(!titles.contains(&"The Great Gatsby"));
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_never_empty_even_when_everything_is_excluded() {
        let exclude: Vec<String> = CORPUS.iter().map(|b| b.label()).collect();
        let items = FallbackGenerator::new().generate("u", &PreferenceProfile::default(), &exclude);
        assert_eq!(items.len(), MAX_RECOMMENDATIONS);

        let empty = FallbackGenerator::with_corpus(&[]);
        assert!(!empty.generate("u", &PreferenceProfile::default(), &[]).is_empty());
    }
}
