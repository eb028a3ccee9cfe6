//! AI-backed primary recommendation generator.
//!
//! Sends a prompt describing the user's taste to a chat-completion backend
//! and validates the JSON reply at the boundary: every item must carry a
//! title, an author and a reason, or the whole reply is rejected.

use crate::config::RecommendationConfig;
use crate::errors::AppError;
use crate::recommendations::errors::RecommendationError;
use crate::recommendations::types::{
    PreferenceProfile, RecommendationItem, RecommendationSource, MAX_REASON_CHARS,
    MAX_RECOMMENDATIONS,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Confidence used when the backend omits or garbles the value.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// High-rated books mentioned in the prompt.
const PROMPT_HIGH_RATED_BOOKS: usize = 5;

const SYSTEM_PROMPT: &str = "You are an expert librarian and book recommendation assistant. \
You recommend real, published books that match a reader's tastes. \
Always reply with valid JSON only, no commentary.";

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Whether the backend is configured and may be called.
    fn is_available(&self) -> bool;

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, RecommendationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &RecommendationConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.clone(),
            model: config.openai_model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, RecommendationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RecommendationError::ServiceUnavailable("OpenAI API key not configured".to_string())
        })?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens,
            temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        log::debug!("Requesting completion from {} ({})", url, self.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::warn!("Completion request failed ({}): {}", status, text);
            return Err(RecommendationError::Upstream(format!(
                "HTTP {} - {}",
                status.as_u16(),
                text
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            RecommendationError::MalformedResponse(format!("Unreadable completion body: {}", e))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                RecommendationError::MalformedResponse("Completion had no content".to_string())
            })
    }
}

/// The reply shapes accepted from the backend.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawReply {
    Wrapped { recommendations: Vec<RawRecommendation> },
    Bare(Vec<RawRecommendation>),
}

#[derive(Deserialize)]
struct RawRecommendation {
    title: Option<String>,
    author: Option<String>,
    reason: Option<String>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
}

impl RawRecommendation {
    fn validate(self, index: usize) -> Result<RecommendationItem, RecommendationError> {
        let required = |field: Option<String>, name: &str| {
            field
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    RecommendationError::MalformedResponse(format!(
                        "Recommendation {} is missing '{}'",
                        index, name
                    ))
                })
        };

        let title = required(self.title, "title")?;
        let author = required(self.author, "author")?;
        let reason = required(self.reason, "reason")?;

        Ok(RecommendationItem {
            title,
            author,
            genre: self
                .genre
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty()),
            reason: reason.chars().take(MAX_REASON_CHARS).collect(),
            confidence: parse_confidence(self.confidence.as_ref()),
            source: RecommendationSource::Ai,
            average_rating: None,
            review_count: None,
        })
    }
}

/// Parse a confidence value, defaulting non-numeric input and clamping into [0, 1].
fn parse_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Cut the JSON payload out of a reply that may be wrapped in prose or code fences.
fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find(['{', '['])?;
    let end = reply.rfind(['}', ']'])?;
    (end >= start).then(|| &reply[start..=end])
}

/// Turn a raw backend reply into at most three validated items.
pub fn parse_recommendations(reply: &str) -> Result<Vec<RecommendationItem>, RecommendationError> {
    let json = extract_json(reply).ok_or_else(|| {
        RecommendationError::MalformedResponse("Reply contains no JSON".to_string())
    })?;

    let raw: RawReply = serde_json::from_str(json)
        .map_err(|e| RecommendationError::MalformedResponse(format!("Invalid JSON: {}", e)))?;

    let raw_items = match raw {
        RawReply::Wrapped { recommendations } => recommendations,
        RawReply::Bare(items) => items,
    };

    let mut items = raw_items
        .into_iter()
        .enumerate()
        .map(|(i, item)| item.validate(i))
        .collect::<Result<Vec<_>, _>>()?;

    if items.is_empty() {
        return Err(RecommendationError::MalformedResponse(
            "Reply contained no recommendations".to_string(),
        ));
    }

    items.truncate(MAX_RECOMMENDATIONS);
    Ok(items)
}

/// Natural-language prompt describing the user's taste.
pub fn build_prompt(profile: &PreferenceProfile) -> String {
    let join_or = |items: &[String], empty: &str| {
        if items.is_empty() {
            empty.to_string()
        } else {
            items.join(", ")
        }
    };

    let high_rated = if profile.high_rated_books.is_empty() {
        "None yet".to_string()
    } else {
        profile
            .high_rated_books
            .iter()
            .take(PROMPT_HIGH_RATED_BOOKS)
            .map(|b| format!("- \"{}\" by {} (rated {:.1}/5)", b.title, b.author, b.rating))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Recommend exactly {count} books for a reader with this profile.\n\n\
         Favorite genres: {favorites}\n\
         Recently read genres: {recent}\n\
         Highly rated books:\n{high_rated}\n\
         Average rating given: {average:.1}/5\n\
         Total reviews written: {total}\n\n\
         Do not recommend any of the books listed above.\n\
         Reply with JSON in exactly this shape:\n\
         {{\"recommendations\": [{{\"title\": \"...\", \"author\": \"...\", \"genre\": \"...\", \
         \"reason\": \"why this reader will enjoy it, under 500 characters\", \
         \"confidence\": 0.0-1.0}}]}}",
        count = MAX_RECOMMENDATIONS,
        favorites = join_or(&profile.favorite_genres, "No clear preference"),
        recent = join_or(&profile.recent_genres, "None"),
        high_rated = high_rated,
        average = profile.average_rating,
        total = profile.total_reviews,
    )
}

/// Primary generator: prompt, call the backend with a bounded timeout,
/// validate the reply.
pub struct PrimaryGenerator {
    backend: Arc<dyn TextGenerator>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl PrimaryGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>, config: &RecommendationConfig) -> Self {
        Self {
            backend,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.request_timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub async fn generate(
        &self,
        profile: &PreferenceProfile,
    ) -> Result<Vec<RecommendationItem>, RecommendationError> {
        if !self.backend.is_available() {
            return Err(RecommendationError::ServiceUnavailable(
                "Text generation backend not configured".to_string(),
            ));
        }

        let prompt = build_prompt(profile);
        let call = self
            .backend
            .complete(SYSTEM_PROMPT, &prompt, self.max_tokens, self.temperature);

        let reply = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                RecommendationError::Upstream(format!(
                    "Text generation timed out after {:?}",
                    self.timeout
                ))
            })??;

        let items = parse_recommendations(&reply)?;
        log::info!("Primary generator produced {} recommendations", items.len());
        Ok(items)
    }
}
