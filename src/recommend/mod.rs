//! AI show analysis and personalized recommendations.
//!
//! The text-generation service is consumed as an opaque request/response
//! function ([`TextGenerator`]). Everything it returns is validated against
//! the serde types in [`crate::models`]; anything that does not fit, and any
//! failure other than rate limiting, degrades to `None`.

use crate::catalog::CatalogClient;
use crate::config::{GeminiConfig, RetryPolicy, DEFAULT_ANALYSIS_MODEL, DEFAULT_RECOMMENDATION_MODEL};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::models::{Recommendation, Show, ShowAnalysis};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const RECOMMENDATION_INPUT_LIMIT: usize = 15;
const FEATURED_LIMIT: usize = 8;

const ANALYST_INSTRUCTION: &str = "You are the 'Tuned' AI Media Curator. Your job is to analyze shows and provide hyper-personalized insights. Always return responses in valid JSON format.";
const CURATOR_INSTRUCTION: &str = "You are the 'Tuned' AI Media Curator. Your job is to curate premium recommendations for television enthusiasts. Always return responses in valid JSON format.";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub prompt: String,
    /// JSON schema the response text must follow.
    pub response_schema: Value,
}

/// A language model that answers a prompt with JSON text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

pub struct GeminiClient {
    http: HttpClient,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(Error::NotConfigured("Gemini API key"));
        }
        let url = format!("{}/{}:generateContent", GEMINI_URL, request.model);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": request.response_schema,
            },
        });

        let builder = self
            .http
            .request(reqwest::Method::POST, &url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let response: GenerateContentResponse = self.http.send_json(builder, &url).await?;

        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<String>();
        debug!("Generated {} characters", text.len());
        Ok(text)
    }
}

/// Runs `operation`, retrying only on rate limiting with a doubling delay.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut retries_left = policy.retries;

    loop {
        match operation().await {
            Err(e) if e.is_rate_limit() && retries_left > 0 => {
                warn!("Rate limited, retrying in {:?} ({} retries left)", delay, retries_left);
                sleep(delay).await;
                delay *= 2;
                retries_left -= 1;
            }
            result => return result,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecommendationList {
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

pub struct RecommendationEngine {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    analysis_model: String,
    recommendation_model: String,
}

impl RecommendationEngine {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retry: RetryPolicy,
        analysis_model: impl Into<String>,
        recommendation_model: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            retry,
            analysis_model: analysis_model.into(),
            recommendation_model: recommendation_model.into(),
        }
    }

    pub fn from_config(generator: Arc<dyn TextGenerator>, config: &GeminiConfig, retry: RetryPolicy) -> Self {
        Self::new(
            generator,
            retry,
            config.analysis_model.as_deref().unwrap_or(DEFAULT_ANALYSIS_MODEL),
            config
                .recommendation_model
                .as_deref()
                .unwrap_or(DEFAULT_RECOMMENDATION_MODEL),
        )
    }

    #[instrument(skip(self, show), fields(show = %show.name))]
    pub async fn generate_show_analysis(&self, show: &Show) -> Option<ShowAnalysis> {
        let request = GenerationRequest {
            model: self.analysis_model.clone(),
            system_instruction: ANALYST_INSTRUCTION.to_string(),
            prompt: format!(
                "Perform a high-frequency analysis for the series \"{}\".\nContext: {}.\nGenres: {}.",
                show.name,
                show.plain_summary(),
                show.genres.join(", ")
            ),
            response_schema: analysis_schema(),
        };

        let text = match with_retry(self.retry, || self.generator.generate(&request)).await {
            Ok(text) => text,
            Err(e) => {
                error!("Show analysis failed: {}", e);
                return None;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str::<ShowAnalysis>(text) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                error!("Show analysis had unexpected shape: {}", e);
                None
            }
        }
    }

    #[instrument(skip(self, shows), fields(count = shows.len()))]
    pub async fn get_ai_recommendation(&self, shows: &[Show]) -> Option<Vec<Recommendation>> {
        if shows.is_empty() {
            return None;
        }

        let names = shows
            .iter()
            .take(RECOMMENDATION_INPUT_LIMIT)
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let request = GenerationRequest {
            model: self.recommendation_model.clone(),
            system_instruction: CURATOR_INSTRUCTION.to_string(),
            prompt: format!(
                "Based on this user's watchlist: {}, curate exactly 8 premium recommendations.\nFocus on shows that match the tone, complexity, and genre profile of their list.",
                names
            ),
            response_schema: recommendation_schema(),
        };

        let text = match with_retry(self.retry, || self.generator.generate(&request)).await {
            Ok(text) => text,
            Err(e) => {
                error!("Recommendation request failed: {}", e);
                return None;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Some(Vec::new());
        }
        match serde_json::from_str::<RecommendationList>(text) {
            Ok(list) => {
                info!("Received {} recommendations", list.recommendations.len());
                Some(list.recommendations)
            }
            Err(e) => {
                error!("Recommendations had unexpected shape: {}", e);
                None
            }
        }
    }
}

/// Shows highlighted on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Featured {
    pub shows: Vec<Show>,
    /// True when the shows come from personalized AI recommendations.
    pub personalized: bool,
}

/// Resolves AI recommendations for `tracked` into catalog shows, falling back
/// to the top rated list when there is nothing personal to offer.
pub async fn featured_shows(
    catalog: &dyn CatalogClient,
    engine: Option<&RecommendationEngine>,
    tracked: &[Show],
) -> Result<Featured> {
    if let Some(engine) = engine {
        let recommendations = engine.get_ai_recommendation(tracked).await.unwrap_or_default();
        let mut shows = Vec::new();
        for recommendation in recommendations {
            match catalog.search_shows(&recommendation.title).await {
                Ok(results) => {
                    if let Some(first) = results.into_iter().next() {
                        shows.push(first.show);
                    }
                }
                Err(e) => warn!("Could not resolve '{}': {}", recommendation.title, e),
            }
            if shows.len() >= FEATURED_LIMIT {
                break;
            }
        }

        if !shows.is_empty() {
            return Ok(Featured {
                shows,
                personalized: true,
            });
        }
    }

    let shows = catalog
        .get_schedule()
        .await?
        .into_iter()
        .take(FEATURED_LIMIT)
        .map(|r| r.show)
        .collect();
    Ok(Featured {
        shows,
        personalized: false,
    })
}

fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "whyWatch": {
                "type": "STRING",
                "description": "A compelling paragraph on why this show is worth the user's time."
            },
            "similarShows": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "3 show titles that share the same DNA"
            },
            "targetAudience": {
                "type": "STRING",
                "description": "Define the specific niche of fans who would love this."
            },
            "aiRating": {
                "type": "NUMBER",
                "description": "A score from 1.0 to 10.0 based on critical reception and genre impact"
            }
        },
        "required": ["whyWatch", "similarShows", "targetAudience", "aiRating"]
    })
}

fn recommendation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "recommendations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING", "description": "Exact show title" },
                        "reason": {
                            "type": "STRING",
                            "description": "One-sentence personalized reason why it matches their taste"
                        },
                        "matchPercentage": {
                            "type": "INTEGER",
                            "description": "Match percentage (1-100)"
                        }
                    },
                    "required": ["title", "reason", "matchPercentage"]
                }
            }
        },
        "required": ["recommendations"]
    })
}
