use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CATALOG_URL: &str = "https://api.tvmaze.com";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_RECOMMENDATION_MODEL: &str = "gemini-3-pro-preview";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    pub catalog: Option<CatalogConfig>,
    pub gemini: Option<GeminiConfig>,
    pub firebase: Option<FirebaseConfig>,
    pub refresh: Option<RefreshConfig>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(rename = "apikey")]
    pub api_key: String,
    #[serde(rename = "analysisModel")]
    pub analysis_model: Option<String>,
    #[serde(rename = "recommendationModel")]
    pub recommendation_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirebaseConfig {
    #[serde(rename = "apikey")]
    pub api_key: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    pub seconds: Option<u64>,
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(rename = "batchPauseMillis")]
    pub batch_pause_millis: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub retries: Option<u32>,
    #[serde(rename = "baseDelayMillis")]
    pub base_delay_millis: Option<u64>,
}

/// Capped exponential backoff used for rate-limited AI calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Configuration = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn catalog_url(&self) -> String {
        self.catalog
            .as_ref()
            .map(|c| c.base_url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(
            self.refresh
                .as_ref()
                .and_then(|r| r.seconds)
                .filter(|seconds| *seconds > 0)
                .unwrap_or(15 * 60)
        )
    }

    pub fn batch_size(&self) -> usize {
        self.refresh
            .as_ref()
            .and_then(|r| r.batch_size)
            .filter(|size| *size > 0)
            .unwrap_or(5)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(
            self.refresh
                .as_ref()
                .and_then(|r| r.batch_pause_millis)
                .unwrap_or(200)
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let Some(ref retry) = self.retry else {
            return defaults;
        };

        RetryPolicy {
            retries: retry.retries.unwrap_or(defaults.retries),
            base_delay: retry
                .base_delay_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        }
    }
}
