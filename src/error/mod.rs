use reqwest::StatusCode;

/// Errors raised by the tracker core and its collaborators
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Sign-in required")]
    AuthenticationRequired,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by remote service")]
    RateLimited,

    #[error("HTTP request to {url} failed: {status}")]
    Status { status: StatusCode, url: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl Error {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
