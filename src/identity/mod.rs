use crate::config::FirebaseConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::models::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
/// Tokens are renewed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Authenticates users and broadcasts identity changes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Receives the current identity, then every change. `None` means
    /// signed out.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_in(&self) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;
}

/// Bearer tokens for services called on the signed-in user's behalf.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current token, renewed first when it is close to expiry.
    async fn token(&self) -> Result<String>;

    /// Renews the token regardless of its expiry, e.g. after a 401.
    async fn refresh(&self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Credentials {
    fn new(id_token: String, refresh_token: String, expires_in: &str, now: DateTime<Utc>) -> Self {
        let lifetime = expires_in.parse::<i64>().unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            id_token,
            refresh_token,
            expires_at: now + Duration::seconds(lifetime),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// E-mail/password sign-in against Firebase Authentication.
pub struct FirebaseAuth {
    http: HttpClient,
    config: FirebaseConfig,
    credentials: RwLock<Option<Credentials>>,
    /// Serializes token renewals.
    renewing: Mutex<()>,
    events: watch::Sender<Option<Identity>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
    email: Option<String>,
    display_name: Option<String>,
    profile_picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
}

impl FirebaseAuth {
    pub fn new(http: HttpClient, config: FirebaseConfig) -> Self {
        let (events, _) = watch::channel(None);
        Self {
            http,
            config,
            credentials: RwLock::new(None),
            renewing: Mutex::new(()),
            events,
        }
    }

    fn current(&self) -> Option<Credentials> {
        self.credentials.read().ok().and_then(|c| c.clone())
    }

    fn store(&self, credentials: Option<Credentials>) {
        if let Ok(mut slot) = self.credentials.write() {
            *slot = credentials;
        }
    }

    fn keyed_url(&self, base: &str) -> String {
        format!("{}?key={}", base, urlencoding::encode(&self.config.api_key))
    }

    #[instrument(skip(self))]
    async fn renew(&self) -> Result<String> {
        let credentials = self.current().ok_or(Error::AuthenticationRequired)?;
        debug!("Renewing token that expires at {}", credentials.expires_at);

        let url = self.keyed_url(SECURE_TOKEN_URL);
        let request = self
            .http
            .request(reqwest::Method::POST, &url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.as_str()),
            ]);
        let response: RefreshResponse = self
            .http
            .send_json(request, &url)
            .await
            .map_err(|e| auth_error("token refresh", e))?;

        let renewed = Credentials::new(
            response.id_token,
            response.refresh_token,
            &response.expires_in,
            Utc::now(),
        );
        let token = renewed.id_token.clone();
        self.store(Some(renewed));
        info!("Renewed sign-in token");
        Ok(token)
    }
}

fn auth_error(action: &str, error: Error) -> Error {
    match error {
        Error::Status { status, .. } => {
            warn!("{} rejected with status {}", action, status);
            Error::Authentication(format!("{} rejected ({})", action, status))
        }
        Error::Http(e) => Error::Authentication(e.without_url().to_string()),
        e => Error::Authentication(e.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.events.subscribe()
    }

    #[instrument(skip(self))]
    async fn sign_in(&self) -> Result<Identity> {
        info!("Signing in as {}", self.config.email);

        let body = SignInRequest {
            email: &self.config.email,
            password: &self.config.password,
            return_secure_token: true,
        };
        let url = self.keyed_url(IDENTITY_TOOLKIT_URL);
        let response: SignInResponse = self
            .http
            .post_json(&url, &body)
            .await
            .map_err(|e| auth_error("sign-in", e))?;

        let identity = Identity::new(
            response.local_id,
            response.display_name,
            response.email.or_else(|| Some(self.config.email.clone())),
            response.profile_picture,
        );
        self.store(Some(Credentials::new(
            response.id_token,
            response.refresh_token,
            &response.expires_in,
            Utc::now(),
        )));
        self.events.send_replace(Some(identity.clone()));

        info!("Signed in as {}", identity.display_name);
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.store(None);
        self.events.send_replace(None);
        info!("Signed out");
        Ok(())
    }
}

#[async_trait]
impl TokenSource for FirebaseAuth {
    async fn token(&self) -> Result<String> {
        let credentials = self.current().ok_or(Error::AuthenticationRequired)?;
        if credentials.is_fresh(Utc::now()) {
            return Ok(credentials.id_token);
        }

        let _guard = self.renewing.lock().await;
        // Another caller may have renewed while this one waited.
        match self.current() {
            Some(current) if current.is_fresh(Utc::now()) => Ok(current.id_token),
            _ => self.renew().await,
        }
    }

    async fn refresh(&self) -> Result<String> {
        let _guard = self.renewing.lock().await;
        self.renew().await
    }
}

/// Fixed identity for running without an identity provider.
pub struct LocalIdentity {
    identity: Identity,
    events: watch::Sender<Option<Identity>>,
}

impl LocalIdentity {
    pub fn new(identity: Identity) -> Self {
        let (events, _) = watch::channel(None);
        Self { identity, events }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.events.subscribe()
    }

    async fn sign_in(&self) -> Result<Identity> {
        self.events.send_replace(Some(self.identity.clone()));
        Ok(self.identity.clone())
    }

    async fn sign_out(&self) -> Result<()> {
        self.events.send_replace(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_identity_emits_changes() {
        let provider = LocalIdentity::new(Identity::new("local", Some("Me".to_string()), None, None));
        let mut events = provider.subscribe();
        assert!(events.borrow().is_none());

        let identity = provider.sign_in().await.unwrap();
        events.changed().await.unwrap();
        assert_eq!(events.borrow_and_update().as_ref(), Some(&identity));

        provider.sign_out().await.unwrap();
        events.changed().await.unwrap();
        assert!(events.borrow().is_none());
    }

    fn firebase() -> FirebaseAuth {
        let config = FirebaseConfig {
            api_key: "key".to_string(),
            project_id: "tuned".to_string(),
            email: "me@example.com".to_string(),
            password: "secret".to_string(),
        };
        FirebaseAuth::new(HttpClient::new().unwrap(), config)
    }

    #[test]
    fn test_sign_in_response_shape() {
        let json = r#"{"kind":"identitytoolkit#VerifyPasswordResponse","localId":"abc","email":"a@b.c","displayName":"","idToken":"tok","refreshToken":"ref","expiresIn":"3600","registered":true}"#;
        let response: SignInResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.local_id, "abc");
        assert_eq!(response.refresh_token, "ref");
        assert_eq!(response.expires_in, "3600");
        assert_eq!(response.display_name.as_deref(), Some(""));
    }

    #[test]
    fn test_refresh_response_shape() {
        let json = r#"{"expires_in":"3600","token_type":"Bearer","refresh_token":"ref-2","id_token":"tok-2","user_id":"abc","project_id":"1"}"#;
        let response: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.id_token, "tok-2");
        assert_eq!(response.refresh_token, "ref-2");
    }

    #[test]
    fn test_credentials_renewed_before_expiry() {
        let now = Utc::now();
        let credentials = Credentials::new("tok".to_string(), "ref".to_string(), "3600", now);

        assert!(credentials.is_fresh(now));
        assert!(credentials.is_fresh(now + Duration::minutes(54)));
        assert!(!credentials.is_fresh(now + Duration::minutes(56)));
        assert!(!credentials.is_fresh(now + Duration::hours(2)));

        let fallback = Credentials::new("tok".to_string(), "ref".to_string(), "", now);
        assert_eq!(fallback.expires_at, now + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_fresh_token_served_from_memory() {
        let auth = firebase();
        auth.store(Some(Credentials::new(
            "tok".to_string(),
            "ref".to_string(),
            "3600",
            Utc::now(),
        )));

        assert_eq!(auth.token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_token_requires_sign_in() {
        let auth = firebase();
        auth.store(Some(Credentials::new(
            "tok".to_string(),
            "ref".to_string(),
            "3600",
            Utc::now(),
        )));
        auth.sign_out().await.unwrap();

        assert!(matches!(auth.token().await, Err(Error::AuthenticationRequired)));
        assert!(matches!(auth.refresh().await, Err(Error::AuthenticationRequired)));
    }
}
