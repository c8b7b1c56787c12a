use crate::config::FirebaseConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::identity::TokenSource;
use crate::models::{Notification, UserData, WatchlistItem};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Durable per-user storage for the watchlist and notifications.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Empty collections when nothing is on record for `uid`.
    async fn get_user_data(&self, uid: &str) -> Result<UserData>;

    /// Overwrites the stored collections for `uid` with the given snapshot.
    async fn save_user_data(
        &self,
        uid: &str,
        watchlist: &[WatchlistItem],
        notifications: &[Notification],
    ) -> Result<()>;
}

/// Cloud Firestore document store, one `users/{uid}` document per user.
pub struct FirestoreStore {
    http: HttpClient,
    project_id: String,
    tokens: Arc<dyn TokenSource>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    fields: HashMap<String, FieldValue>,
}

/// Typed Firestore value; only the kinds this store writes are read back.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp_value: Option<String>,
}

impl FieldValue {
    fn string(value: String) -> Self {
        Self {
            string_value: Some(value),
            ..Self::default()
        }
    }

    fn timestamp(value: String) -> Self {
        Self {
            timestamp_value: Some(value),
            ..Self::default()
        }
    }
}

impl FirestoreStore {
    pub fn new(http: HttpClient, config: &FirebaseConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            project_id: config.project_id.clone(),
            tokens,
        }
    }

    fn document_url(&self, uid: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/users/{}",
            FIRESTORE_URL,
            self.project_id,
            urlencoding::encode(uid)
        )
    }

    /// Sends an authorized request, renewing the token and retrying once
    /// when it is rejected.
    async fn send_authorized<T, F>(&self, method: Method, url: &str, prepare: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let token = self.tokens.token().await?;
        let request = prepare(self.http.request(method.clone(), url).bearer_auth(token));
        match self.http.send_json(request, url).await {
            Err(Error::Status { status, .. }) if status == StatusCode::UNAUTHORIZED => {
                warn!("Token rejected, renewing");
                let token = self.tokens.refresh().await?;
                let request = prepare(self.http.request(method, url).bearer_auth(token));
                self.http.send_json(request, url).await
            }
            result => result,
        }
    }
}

#[async_trait]
impl RemoteStore for FirestoreStore {
    #[instrument(skip(self))]
    async fn get_user_data(&self, uid: &str) -> Result<UserData> {
        if uid.is_empty() {
            return Ok(UserData::default());
        }

        let url = self.document_url(uid);
        let document: Document = match self.send_authorized(Method::GET, &url, |r| r).await {
            Ok(document) => document,
            Err(Error::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                debug!("No stored data for user");
                return Ok(UserData::default());
            }
            Err(e) => return Err(e),
        };

        let data = decode_document(&document)?;
        info!(
            "Loaded {} watchlist items and {} notifications",
            data.watchlist.len(),
            data.notifications.len()
        );
        Ok(data)
    }

    #[instrument(skip(self, watchlist, notifications))]
    async fn save_user_data(
        &self,
        uid: &str,
        watchlist: &[WatchlistItem],
        notifications: &[Notification],
    ) -> Result<()> {
        if uid.is_empty() {
            return Ok(());
        }

        let url = self.document_url(uid);
        let document = encode_document(watchlist, notifications)?;
        self.send_authorized::<serde_json::Value, _>(Method::PATCH, &url, |request| {
            request
                .query(&[
                    ("updateMask.fieldPaths", "watchlist"),
                    ("updateMask.fieldPaths", "notifications"),
                    ("updateMask.fieldPaths", "lastUpdated"),
                ])
                .json(&document)
        })
        .await?;
        debug!("Saved {} watchlist items", watchlist.len());
        Ok(())
    }
}

fn encode_document(watchlist: &[WatchlistItem], notifications: &[Notification]) -> Result<Document> {
    let mut fields = HashMap::new();
    fields.insert(
        "watchlist".to_string(),
        FieldValue::string(serde_json::to_string(watchlist)?),
    );
    fields.insert(
        "notifications".to_string(),
        FieldValue::string(serde_json::to_string(notifications)?),
    );
    fields.insert(
        "lastUpdated".to_string(),
        FieldValue::timestamp(Utc::now().to_rfc3339()),
    );
    Ok(Document { fields })
}

fn decode_document(document: &Document) -> Result<UserData> {
    let mut data = UserData::default();
    if let Some(json) = document.fields.get("watchlist").and_then(|f| f.string_value.as_ref()) {
        data.watchlist = serde_json::from_str(json)?;
    }
    if let Some(json) = document.fields.get("notifications").and_then(|f| f.string_value.as_ref()) {
        data.notifications = serde_json::from_str(json)?;
    }
    Ok(data)
}

/// Process-local store, used when no cloud backend is configured.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserData>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(uid: &str, data: UserData) -> Self {
        let store = Self::default();
        if let Ok(mut users) = store.users.lock() {
            users.insert(uid.to_string(), data);
        }
        store
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|saves| *saves).unwrap_or(0)
    }

    pub fn stored(&self, uid: &str) -> Option<UserData> {
        self.users.lock().ok().and_then(|users| users.get(uid).cloned())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_user_data(&self, uid: &str) -> Result<UserData> {
        let users = self
            .users
            .lock()
            .map_err(|_| Error::InvalidResponse("memory store poisoned".to_string()))?;
        Ok(users.get(uid).cloned().unwrap_or_default())
    }

    async fn save_user_data(
        &self,
        uid: &str,
        watchlist: &[WatchlistItem],
        notifications: &[Notification],
    ) -> Result<()> {
        if uid.is_empty() {
            return Ok(());
        }

        let mut users = self
            .users
            .lock()
            .map_err(|_| Error::InvalidResponse("memory store poisoned".to_string()))?;
        users.insert(
            uid.to_string(),
            UserData {
                watchlist: watchlist.to_vec(),
                notifications: notifications.to_vec(),
            },
        );
        drop(users);

        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Show;

    fn item(id: u32) -> WatchlistItem {
        let show: Show = serde_json::from_str(&format!(r#"{{"id": {}, "name": "Show {}"}}"#, id, id)).unwrap();
        WatchlistItem::new(show, Utc::now())
    }

    #[test]
    fn test_document_encoding() {
        let watchlist = vec![item(1), item(2)];
        let document = encode_document(&watchlist, &[]).unwrap();

        let json = serde_json::to_value(&document).unwrap();
        assert!(json["fields"]["watchlist"]["stringValue"].is_string());
        assert!(json["fields"]["lastUpdated"]["timestampValue"].is_string());

        let decoded = decode_document(&document).unwrap();
        assert_eq!(decoded.watchlist, watchlist);
        assert!(decoded.notifications.is_empty());
    }

    #[test]
    fn test_document_with_unknown_fields() {
        let json = r#"{
            "name": "projects/p/databases/(default)/documents/users/u1",
            "fields": {
                "legacy": {"integerValue": "4"},
                "notifications": {"stringValue": "[]"}
            }
        }"#;
        let document: Document = serde_json::from_str(json).unwrap();
        let data = decode_document(&document).unwrap();
        assert!(data.watchlist.is_empty());
    }

    struct SignedOut;

    #[async_trait]
    impl TokenSource for SignedOut {
        async fn token(&self) -> Result<String> {
            Err(Error::AuthenticationRequired)
        }

        async fn refresh(&self) -> Result<String> {
            Err(Error::AuthenticationRequired)
        }
    }

    fn firestore() -> FirestoreStore {
        let config = FirebaseConfig {
            api_key: "key".to_string(),
            project_id: "tuned".to_string(),
            email: "me@example.com".to_string(),
            password: "secret".to_string(),
        };
        FirestoreStore::new(HttpClient::new().unwrap(), &config, Arc::new(SignedOut))
    }

    #[tokio::test]
    async fn test_firestore_requires_token() {
        let store = firestore();

        assert!(matches!(store.get_user_data("u1").await, Err(Error::AuthenticationRequired)));
        assert!(matches!(
            store.save_user_data("u1", &[item(1)], &[]).await,
            Err(Error::AuthenticationRequired)
        ));
        assert_eq!(store.get_user_data("").await.unwrap(), UserData::default());
        assert!(store.save_user_data("", &[item(1)], &[]).await.is_ok());
    }

    #[test]
    fn test_document_url_escapes_uid() {
        assert_eq!(
            firestore().document_url("a/b"),
            "https://firestore.googleapis.com/v1/projects/tuned/databases/(default)/documents/users/a%2Fb"
        );
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_user_data("u1").await.unwrap(), UserData::default());

        store.save_user_data("u1", &[item(5)], &[]).await.unwrap();
        store.save_user_data("", &[item(6)], &[]).await.unwrap();

        let data = store.get_user_data("u1").await.unwrap();
        assert_eq!(data.watchlist.len(), 1);
        assert_eq!(store.save_count(), 1);
    }
}
