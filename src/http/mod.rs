use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("tuned/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("Making GET request");
        let response = self.client.get(url).send().await?;
        check_status(response, url)
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        let json = response.json::<T>().await?;
        Ok(json)
    }

    #[instrument(skip(self, query), fields(url = %url))]
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!("Making GET request with query");
        let response = self.client.get(url).query(query).send().await?;
        let json = check_status(response, url)?.json::<T>().await?;
        Ok(json)
    }

    #[instrument(skip(self, body), fields(url = %url))]
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        debug!("Making POST request");
        let response = self.client.post(url).json(body).send().await?;
        let json = check_status(response, url)?.json::<T>().await?;
        Ok(json)
    }

    /// Sends an already-built request, mapping the response status the same
    /// way as the convenience helpers.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<T> {
        let response = request.send().await?;
        let json = check_status(response, url)?.json::<T>().await?;
        Ok(json)
    }

    pub fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }
}

fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Rate limited by {}", url);
        return Err(Error::RateLimited);
    }

    if !status.is_success() {
        error!("HTTP request failed with status: {}", status);
        return Err(Error::Status {
            status,
            url: url.to_string(),
        });
    }

    Ok(response)
}
