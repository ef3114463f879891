//! Generic REST client used by the exchange gateway.

use crate::error::RestError;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client bound to a base URL.
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Build a client for `base_url` with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn with_default_timeout(base_url: &str) -> Result<Self, RestError> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET returning deserialized JSON.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request_json(Method::GET, path, query, headers).await
    }

    /// POST returning deserialized JSON.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request_json(Method::POST, path, query, headers).await
    }

    /// DELETE returning deserialized JSON.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        self.request_json(Method::DELETE, path, query, headers)
            .await
    }

    /// PUT where the response body is ignored.
    pub async fn put_empty(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<(), RestError> {
        let response = self.send(Method::PUT, path, query, headers).await?;
        Self::check_status(response).await.map(|_| ())
    }

    /// DELETE where the response body is ignored.
    pub async fn delete_empty(
        &self,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<(), RestError> {
        let response = self.send(Method::DELETE, path, query, headers).await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<T, RestError> {
        let response = self.send(method, path, query, headers).await?;
        let body = Self::check_status(response).await?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(body = %body, error = %e, "failed to parse response body");
            RestError::Parse(e.to_string())
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: Option<&[(&str, &str)]>,
    ) -> Result<Response, RestError> {
        let url = self.build_url(path, query);
        tracing::debug!(method = %method, url = %url, "HTTP request");

        let mut request = self.client.request(method, &url);
        if let Some(headers) = headers {
            for (key, value) in headers {
                request = request.header(*key, *value);
            }
        }

        Ok(request.send().await?)
    }

    /// Returns the body on success, or an [`RestError::Http`] carrying
    /// the raw error body so callers can extract exchange error codes.
    async fn check_status(response: Response) -> Result<String, RestError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(body)
        } else {
            Err(RestError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn build_url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        }
    }
}
