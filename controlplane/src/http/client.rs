//! HTTP client shared by the REST backends

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::PlatformError;
use crate::version::user_agent;

/// HTTP client for one backend service
pub struct HttpClient {
    client: Client,
    base_url: String,
    service: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(service: &str, base_url: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service: service.to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(request: RequestBuilder, token: &SecretString) -> RequestBuilder {
        request.header(
            header::AUTHORIZATION,
            format!("Bearer {}", token.expose_secret()),
        )
    }

    async fn send(
        &self,
        method: &str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Response, PlatformError> {
        debug!("{} {}", method, url);
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} {} failed: {} - {}", method, url, status, body);
            return Err(PlatformError::backend(
                &self.service,
                format!("{}: {}", status, body),
            ));
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &SecretString,
    ) -> Result<T, PlatformError> {
        let url = self.url(path);
        let request = Self::authorize(self.client.get(&url), token);
        let response = self.send("GET", &url, request).await?;
        Ok(response.json().await?)
    }

    /// Make a GET request, mapping 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &SecretString,
    ) -> Result<Option<T>, PlatformError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = Self::authorize(self.client.get(&url), token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET {} failed: {} - {}", url, status, body);
            return Err(PlatformError::backend(
                &self.service,
                format!("{}: {}", status, body),
            ));
        }

        Ok(Some(response.json().await?))
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        token: &SecretString,
        body: &B,
    ) -> Result<T, PlatformError> {
        let url = self.url(path);
        let request = Self::authorize(self.client.post(&url), token).json(body);
        let response = self.send("POST", &url, request).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request whose response body is ignored
    pub async fn post_unit<B: Serialize>(
        &self,
        path: &str,
        token: &SecretString,
        body: &B,
    ) -> Result<(), PlatformError> {
        let url = self.url(path);
        let request = Self::authorize(self.client.post(&url), token).json(body);
        self.send("POST", &url, request).await?;
        Ok(())
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        token: &SecretString,
        body: &B,
    ) -> Result<T, PlatformError> {
        let url = self.url(path);
        let request = Self::authorize(self.client.patch(&url), token).json(body);
        let response = self.send("PATCH", &url, request).await?;
        Ok(response.json().await?)
    }

    /// Make a DELETE request; 404 counts as success
    pub async fn delete(&self, path: &str, token: &SecretString) -> Result<(), PlatformError> {
        let url = self.url(path);
        debug!("DELETE {}", url);
        let response = Self::authorize(self.client.delete(&url), token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("HTTP DELETE {} failed: {} - {}", url, status, body);
        Err(PlatformError::backend(
            &self.service,
            format!("{}: {}", status, body),
        ))
    }
}

/// Percent-encode one path segment
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
