//! Transport collaborator.
//!
//! # Design
//! `Transport` is the only place where network I/O happens. It executes an
//! `HttpRequest` and hands back the raw `HttpResponse` as data, whatever the
//! status; the client decides what a non-2xx status means. Only failures to
//! obtain a response at all surface as `TransportError`.
//!
//! `HttpTransport` is the reqwest-backed implementation. It attaches the
//! configured bearer token and applies the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Service origin without a trailing slash.
    fn base_url(&self) -> &str;

    /// Versioned API root path that relative operation targets resolve against.
    fn api_root_path(&self) -> &str;

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn base_url(&self) -> &str {
        (**self).base_url()
    }

    fn api_root_path(&self) -> &str {
        (**self).api_root_path()
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_root_path: String,
    access_token: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_root_path", &self.api_root_path)
            .field("has_access_token", &self.access_token.is_some())
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            api_root_path: config.api_root_path(),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_root_path(&self) -> &str {
        &self.api_root_path
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(to_reqwest_method(request.method), &request.path);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(map_reqwest_error)?;

        debug!(status, bytes = body.len(), url = %request.path, "received response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_takes_paths_from_config() {
        let config = ClientConfig::new("http://localhost:3000/")
            .with_api_version("9.0")
            .with_access_token("secret");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:3000");
        assert_eq!(transport.api_root_path(), "/api/data/v9.0");
        assert!(!format!("{transport:?}").contains("secret"));
    }

    #[test]
    fn methods_map_one_to_one() {
        assert_eq!(to_reqwest_method(HttpMethod::Patch), Method::PATCH);
        assert_eq!(to_reqwest_method(HttpMethod::Delete), Method::DELETE);
    }
}
