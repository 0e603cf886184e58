//! Transport: executes wire requests
//!
//! The store never retries; a failed request is reported through the
//! request's completion.

use super::types::{Method, WireRequest, WireResponse};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Errors from executing a wire request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    Request(String),
}

/// Executes wire requests asynchronously
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError>;
}

/// JSON-over-HTTP transport built on reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mirrorgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            base: normalize_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        join(&self.base, path)
    }
}

fn normalize_base(base_url: &str) -> Result<Url, TransportError> {
    let mut base = Url::parse(base_url).map_err(|e| TransportError::Request(e.to_string()))?;
    // Url::join replaces the last segment unless the base ends with '/'.
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn join(base: &Url, path: &str) -> Result<Url, TransportError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| TransportError::Request(e.to_string()))
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn send_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() {
        TransportError::Connection(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        tracing::debug!(method = %request.method, %url, "sending request");

        let mut builder = self
            .client
            .request(http_method(request.method), url)
            .header(reqwest::header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Request(e.to_string()))?;
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
        }

        let response = builder.send().await.map_err(send_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let bytes = response.bytes().await.map_err(send_error)?;

        if !(200..300).contains(&status) {
            let message = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            return Err(TransportError::Status { status, message });
        }

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?
        };
        Ok(WireResponse {
            status,
            body,
            headers,
        })
    }
}
