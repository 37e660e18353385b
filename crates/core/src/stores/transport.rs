//! Blocking JSON-over-HTTP seam shared by the client/server adapters.

use crate::error::StoreError;
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Body of a 2xx response, otherwise a backend error carrying the status.
    pub fn into_success(self, backend: &str, operation: &str) -> Result<Value, StoreError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(StoreError::backend(
                backend,
                format!("{operation} returned {}: {}", self.status, self.body),
            ))
        }
    }
}

pub trait HttpTransport: Send + Sync {
    /// Transport-level failures (connect, timeout, TLS) are errors; any HTTP
    /// status is returned as a response.
    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<HttpResponse, StoreError>;
}

pub struct ReqwestTransport {
    base: Url,
    client: Client,
    headers: Vec<(String, String)>,
}

impl ReqwestTransport {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: Url::parse(base)?,
            client,
            headers: Vec::new(),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<HttpResponse, StoreError> {
        let url = self.base.join(path)?;
        let mut request = self.client.request(method, url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let raw = response.text()?;
        let body = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        };

        Ok(HttpResponse { status, body })
    }
}
