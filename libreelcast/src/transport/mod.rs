//! HTTP transport seam
//!
//! Every outbound call (Graph API, Dropbox, Telegram) goes through
//! [`HttpTransport`]. Production code uses [`http::ReqwestTransport`];
//! integration tests script replies with [`mock::MockTransport`].

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{PublishError, TransportError};

pub mod http;

// Mock transport is available for all builds (not just tests) to support integration tests
pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Status and decoded JSON body of one response.
///
/// An empty body decodes to `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Value,
}

impl HttpReply {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// String field at the top level of the body; numeric ids are stringified
    pub fn str_field(&self, name: &str) -> Option<String> {
        match self.body.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET with query parameters
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpReply, TransportError>;

    /// POST an `application/x-www-form-urlencoded` body
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpReply, TransportError>;

    /// POST a JSON body, optionally with a bearer token
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> Result<HttpReply, TransportError>;
}

/// Run `fut` to completion unless `cancel` fires first (`None`)
pub async fn until_cancelled<F>(cancel: &CancellationToken, fut: F) -> Option<F::Output>
where
    F: std::future::Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

/// Race a destination call against cancellation
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, PublishError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    until_cancelled(cancel, fut)
        .await
        .ok_or(PublishError::Cancelled)?
        .map_err(PublishError::from)
}

/// Sleep for `duration` unless cancelled first
pub async fn pause(cancel: &CancellationToken, duration: std::time::Duration) -> Result<(), PublishError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PublishError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
