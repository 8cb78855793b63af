//! reqwest-backed transport

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{HttpReply, HttpTransport};
use crate::error::TransportError;

/// Per-request timeout; polling loops bound the total time separately
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("reelcast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<HttpReply, TransportError> {
        let started = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(request_error)?;

        debug!(status, elapsed_ms = started.elapsed().as_millis() as u64, "HTTP response");
        decode_body(status, &bytes)
    }
}

/// reqwest's error text carries the full URL, and with it any
/// `access_token` query parameter or bot token path segment. Drop it.
fn request_error(e: reqwest::Error) -> TransportError {
    let e = e.without_url();
    match std::error::Error::source(&e) {
        Some(source) => TransportError::Request(format!("{}: {}", e, source)),
        None => TransportError::Request(e.to_string()),
    }
}

fn decode_body(status: u16, bytes: &[u8]) -> Result<HttpReply, TransportError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(HttpReply::new(status, Value::Null));
    }
    let body = serde_json::from_slice(bytes).map_err(|e| TransportError::Body {
        status,
        reason: e.to_string(),
    })?;
    Ok(HttpReply::new(status, body))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpReply, TransportError> {
        self.send(self.client.get(url).query(query)).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpReply, TransportError> {
        self.send(self.client.post(url).form(form)).await
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> Result<HttpReply, TransportError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_body_is_null() {
        let reply = decode_body(200, b"  \n").unwrap();
        assert_eq!(reply.body, Value::Null);
    }

    #[test]
    fn test_decode_json_body() {
        let reply = decode_body(400, br#"{"error":{"message":"bad"}}"#).unwrap();
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body["error"]["message"], "bad");
    }

    #[tokio::test]
    async fn test_request_errors_do_not_echo_tokens() {
        let transport = ReqwestTransport::new().unwrap();

        // Nothing listens on port 1
        let err = transport
            .get(
                "http://127.0.0.1:1/v18.0/creation-1",
                &[("fields", "status_code"), ("access_token", "SECRET-PAGE-TOKEN")],
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("SECRET-PAGE-TOKEN"), "{}", message);
        assert!(!message.contains("access_token"), "{}", message);

        let err = transport
            .post_form("http://127.0.0.1:1/botSECRET-BOT-TOKEN/sendMessage", &[("text", "hi")])
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("SECRET-BOT-TOKEN"), "{}", err);
    }

    #[test]
    fn test_decode_html_body_is_transport_error() {
        let err = decode_body(502, b"<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, TransportError::Body { status: 502, .. }));
    }
}
