//! Scripted transport for testing
//!
//! Routes are keyed by method and exact URL, optionally narrowed by a
//! parameter whose value must contain a given substring (for telling a
//! `fields=status_code` poll apart from a `fields=...permalink_url...`
//! lookup on the same object). Each route replays its replies in order and
//! repeats the last one once the script runs out. Unmatched requests get a
//! Graph-style 404 error body. A hung endpoint records the request and
//! never answers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::{HttpReply, HttpTransport, Method};
use crate::error::TransportError;

/// One request seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    /// Query parameters for GET, form fields for form POSTs
    pub params: Vec<(String, String)>,
    pub json: Option<Value>,
    pub bearer: Option<String>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct Route {
    method: Method,
    url: String,
    param: Option<(String, String)>,
    replies: VecDeque<Result<HttpReply, TransportError>>,
}

impl Route {
    fn matches(&self, method: Method, url: &str, params: &[(String, String)]) -> bool {
        if self.method != method || self.url != url {
            return false;
        }
        match &self.param {
            None => true,
            Some((key, needle)) => params.iter().any(|(k, v)| k == key && v.contains(needle.as_str())),
        }
    }

    fn next_reply(&mut self) -> Result<HttpReply, TransportError> {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or_else(|| Ok(not_found_reply(self.method, &self.url)))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(not_found_reply(self.method, &self.url)))
        }
    }
}

fn not_found_reply(method: Method, url: &str) -> HttpReply {
    HttpReply::new(
        404,
        json!({"error": {"message": format!("no mock route for {} {}", method, url), "code": 404}}),
    )
}

/// Scripted [`HttpTransport`]
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    hangs: Mutex<Vec<(Method, String)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a sequence of replies for `method url`
    pub fn route(
        &self,
        method: Method,
        url: impl Into<String>,
        replies: Vec<Result<HttpReply, TransportError>>,
    ) -> &Self {
        self.push_route(method, url.into(), None, replies)
    }

    /// Script replies for requests whose `key` parameter contains `needle`
    pub fn route_with_param(
        &self,
        method: Method,
        url: impl Into<String>,
        key: &str,
        needle: &str,
        replies: Vec<Result<HttpReply, TransportError>>,
    ) -> &Self {
        self.push_route(
            method,
            url.into(),
            Some((key.to_string(), needle.to_string())),
            replies,
        )
    }

    /// Always answer `method url` with `reply`
    pub fn reply(&self, method: Method, url: impl Into<String>, reply: HttpReply) -> &Self {
        self.route(method, url, vec![Ok(reply)])
    }

    /// Requests to `method url` never complete
    pub fn hang(&self, method: Method, url: impl Into<String>) -> &Self {
        lock(&self.hangs).push((method, url.into()));
        self
    }

    fn push_route(
        &self,
        method: Method,
        url: String,
        param: Option<(String, String)>,
        replies: Vec<Result<HttpReply, TransportError>>,
    ) -> &Self {
        lock(&self.routes).push(Route {
            method,
            url,
            param,
            replies: replies.into(),
        });
        self
    }

    /// Every request seen so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Number of requests to `method url`
    pub fn count(&self, method: Method, url: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method && c.url == url)
            .count()
    }

    /// Number of requests to `method url` whose `key` parameter contains `needle`
    pub fn count_with_param(&self, method: Method, url: &str, key: &str, needle: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method && c.url == url)
            .filter(|c| c.param(key).map(|v| v.contains(needle)).unwrap_or(false))
            .count()
    }

    async fn respond(&self, call: RecordedCall) -> Result<HttpReply, TransportError> {
        let hung = lock(&self.hangs)
            .iter()
            .any(|(method, url)| *method == call.method && *url == call.url);
        if hung {
            lock(&self.calls).push(call);
            return std::future::pending().await;
        }
        self.dispatch(call)
    }

    fn dispatch(&self, call: RecordedCall) -> Result<HttpReply, TransportError> {
        let reply = {
            let mut routes = lock(&self.routes);
            // Parameter-constrained routes are more specific and win
            let index = routes
                .iter()
                .position(|r| r.param.is_some() && r.matches(call.method, &call.url, &call.params))
                .or_else(|| {
                    routes
                        .iter()
                        .position(|r| r.param.is_none() && r.matches(call.method, &call.url, &call.params))
                });
            match index {
                Some(i) => routes[i].next_reply(),
                None => Ok(not_found_reply(call.method, &call.url)),
            }
        };
        lock(&self.calls).push(call);
        reply
    }
}

fn owned(params: &[(&str, &str)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpReply, TransportError> {
        self.respond(RecordedCall {
            method: Method::Get,
            url: url.to_string(),
            params: owned(query),
            json: None,
            bearer: None,
        })
        .await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpReply, TransportError> {
        self.respond(RecordedCall {
            method: Method::Post,
            url: url.to_string(),
            params: owned(form),
            json: None,
            bearer: None,
        })
        .await
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> Result<HttpReply, TransportError> {
        self.respond(RecordedCall {
            method: Method::Post,
            url: url.to_string(),
            params: Vec::new(),
            json: Some(body.clone()),
            bearer: bearer.map(str::to_string),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_repeat_last() {
        let mock = MockTransport::new();
        mock.route(
            Method::Get,
            "https://x/1",
            vec![
                Ok(HttpReply::ok(json!({"n": 1}))),
                Ok(HttpReply::ok(json!({"n": 2}))),
            ],
        );

        let a = mock.get("https://x/1", &[]).await.unwrap();
        let b = mock.get("https://x/1", &[]).await.unwrap();
        let c = mock.get("https://x/1", &[]).await.unwrap();
        assert_eq!(a.body["n"], 1);
        assert_eq!(b.body["n"], 2);
        assert_eq!(c.body["n"], 2);
        assert_eq!(mock.count(Method::Get, "https://x/1"), 3);
    }

    #[tokio::test]
    async fn test_param_routes_take_precedence() {
        let mock = MockTransport::new();
        mock.reply(Method::Get, "https://x/1", HttpReply::ok(json!({"kind": "plain"})));
        mock.route_with_param(
            Method::Get,
            "https://x/1",
            "fields",
            "status_code",
            vec![Ok(HttpReply::ok(json!({"kind": "status"})))],
        );

        let status = mock.get("https://x/1", &[("fields", "status_code")]).await.unwrap();
        let plain = mock.get("https://x/1", &[("fields", "id,permalink_url")]).await.unwrap();
        assert_eq!(status.body["kind"], "status");
        assert_eq!(plain.body["kind"], "plain");
        assert_eq!(mock.count_with_param(Method::Get, "https://x/1", "fields", "status"), 1);
    }

    #[tokio::test]
    async fn test_unmatched_is_404() {
        let mock = MockTransport::new();
        let reply = mock.post_form("https://x/none", &[("a", "b")]).await.unwrap();
        assert_eq!(reply.status, 404);
        assert_eq!(mock.calls()[0].param("a"), Some("b"));
    }

    #[tokio::test]
    async fn test_hung_route_never_answers() {
        let mock = MockTransport::new();
        mock.hang(Method::Post, "https://x/slow");
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            mock.post_form("https://x/slow", &[]),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(mock.count(Method::Post, "https://x/slow"), 1);
    }

    #[tokio::test]
    async fn test_scripted_transport_error() {
        let mock = MockTransport::new();
        mock.route(
            Method::Post,
            "https://x/json",
            vec![Err(TransportError::Request("connection reset".to_string()))],
        );
        let err = mock
            .post_json("https://x/json", Some("tok"), &json!({"path": "/a"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(mock.calls()[0].bearer.as_deref(), Some("tok"));
    }
}
