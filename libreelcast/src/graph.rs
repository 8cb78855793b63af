//! Shared helpers for the Meta Graph API

use std::sync::Arc;

use crate::config::GraphConfig;
use crate::transport::{HttpReply, HttpTransport};

/// Versioned Graph API endpoint plus the transport used to reach it
#[derive(Clone)]
pub struct GraphApi {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    version: String,
}

impl GraphApi {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &GraphConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            version: config.version.clone(),
        }
    }

    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    /// `{base}/{version}/{path}`
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.version, path.trim_start_matches('/'))
    }

    /// Unversioned `{base}/{path}` (used by `debug_token`)
    pub fn root_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Human-readable description of a Graph error reply.
///
/// ```
/// use libreelcast::graph::error_detail;
/// use libreelcast::transport::HttpReply;
/// use serde_json::json;
///
/// let reply = HttpReply::new(400, json!({"error": {"message": "Invalid parameter", "code": 100}}));
/// assert_eq!(error_detail(&reply), "Invalid parameter (code 100, status 400)");
/// ```
pub fn error_detail(reply: &HttpReply) -> String {
    let error = reply.body.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error");
    let code = error
        .and_then(|e| e.get("code"))
        .map(|c| c.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    match error.and_then(|e| e.get("error_subcode")) {
        Some(subcode) => format!(
            "{} (code {}, subcode {}, status {})",
            message, code, subcode, reply.status
        ),
        None => format!("{} (code {}, status {})", message, code, reply.status),
    }
}
