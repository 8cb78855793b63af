//! Progress notifications
//!
//! Notifications are fire-and-forget: a notifier that cannot deliver a
//! message logs the failure and returns, it never fails the run. Remote
//! sends are bounded by [`SEND_TIMEOUT`] so a stalled chat API cannot hold
//! a run past its deadline.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::transport::HttpTransport;

/// Longest a single remote notification may take
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, severity: Severity);
}

fn log_message(label: &str, message: &str, severity: Severity) {
    match severity {
        Severity::Info => info!(account = label, "{}", message),
        Severity::Warning => warn!(account = label, "{}", message),
        Severity::Error => error!(account = label, "{}", message),
    }
}

/// Writes notifications to the log only
pub struct LogNotifier {
    label: String,
}

impl LogNotifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        log_message(&self.label, message, severity);
    }
}

/// Sends notifications to a Telegram chat and mirrors them to the log
pub struct TelegramNotifier {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    bot_token: SecretString,
    chat_id: String,
    label: String,
}

impl TelegramNotifier {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: impl Into<String>,
        bot_token: SecretString,
        chat_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token,
            chat_id: chat_id.into(),
            label: label.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        log_message(&self.label, message, severity);

        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token.expose_secret());
        let text = format!("[{}]\n{}", self.label, message);
        let form = [("chat_id", self.chat_id.as_str()), ("text", text.as_str())];
        let send = self.transport.post_form(&url, &form);
        match tokio::time::timeout(SEND_TIMEOUT, send).await {
            Ok(Ok(reply)) if reply.is_success() => {}
            Ok(Ok(reply)) => warn!(status = reply.status, "Telegram rejected notification"),
            Ok(Err(e)) => warn!(error = %e, "Telegram notification failed"),
            Err(_) => warn!(timeout = ?SEND_TIMEOUT, "Telegram notification timed out"),
        }
    }
}

/// Keeps every notification in memory; used by tests and dry runs
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Whether any message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|(_, m)| m.contains(needle))
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages().iter().filter(|(s, _)| *s == severity).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((severity, message.to_string()));
        }
    }
}
