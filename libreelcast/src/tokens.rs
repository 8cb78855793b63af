//! Token Provider
//!
//! Resolves the bearer credentials each run needs:
//!
//! - the staging-store (Dropbox) access token, refreshed at the start of
//!   every run from the long-lived refresh token;
//! - page-scoped Graph tokens, resolved by listing the user's manageable
//!   pages and picking the configured one.
//!
//! Page tokens are short-lived and their expiry is not tracked, so they are
//! memoized only inside an [`AssetTokens`] scope, which lives for one
//! asset's orchestration.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, Secrets};
use crate::error::{PublishError, StagingError};
use crate::graph::{error_detail, GraphApi};
use crate::transport::{cancellable, until_cancelled, HttpTransport};
use crate::types::DestinationId;

/// Upper bound on `me/accounts` pages followed via `paging.next`
const MAX_ACCOUNT_PAGES: usize = 10;

/// Page tasks that allow publishing; either one is enough
const PUBLISHING_TASKS: &[&str] = &["CREATE_CONTENT", "MANAGE"];

/// Bearer credentials for one destination
#[derive(Debug)]
pub struct Credentials {
    pub token: SecretString,
    /// Account the token acts for (page id, Instagram business id, Dropbox app)
    pub subject_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of `debug_token` on the long-lived user token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub is_valid: bool,
    /// `None` for tokens that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenStatus {
    /// Expiry line for notifications
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        match self.expires_at {
            None => "Token never expires (long-lived or page token)".to_string(),
            Some(expires_at) => {
                let left = expires_at.signed_duration_since(now);
                if left.num_seconds() <= 0 {
                    return format!("Token expired at {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                format!(
                    "Expires on: {}\nTime left: {} days, {} hours, {} minutes",
                    expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    left.num_days(),
                    left.num_hours() % 24,
                    left.num_minutes() % 60
                )
            }
        }
    }
}

pub struct TokenProvider {
    graph: GraphApi,
    secrets: Arc<Secrets>,
    token_url: String,
    page_id: String,
    instagram_id: String,
}

impl TokenProvider {
    pub fn new(graph: GraphApi, secrets: Arc<Secrets>, config: &Config) -> Self {
        Self {
            graph,
            secrets,
            token_url: config.staging.token_url.clone(),
            page_id: config.facebook.page_id.clone(),
            instagram_id: config.instagram.account_id.clone(),
        }
    }

    fn transport(&self) -> &dyn HttpTransport {
        self.graph.transport()
    }

    /// Exchange the Dropbox refresh token for a fresh access token.
    ///
    /// Failure here is fatal to the run: nothing can be fetched without it.
    pub async fn refresh_staging_token(&self, cancel: &CancellationToken) -> Result<Credentials, StagingError> {
        info!("Refreshing staging store token");
        let reply = until_cancelled(
            cancel,
            self.transport().post_form(
                &self.token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", self.secrets.dropbox_refresh_token.expose_secret()),
                    ("client_id", self.secrets.dropbox_app_key.as_str()),
                    ("client_secret", self.secrets.dropbox_app_secret.expose_secret()),
                ],
            ),
        )
        .await
        .ok_or(StagingError::Cancelled)?
        .map_err(|e| StagingError::Auth(e.to_string()))?;

        if !reply.is_success() {
            let message = reply
                .body
                .get("error_description")
                .or_else(|| reply.body.get("error"))
                .map(|v| v.to_string())
                .unwrap_or_else(|| format!("status {}", reply.status));
            return Err(StagingError::Auth(format!("refresh failed: {}", message)));
        }

        let token = reply
            .str_field("access_token")
            .ok_or_else(|| StagingError::Auth("refresh response missing access_token".to_string()))?;
        let expires_at = reply
            .body
            .get("expires_in")
            .and_then(Value::as_i64)
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        info!("Staging store token refreshed");
        Ok(Credentials {
            token: SecretString::from(token),
            subject_id: self.secrets.dropbox_app_key.clone(),
            expires_at,
        })
    }

    /// Ask the Graph API whether the long-lived user token is still valid
    pub async fn inspect_user_token(&self, cancel: &CancellationToken) -> Result<TokenStatus, PublishError> {
        let token = self.secrets.meta_token.expose_secret();
        let reply = cancellable(
            cancel,
            self.transport().get(
                &self.graph.root_url("debug_token"),
                &[("input_token", token), ("access_token", token)],
            ),
        )
        .await?;

        if !reply.is_success() {
            return Err(PublishError::CredentialUnavailable(format!(
                "debug_token failed: {}",
                error_detail(&reply)
            )));
        }

        let data = reply.body.get("data").ok_or_else(|| {
            PublishError::CredentialUnavailable("debug_token response missing data".to_string())
        })?;
        let is_valid = data
            .get("is_valid")
            .and_then(Value::as_bool)
            .ok_or_else(|| PublishError::CredentialUnavailable("debug_token response missing is_valid".to_string()))?;
        let expires_at = data
            .get("expires_at")
            .and_then(Value::as_i64)
            .filter(|ts| *ts > 0)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        Ok(TokenStatus { is_valid, expires_at })
    }

    /// Start a token scope for one asset
    pub fn for_asset(&self) -> AssetTokens<'_> {
        AssetTokens {
            provider: self,
            page_token: OnceCell::new(),
        }
    }

    async fn resolve_page_token(&self, cancel: &CancellationToken) -> Result<SecretString, PublishError> {
        info!(page_id = %self.page_id, "Resolving page access token");
        let mut url = self.graph.url("me/accounts");
        let user_token = self.secrets.meta_token.expose_secret();

        let first_params = [("fields", "id,name,access_token,tasks"), ("access_token", user_token)];

        for page in 0..MAX_ACCOUNT_PAGES {
            // paging.next already carries the token and cursor
            let params: &[(&str, &str)] = if page == 0 { &first_params } else { &[] };
            let reply = cancellable(cancel, self.transport().get(&url, params)).await?;

            if !reply.is_success() {
                return Err(PublishError::CredentialUnavailable(format!(
                    "failed to list pages: {}",
                    error_detail(&reply)
                )));
            }

            let entries = reply
                .body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            debug!(count = entries.len(), "Listed manageable pages");

            for entry in &entries {
                let id = entry.get("id").and_then(Value::as_str).unwrap_or_default();
                if id != self.page_id {
                    continue;
                }
                let name = entry.get("name").and_then(Value::as_str).unwrap_or("Unknown");
                check_page_tasks(entry, name, &self.page_id)?;
                return match entry.get("access_token").and_then(Value::as_str) {
                    Some(token) if !token.is_empty() => {
                        info!(page_id = %self.page_id, page_name = name, "Page access token resolved");
                        Ok(SecretString::from(token.to_string()))
                    }
                    _ => Err(PublishError::CredentialUnavailable(format!(
                        "no access token returned for page {} ({})",
                        name, self.page_id
                    ))),
                };
            }

            match reply
                .body
                .get("paging")
                .and_then(|p| p.get("next"))
                .and_then(Value::as_str)
            {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }

        warn!(page_id = %self.page_id, "Configured page not found among manageable pages");
        Err(PublishError::CredentialUnavailable(format!(
            "page {} not found in the user's account list",
            self.page_id
        )))
    }

    /// Confirm the page is linked to the configured Instagram business account
    async fn check_instagram_link(&self, page_token: &str, cancel: &CancellationToken) -> Result<(), PublishError> {
        let reply = cancellable(
            cancel,
            self.transport().get(
                &self.graph.url(&self.page_id),
                &[
                    ("fields", "instagram_business_account,connected_instagram_account"),
                    ("access_token", page_token),
                ],
            ),
        )
        .await?;

        if !reply.is_success() {
            return Err(PublishError::CredentialUnavailable(format!(
                "failed to check Instagram connection: {}",
                error_detail(&reply)
            )));
        }

        let linked_id = |field: &str| {
            reply
                .body
                .get(field)
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match (linked_id("instagram_business_account"), linked_id("connected_instagram_account")) {
            (Some(id), _) if id == self.instagram_id => Ok(()),
            (Some(id), _) => Err(PublishError::CredentialUnavailable(format!(
                "Instagram id mismatch: configured {}, page is connected to {}",
                self.instagram_id, id
            ))),
            (None, Some(id)) => {
                debug!(connected = %id, "Page has a connected (non-business) Instagram account");
                Ok(())
            }
            (None, None) => Err(PublishError::CredentialUnavailable(
                "no Instagram account connected to the page".to_string(),
            )),
        }
    }
}

/// The user's role on the page must allow publishing. Older API versions
/// omit `tasks`; those entries are accepted.
fn check_page_tasks(entry: &Value, name: &str, page_id: &str) -> Result<(), PublishError> {
    let Some(tasks) = entry.get("tasks").and_then(Value::as_array) else {
        debug!(page_id, "Page entry carries no tasks; assuming publish access");
        return Ok(());
    };
    let granted = tasks
        .iter()
        .filter_map(Value::as_str)
        .any(|task| PUBLISHING_TASKS.contains(&task));
    if granted {
        return Ok(());
    }
    let held: Vec<&str> = tasks.iter().filter_map(Value::as_str).collect();
    warn!(page_id, tasks = ?held, "User cannot publish to the configured page");
    Err(PublishError::CredentialUnavailable(format!(
        "user lacks CREATE_CONTENT on page {} ({}); granted tasks: {}",
        name,
        page_id,
        held.join(", ")
    )))
}

/// Per-asset token cache
pub struct AssetTokens<'a> {
    provider: &'a TokenProvider,
    page_token: OnceCell<Result<SecretString, PublishError>>,
}

impl AssetTokens<'_> {
    /// Credentials for `destination`, or `CredentialUnavailable`
    pub async fn get_destination_token(
        &self,
        destination: DestinationId,
        cancel: &CancellationToken,
    ) -> Result<Credentials, PublishError> {
        let page_token = self
            .page_token
            .get_or_init(|| self.provider.resolve_page_token(cancel))
            .await
            .as_ref()
            .map_err(Clone::clone)?
            .expose_secret()
            .to_string();

        let subject_id = match destination {
            DestinationId::Instagram => {
                self.provider.check_instagram_link(&page_token, cancel).await?;
                self.provider.instagram_id.clone()
            }
            DestinationId::FacebookPage => self.provider.page_id.clone(),
        };

        Ok(Credentials {
            token: SecretString::from(page_token),
            subject_id,
            expires_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_status_describe_never_expires() {
        let status = TokenStatus {
            is_valid: true,
            expires_at: None,
        };
        assert!(status.describe(Utc::now()).contains("never expires"));
    }

    #[test]
    fn test_token_status_describe_time_left() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let status = TokenStatus {
            is_valid: true,
            expires_at: Some(now + chrono::Duration::days(3) + chrono::Duration::hours(4) + chrono::Duration::minutes(5)),
        };
        let text = status.describe(now);
        assert!(text.contains("3 days, 4 hours, 5 minutes"), "{}", text);
    }

    #[test]
    fn test_page_tasks() {
        let entry = |tasks: Value| serde_json::json!({"id": "1", "tasks": tasks});
        assert!(check_page_tasks(&entry(serde_json::json!(["ANALYZE", "CREATE_CONTENT"])), "P", "1").is_ok());
        assert!(check_page_tasks(&entry(serde_json::json!(["MANAGE"])), "P", "1").is_ok());
        assert!(check_page_tasks(&serde_json::json!({"id": "1"}), "P", "1").is_ok());

        let err = check_page_tasks(&entry(serde_json::json!(["ANALYZE"])), "P", "1").unwrap_err();
        assert!(matches!(err, PublishError::CredentialUnavailable(ref m) if m.contains("ANALYZE")));
    }

    #[test]
    fn test_token_status_describe_expired() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let status = TokenStatus {
            is_valid: false,
            expires_at: Some(now - chrono::Duration::days(1)),
        };
        assert!(status.describe(now).starts_with("Token expired at 2026-01-01"));
    }
}
