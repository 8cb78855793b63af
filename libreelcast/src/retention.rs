//! Retention decision
//!
//! The staged asset is deleted only when every required destination
//! verified the post. Anything less keeps it for a later run or for manual
//! review, so a partial failure never loses the source media.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PublishError;
use crate::notify::{Notifier, Severity};
use crate::staging::StagingStore;
use crate::types::{Asset, OrchestrationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RetentionDecision {
    Delete,
    /// `review` is set when a destination may have published but it could
    /// not be confirmed (verification ran out, or the run was cancelled after
    /// the publish call went out), so re-publishing might duplicate the post
    Keep { review: bool },
}

impl RetentionDecision {
    pub fn is_delete(&self) -> bool {
        matches!(self, RetentionDecision::Delete)
    }
}

/// Decide what happens to the staged asset after orchestration
pub fn decide(result: &OrchestrationResult) -> RetentionDecision {
    if result.overall_success {
        return RetentionDecision::Delete;
    }
    let review = result.outcomes.values().any(|o| match &o.error {
        Some(e) if e.is_unconfirmed() => true,
        Some(PublishError::Cancelled) => o.committed,
        _ => false,
    });
    RetentionDecision::Keep { review }
}

/// Carry out `decision`. Returns whether the asset was deleted; a failed
/// delete is reported, never fatal.
pub async fn apply(
    decision: RetentionDecision,
    store: &dyn StagingStore,
    asset: &Asset,
    notifier: &dyn Notifier,
    cancel: &CancellationToken,
) -> bool {
    match decision {
        RetentionDecision::Delete => match store.delete(asset, cancel).await {
            Ok(()) => {
                notifier
                    .notify(&format!("🗑️ Deleted {} from staging", asset.name), Severity::Info)
                    .await;
                true
            }
            Err(e) => {
                warn!(asset = %asset.name, error = %e, "Failed to delete staged asset");
                notifier
                    .notify(&format!("⚠️ Failed to delete {}: {}", asset.name, e), Severity::Warning)
                    .await;
                false
            }
        },
        RetentionDecision::Keep { review } => {
            info!(asset = %asset.name, review, "Keeping staged asset");
            let message = if review {
                format!(
                    "🔎 Keeping {}: a post may be live but was not confirmed, check manually before it is retried",
                    asset.name
                )
            } else {
                format!("📦 Keeping {} for the next run", asset.name)
            };
            let severity = if review { Severity::Warning } else { Severity::Info };
            notifier.notify(&message, severity).await;
            false
        }
    }
}
