//! Publish protocol driver
//!
//! Drives one [`Destination`] through
//!
//! ```text
//! Created -> Processing -> Processed -> Published -> Verified
//!    \-> Failed
//! ```
//!
//! Create and commit run exactly once. Processing and verification poll at
//! fixed intervals: destination-side encoding time dominates, so there is no
//! backoff. The commit call's own status never decides the outcome; a commit
//! may time out while the media still goes live, so verification always
//! follows and is authoritative.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::destinations::{Destination, ProcessingStatus};
use crate::error::PublishError;
use crate::notify::{Notifier, Severity};
use crate::transport::pause;
use crate::types::{Asset, AttemptState, Captions, PublishAttempt};

/// Poll budgets and fixed delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Wait after processing finishes, before committing
    pub settle_delay: Duration,
    pub verify_attempts: u32,
    pub verify_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for Timing {
    fn from(config: &TimingConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            settle_delay: config.settle_delay(),
            verify_attempts: config.verify_attempts,
            verify_delay: config.verify_delay(),
        }
    }
}

/// Everything a protocol run shares with its siblings (all read-only)
#[derive(Clone)]
pub struct ProtocolContext {
    pub timing: Timing,
    pub cancel: CancellationToken,
    pub notifier: Arc<dyn Notifier>,
}

impl ProtocolContext {
    pub fn new(timing: Timing, cancel: CancellationToken, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            timing,
            cancel,
            notifier,
        }
    }
}

/// Run the full protocol for one destination.
///
/// When `published` is given, the published object id is sent on it as soon
/// as the commit call reports one; dropping it unsent tells the receiver
/// nothing was published.
pub async fn run_protocol(
    destination: &dyn Destination,
    asset: &Asset,
    captions: &Captions,
    ctx: &ProtocolContext,
    published: Option<oneshot::Sender<String>>,
) -> PublishAttempt {
    let id = destination.id();
    let label = id.label();
    let mut attempt = PublishAttempt::new(id);
    let text = destination.select_text(captions);

    // Create
    let creation_id = match destination.create(asset, text, &ctx.cancel).await {
        Ok(creation_id) => creation_id,
        Err(e) => return fail(attempt, e, ctx).await,
    };
    attempt.creation_id = Some(creation_id.clone());
    ctx.notifier
        .notify(
            &format!("✅ {} media created for {} (creation id {})", label, asset.name, creation_id),
            Severity::Info,
        )
        .await;

    // Process
    if destination.needs_processing(asset.kind) {
        attempt.advance(AttemptState::Processing);
        let started = Instant::now();
        if let Err(e) = process(destination, &creation_id, ctx).await {
            return fail(attempt, e, ctx).await;
        }
        attempt.advance(AttemptState::Processed);
        ctx.notifier
            .notify(
                &format!(
                    "✅ {} processing completed in {:.1}s, waiting {}s before publishing",
                    label,
                    started.elapsed().as_secs_f64(),
                    ctx.timing.settle_delay.as_secs()
                ),
                Severity::Info,
            )
            .await;
        if let Err(e) = pause(&ctx.cancel, ctx.timing.settle_delay).await {
            return fail(attempt, e, ctx).await;
        }
    } else {
        attempt.advance(AttemptState::Processed);
    }

    // Publish
    if ctx.cancel.is_cancelled() {
        return fail(attempt, PublishError::Cancelled, ctx).await;
    }
    attempt.commit_issued = true;
    match destination.commit(&creation_id, &ctx.cancel).await {
        Ok(published_id) => {
            attempt.advance(AttemptState::Published);
            info!(destination = %id, published_id = ?published_id, "Publish call accepted");
            if let (Some(object_id), Some(tx)) = (published_id.as_ref(), published) {
                // Receiver may be gone if the sibling already finished
                let _ = tx.send(object_id.clone());
            }
            attempt.published_id = published_id;
        }
        Err(PublishError::Cancelled) => return fail(attempt, PublishError::Cancelled, ctx).await,
        Err(e) => {
            warn!(destination = %id, error = %e, "Publish call failed; verifying anyway");
            ctx.notifier
                .notify(
                    &format!("⚠️ {} publish call failed: {}. Checking whether it went live anyway...", label, e),
                    Severity::Warning,
                )
                .await;
            attempt.commit_error = Some(e);
        }
    }

    // Verify
    let target = destination.verify_target(&creation_id, attempt.published_id.as_deref());
    match verify(destination, &target, ctx).await {
        Ok(permalink) => {
            attempt.advance(AttemptState::Verified);
            ctx.notifier
                .notify(&format!("✅ {} post verified live: {}", label, permalink), Severity::Info)
                .await;
            attempt.permalink = Some(permalink);
            attempt
        }
        Err(e) => fail(attempt, e, ctx).await,
    }
}

/// Poll processing status until it is terminal or the budget runs out.
///
/// Never issues more than `max_polls` status calls and does not sleep after
/// the last one.
pub async fn process(
    destination: &dyn Destination,
    creation_id: &str,
    ctx: &ProtocolContext,
) -> Result<u32, PublishError> {
    let max_polls = ctx.timing.max_polls;

    for poll in 1..=max_polls {
        debug!(destination = %destination.id(), poll, max_polls, "Checking processing status");
        match destination.poll_status(creation_id, &ctx.cancel).await? {
            ProcessingStatus::Finished => return Ok(poll),
            ProcessingStatus::Error(status) => {
                return Err(PublishError::DestinationRejected(format!(
                    "processing failed with status {}",
                    status
                )))
            }
            ProcessingStatus::InProgress(status) => {
                debug!(destination = %destination.id(), status = %status, "Still processing");
            }
        }
        if poll < max_polls {
            pause(&ctx.cancel, ctx.timing.poll_interval).await?;
        }
    }

    Err(PublishError::ProcessingTimeout { polls: max_polls })
}

/// Read `target` back until it shows a permalink.
///
/// Lookup failures other than cancellation count as "not visible yet".
/// Verification has no side effects, so repeating it for an already live
/// object gives the same answer.
pub async fn verify(
    destination: &dyn Destination,
    target: &str,
    ctx: &ProtocolContext,
) -> Result<String, PublishError> {
    let attempts = ctx.timing.verify_attempts;

    for attempt in 1..=attempts {
        match destination.lookup(target, &ctx.cancel).await {
            Ok(Some(permalink)) => {
                info!(destination = %destination.id(), target, attempt, "Verified live");
                return Ok(permalink);
            }
            Ok(None) => debug!(destination = %destination.id(), target, attempt, "Not visible yet"),
            Err(PublishError::Cancelled) => return Err(PublishError::Cancelled),
            Err(e) => debug!(destination = %destination.id(), target, attempt, error = %e, "Lookup failed"),
        }
        if attempt < attempts {
            pause(&ctx.cancel, ctx.timing.verify_delay).await?;
        }
    }

    Err(PublishError::VerificationUnconfirmed {
        target: target.to_string(),
        attempts,
    })
}

async fn fail(mut attempt: PublishAttempt, error: PublishError, ctx: &ProtocolContext) -> PublishAttempt {
    let severity = if error.is_unconfirmed() {
        Severity::Warning
    } else {
        Severity::Error
    };
    ctx.notifier
        .notify(
            &format!("❌ {} failed during {}: {}", attempt.destination.label(), attempt.state, error),
            severity,
        )
        .await;
    attempt.fail(error);
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_from_config() {
        let timing = Timing::default();
        assert_eq!(timing.poll_interval, Duration::from_secs(5));
        assert_eq!(timing.max_polls, 20);
        assert_eq!(timing.settle_delay, Duration::from_secs(15));
        assert_eq!(timing.verify_attempts, 5);
        assert_eq!(timing.verify_delay, Duration::from_secs(3));
    }
}
