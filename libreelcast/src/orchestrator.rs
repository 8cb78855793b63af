//! Publish orchestration
//!
//! Publishes one asset to every destination the [`RequiredPolicy`] names for
//! its media kind, collects one outcome per required destination and decides
//! overall success. Destinations run as independent tokio tasks
//! ([`ExecutionMode::Concurrent`]) or one after another
//! ([`ExecutionMode::Sequential`]); both modes produce the same outcome
//! shape.
//!
//! When cross-posting is enabled for videos, the Page run waits for the
//! Instagram media id and first tries to attach that media to the Page feed.
//! If the attach call fails, or Instagram never publishes, the Page falls
//! back to its own upload.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::{ExecutionMode, PublishConfig};
use crate::destinations::Destination;
use crate::error::PublishError;
use crate::notify::Severity;
use crate::protocol::{run_protocol, verify, ProtocolContext};
use crate::types::{
    Asset, AttemptState, Captions, DestinationId, DestinationOutcome, MediaKind, OrchestrationResult,
    PublishAttempt,
};

/// Destination whose published media can be attached elsewhere
const CROSSPOST_SOURCE: DestinationId = DestinationId::Instagram;

/// Destination that attaches the source's media
const CROSSPOST_TARGET: DestinationId = DestinationId::FacebookPage;

/// Which destinations must succeed for each media kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredPolicy {
    video: Vec<DestinationId>,
    image: Vec<DestinationId>,
}

impl Default for RequiredPolicy {
    fn default() -> Self {
        Self::from_config(&PublishConfig::default())
    }
}

impl RequiredPolicy {
    pub fn new(video: Vec<DestinationId>, image: Vec<DestinationId>) -> Self {
        Self {
            video: dedup(video),
            image: dedup(image),
        }
    }

    pub fn from_config(config: &PublishConfig) -> Self {
        Self::new(config.video_destinations.clone(), config.image_destinations.clone())
    }

    pub fn required(&self, kind: MediaKind) -> &[DestinationId] {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Image => &self.image,
        }
    }
}

fn dedup(mut ids: Vec<DestinationId>) -> Vec<DestinationId> {
    let mut seen = Vec::with_capacity(ids.len());
    ids.retain(|id| {
        if seen.contains(id) {
            false
        } else {
            seen.push(*id);
            true
        }
    });
    ids
}

pub struct Orchestrator {
    destinations: BTreeMap<DestinationId, Arc<dyn Destination>>,
    unavailable: BTreeMap<DestinationId, PublishError>,
    policy: RequiredPolicy,
    mode: ExecutionMode,
    crosspost: bool,
    ctx: ProtocolContext,
}

impl Orchestrator {
    pub fn new(policy: RequiredPolicy, mode: ExecutionMode, ctx: ProtocolContext) -> Self {
        Self {
            destinations: BTreeMap::new(),
            unavailable: BTreeMap::new(),
            policy,
            mode,
            crosspost: false,
            ctx,
        }
    }

    pub fn with_crosspost(mut self, enabled: bool) -> Self {
        self.crosspost = enabled;
        self
    }

    /// Register a ready client. Replaces any earlier registration for the same id.
    pub fn register(&mut self, destination: Arc<dyn Destination>) {
        let id = destination.id();
        self.unavailable.remove(&id);
        self.destinations.insert(id, destination);
    }

    /// Record that a destination could not be set up (e.g. no credentials)
    pub fn register_unavailable(&mut self, id: DestinationId, error: PublishError) {
        self.destinations.remove(&id);
        self.unavailable.insert(id, error);
    }

    /// Publish `asset` to its required destinations.
    ///
    /// Never fails as a whole: every per-destination error ends up in that
    /// destination's outcome.
    pub async fn publish(&self, asset: &Asset, captions: &Captions) -> OrchestrationResult {
        let required = self.policy.required(asset.kind).to_vec();
        let mut outcomes = BTreeMap::new();

        let mut participants: Vec<Arc<dyn Destination>> = Vec::new();
        for id in &required {
            match self.destinations.get(id) {
                Some(destination) => participants.push(Arc::clone(destination)),
                None => {
                    let error = self.unavailable.get(id).cloned().unwrap_or_else(|| {
                        PublishError::CredentialUnavailable(format!("no client configured for {}", id.label()))
                    });
                    warn!(destination = %id, error = %error, "Destination not attempted");
                    outcomes.insert(*id, DestinationOutcome::not_attempted(error));
                }
            }
        }

        // Source first, so sequential runs can hand its media id on
        participants.sort_by_key(|d| d.id() != CROSSPOST_SOURCE);
        let crosspost = self.crosspost
            && asset.kind == MediaKind::Video
            && participants.iter().any(|d| d.id() == CROSSPOST_SOURCE)
            && participants.iter().any(|d| d.id() == CROSSPOST_TARGET);

        info!(
            asset = %asset.name,
            kind = %asset.kind,
            destinations = ?participants.iter().map(|d| d.id()).collect::<Vec<_>>(),
            mode = ?self.mode,
            crosspost,
            "Publishing asset"
        );

        let attempts = match self.mode {
            ExecutionMode::Concurrent => self.run_concurrent(participants, asset, captions, crosspost).await,
            ExecutionMode::Sequential => self.run_sequential(participants, asset, captions, crosspost).await,
        };
        for (id, outcome) in attempts {
            outcomes.insert(id, outcome);
        }

        let overall_success = !required.is_empty()
            && required
                .iter()
                .all(|id| outcomes.get(id).map(|o| o.success).unwrap_or(false));

        OrchestrationResult {
            asset_name: asset.name.clone(),
            kind: asset.kind,
            outcomes,
            overall_success,
        }
    }

    async fn run_concurrent(
        &self,
        participants: Vec<Arc<dyn Destination>>,
        asset: &Asset,
        captions: &Captions,
        crosspost: bool,
    ) -> Vec<(DestinationId, DestinationOutcome)> {
        let (mut source_tx, mut target_rx) = channel(crosspost);

        let mut ids = Vec::with_capacity(participants.len());
        let mut handles = Vec::with_capacity(participants.len());
        for destination in participants {
            let id = destination.id();
            let published = if id == CROSSPOST_SOURCE { source_tx.take() } else { None };
            let source_id = if id == CROSSPOST_TARGET { target_rx.take() } else { None };
            let asset = asset.clone();
            let captions = captions.clone();
            let ctx = self.ctx.clone();

            ids.push(id);
            handles.push(tokio::spawn(async move {
                run_destination(destination.as_ref(), &asset, &captions, &ctx, published, source_id).await
            }));
        }

        // A panicking task only loses its own destination
        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| match joined {
                Ok(attempt) => (id, attempt.into_outcome()),
                Err(e) => {
                    warn!(destination = %id, error = %e, "Destination task failed");
                    (
                        id,
                        DestinationOutcome::not_attempted(PublishError::Internal(format!(
                            "destination task failed: {}",
                            e
                        ))),
                    )
                }
            })
            .collect()
    }

    async fn run_sequential(
        &self,
        participants: Vec<Arc<dyn Destination>>,
        asset: &Asset,
        captions: &Captions,
        crosspost: bool,
    ) -> Vec<(DestinationId, DestinationOutcome)> {
        let (mut source_tx, mut target_rx) = channel(crosspost);
        let mut results = Vec::with_capacity(participants.len());

        for destination in participants {
            let id = destination.id();
            let published = if id == CROSSPOST_SOURCE { source_tx.take() } else { None };
            let source_id = if id == CROSSPOST_TARGET { target_rx.take() } else { None };
            let attempt =
                run_destination(destination.as_ref(), asset, captions, &self.ctx, published, source_id).await;
            results.push((id, attempt.into_outcome()));
        }
        results
    }
}

fn channel(enabled: bool) -> (Option<oneshot::Sender<String>>, Option<oneshot::Receiver<String>>) {
    if enabled {
        let (tx, rx) = oneshot::channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    }
}

/// Run one destination, attaching the source's media first when a
/// cross-post receiver is given
async fn run_destination(
    destination: &dyn Destination,
    asset: &Asset,
    captions: &Captions,
    ctx: &ProtocolContext,
    published: Option<oneshot::Sender<String>>,
    source_id: Option<oneshot::Receiver<String>>,
) -> PublishAttempt {
    if let Some(rx) = source_id {
        let source_object_id = tokio::select! {
            _ = ctx.cancel.cancelled() => None,
            received = rx => received.ok(),
        };
        match source_object_id {
            Some(source_object_id) => {
                if let Some(attempt) = attach(destination, &source_object_id, captions, ctx).await {
                    return attempt;
                }
            }
            None if ctx.cancel.is_cancelled() => {
                let mut attempt = PublishAttempt::new(destination.id());
                attempt.fail(PublishError::Cancelled);
                return attempt;
            }
            None => info!(destination = %destination.id(), "Nothing to attach; uploading directly"),
        }
    }

    run_protocol(destination, asset, captions, ctx, published).await
}

/// Attach already-published media and verify the result.
///
/// Returns `None` when the attach call itself failed and the caller should
/// fall back to a full upload.
async fn attach(
    destination: &dyn Destination,
    source_object_id: &str,
    captions: &Captions,
    ctx: &ProtocolContext,
) -> Option<PublishAttempt> {
    let id = destination.id();
    let mut attempt = PublishAttempt::new(id);
    if ctx.cancel.is_cancelled() {
        attempt.fail(PublishError::Cancelled);
        return Some(attempt);
    }
    // The feed post goes live with the attach call itself
    attempt.commit_issued = true;

    let object_id = match destination
        .attach(source_object_id, destination.select_text(captions), &ctx.cancel)
        .await
    {
        Ok(object_id) => object_id,
        Err(PublishError::Cancelled) => {
            attempt.fail(PublishError::Cancelled);
            return Some(attempt);
        }
        Err(e) => {
            warn!(destination = %id, error = %e, "Cross-post failed; falling back to direct upload");
            ctx.notifier
                .notify(
                    &format!("⚠️ {} cross-post failed ({}), uploading directly instead", id.label(), e),
                    Severity::Warning,
                )
                .await;
            return None;
        }
    };

    info!(destination = %id, source = source_object_id, object_id = %object_id, "Cross-posted published media");
    attempt.creation_id = Some(object_id.clone());
    attempt.advance(AttemptState::Processed);
    attempt.advance(AttemptState::Published);
    attempt.published_id = Some(object_id.clone());

    match verify(destination, &object_id, ctx).await {
        Ok(permalink) => {
            attempt.advance(AttemptState::Verified);
            ctx.notifier
                .notify(&format!("✅ {} cross-post verified live: {}", id.label(), permalink), Severity::Info)
                .await;
            attempt.permalink = Some(permalink);
        }
        Err(e) => {
            ctx.notifier
                .notify(&format!("❌ {} cross-post not confirmed: {}", id.label(), e), Severity::Warning)
                .await;
            attempt.fail(e);
        }
    }
    Some(attempt)
}
