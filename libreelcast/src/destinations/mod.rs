//! Destination clients
//!
//! Each destination exposes the same four-step asynchronous publish
//! protocol (create, process, publish, verify). The [`Destination`] trait
//! holds the per-destination HTTP calls; [`crate::protocol`] drives them
//! through the state machine so that every destination gets the same
//! polling, settle and verification behaviour.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PublishError;
use crate::graph::error_detail;
use crate::transport::HttpReply;
use crate::types::{Asset, Captions, DestinationId, MediaKind};

pub mod facebook;
pub mod instagram;

/// One reading of a destination-side processing status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingStatus {
    Finished,
    /// Terminal failure, with the status the destination reported
    Error(String),
    /// Still encoding; carries the raw status for logs
    InProgress(String),
}

#[async_trait]
pub trait Destination: Send + Sync {
    fn id(&self) -> DestinationId;

    /// Whether media of this kind must be polled until the destination
    /// finishes encoding it
    fn needs_processing(&self, kind: MediaKind) -> bool;

    /// Text to publish alongside the media
    fn select_text<'a>(&self, captions: &'a Captions) -> &'a str {
        &captions.caption
    }

    /// Submit the asset and return the creation handle
    async fn create(&self, asset: &Asset, text: &str, cancel: &CancellationToken) -> Result<String, PublishError>;

    /// Read the processing status of a creation handle once
    async fn poll_status(&self, creation_id: &str, cancel: &CancellationToken) -> Result<ProcessingStatus, PublishError>;

    /// Commit the creation. Returns the published object id when the
    /// destination reports one.
    async fn commit(&self, creation_id: &str, cancel: &CancellationToken) -> Result<Option<String>, PublishError>;

    /// Object to read back during verification
    fn verify_target(&self, creation_id: &str, _published_id: Option<&str>) -> String {
        creation_id.to_string()
    }

    /// Read an object once. `Some(permalink)` means it is live.
    async fn lookup(&self, target: &str, cancel: &CancellationToken) -> Result<Option<String>, PublishError>;

    /// Attach an object already published elsewhere instead of uploading
    /// again. Returns the id of the resulting object.
    async fn attach(
        &self,
        _source_object_id: &str,
        _text: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, PublishError> {
        Err(PublishError::Unsupported(format!(
            "{} cannot attach published media",
            self.id()
        )))
    }
}

/// Extract the `id` of a successful creation reply, or describe the rejection
pub(crate) fn created_id(reply: &HttpReply, what: &str) -> Result<String, PublishError> {
    if !reply.is_success() {
        return Err(PublishError::DestinationRejected(format!(
            "{} failed: {}",
            what,
            error_detail(reply)
        )));
    }
    reply.str_field("id").ok_or_else(|| {
        PublishError::DestinationRejected(format!("{} returned no id (status {})", what, reply.status))
    })
}

/// Fetch URL of `asset`, refusing missing or stale links
pub(crate) fn usable_fetch_url(asset: &Asset, max_age: std::time::Duration) -> Result<&str, PublishError> {
    match &asset.fetch_url {
        Some(link) if link.is_fresh(max_age) => Ok(link.url.as_str()),
        Some(_) => Err(PublishError::InvalidAsset(format!(
            "fetch URL for {} has expired",
            asset.name
        ))),
        None => Err(PublishError::InvalidAsset(format!("{} has no fetch URL", asset.name))),
    }
}

/// Permalink from a lookup body, if present
pub(crate) fn permalink_of(reply: &HttpReply) -> Option<String> {
    reply
        .str_field("permalink_url")
        .or_else(|| reply.str_field("permalink"))
}
