//! Instagram destination (reels and feed images)

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{created_id, permalink_of, usable_fetch_url, Destination, ProcessingStatus};
use crate::error::PublishError;
use crate::graph::{error_detail, GraphApi};
use crate::tokens::Credentials;
use crate::transport::cancellable;
use crate::types::{Asset, DestinationId, MediaKind};

const STATUS_FIELDS: &str = "status_code";
const VERIFY_FIELDS: &str = "id,permalink,media_type,timestamp";

pub struct InstagramClient {
    graph: GraphApi,
    credentials: Credentials,
    fetch_url_max_age: Duration,
}

impl InstagramClient {
    /// `credentials.subject_id` is the Instagram business account id
    pub fn new(graph: GraphApi, credentials: Credentials, fetch_url_max_age: Duration) -> Self {
        Self {
            graph,
            credentials,
            fetch_url_max_age,
        }
    }

    fn account_id(&self) -> &str {
        &self.credentials.subject_id
    }

    fn token(&self) -> &str {
        self.credentials.token.expose_secret()
    }
}

/// Map an Instagram container `status_code`
fn parse_status(status_code: &str) -> ProcessingStatus {
    match status_code {
        "FINISHED" | "PUBLISHED" => ProcessingStatus::Finished,
        "ERROR" | "EXPIRED" => ProcessingStatus::Error(status_code.to_string()),
        other => ProcessingStatus::InProgress(other.to_string()),
    }
}

#[async_trait]
impl Destination for InstagramClient {
    fn id(&self) -> DestinationId {
        DestinationId::Instagram
    }

    fn needs_processing(&self, kind: MediaKind) -> bool {
        // Still images have no encode step
        kind == MediaKind::Video
    }

    async fn create(&self, asset: &Asset, text: &str, cancel: &CancellationToken) -> Result<String, PublishError> {
        let fetch_url = usable_fetch_url(asset, self.fetch_url_max_age)?;
        let url = self.graph.url(&format!("{}/media", self.account_id()));

        let mut form = vec![("access_token", self.token()), ("caption", text)];
        match asset.kind {
            MediaKind::Video => form.extend([
                ("media_type", "REELS"),
                ("video_url", fetch_url),
                ("share_to_feed", "true"),
            ]),
            MediaKind::Image => form.push(("image_url", fetch_url)),
        }

        info!(asset = %asset.name, kind = %asset.kind, "Creating Instagram media container");
        let reply = cancellable(cancel, self.graph.transport().post_form(&url, &form)).await?;
        created_id(&reply, "Instagram media creation")
    }

    async fn poll_status(&self, creation_id: &str, cancel: &CancellationToken) -> Result<ProcessingStatus, PublishError> {
        let reply = cancellable(
            cancel,
            self.graph.transport().get(
                &self.graph.url(creation_id),
                &[("fields", STATUS_FIELDS), ("access_token", self.token())],
            ),
        )
        .await?;

        if !reply.is_success() {
            return Err(PublishError::Transport(format!(
                "status check failed: {}",
                error_detail(&reply)
            )));
        }

        let status = reply
            .str_field("status_code")
            .unwrap_or_else(|| "UNKNOWN".to_string());
        debug!(creation_id, status = %status, "Instagram container status");
        Ok(parse_status(&status))
    }

    async fn commit(&self, creation_id: &str, cancel: &CancellationToken) -> Result<Option<String>, PublishError> {
        let url = self.graph.url(&format!("{}/media_publish", self.account_id()));
        let reply = cancellable(
            cancel,
            self.graph
                .transport()
                .post_form(&url, &[("creation_id", creation_id), ("access_token", self.token())]),
        )
        .await?;

        if !reply.is_success() {
            return Err(PublishError::DestinationRejected(format!(
                "Instagram publish failed: {}",
                error_detail(&reply)
            )));
        }
        Ok(reply.str_field("id"))
    }

    async fn lookup(&self, target: &str, cancel: &CancellationToken) -> Result<Option<String>, PublishError> {
        let reply = cancellable(
            cancel,
            self.graph.transport().get(
                &self.graph.url(target),
                &[("fields", VERIFY_FIELDS), ("access_token", self.token())],
            ),
        )
        .await?;

        if !reply.is_success() {
            debug!(object = target, detail = %error_detail(&reply), "Instagram lookup not successful");
            return Ok(None);
        }
        Ok(permalink_of(&reply))
    }
}
