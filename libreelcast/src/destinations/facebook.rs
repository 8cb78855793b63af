//! Facebook Page video destination
//!
//! Videos are uploaded unpublished, polled until the Page reports them
//! ready, then flipped to published. When an Instagram media id is at hand
//! the orchestrator first tries [`Destination::attach`], which shares the
//! already-published media to the Page feed without a second upload.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{created_id, permalink_of, usable_fetch_url, Destination, ProcessingStatus};
use crate::error::PublishError;
use crate::graph::{error_detail, GraphApi};
use crate::tokens::Credentials;
use crate::transport::{cancellable, HttpReply};
use crate::types::{Asset, Captions, DestinationId, MediaKind};

const STATUS_FIELDS: &str = "status";
const VIDEO_VERIFY_FIELDS: &str = "id,permalink_url,created_time,published";
const POST_VERIFY_FIELDS: &str = "id,permalink_url,created_time,is_published";

pub struct FacebookPageClient {
    graph: GraphApi,
    credentials: Credentials,
    fetch_url_max_age: Duration,
}

impl FacebookPageClient {
    /// `credentials.subject_id` is the Page id
    pub fn new(graph: GraphApi, credentials: Credentials, fetch_url_max_age: Duration) -> Self {
        Self {
            graph,
            credentials,
            fetch_url_max_age,
        }
    }

    fn page_id(&self) -> &str {
        &self.credentials.subject_id
    }

    fn token(&self) -> &str {
        self.credentials.token.expose_secret()
    }
}

/// Map the `status` object of a Page video
fn parse_status(body: &Value) -> ProcessingStatus {
    let status = body.get("status");
    let video_status = status
        .and_then(|s| s.get("video_status"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let phase_failed = status
        .and_then(|s| s.get("processing_phase"))
        .and_then(|p| p.get("status"))
        .and_then(Value::as_str)
        == Some("error");

    match video_status {
        "error" => ProcessingStatus::Error(video_status.to_string()),
        _ if phase_failed => ProcessingStatus::Error("processing_phase error".to_string()),
        "ready" => ProcessingStatus::Finished,
        other => ProcessingStatus::InProgress(other.to_string()),
    }
}

/// Feed post ids look like `{page_id}_{post_id}`; video ids have no underscore
fn is_feed_post(object_id: &str) -> bool {
    object_id.contains('_')
}

/// Fields to read back for `target` and the flag among them that says it is live.
/// Unpublished videos already carry a `permalink_url`.
fn verify_fields(target: &str) -> (&'static str, &'static str) {
    if is_feed_post(target) {
        (POST_VERIFY_FIELDS, "is_published")
    } else {
        (VIDEO_VERIFY_FIELDS, "published")
    }
}

/// Permalink of `reply`, but only once `flag` is true
fn live_permalink(reply: &HttpReply, flag: &str) -> Option<String> {
    if reply.body.get(flag).and_then(Value::as_bool) != Some(true) {
        return None;
    }
    permalink_of(reply)
}

#[async_trait]
impl Destination for FacebookPageClient {
    fn id(&self) -> DestinationId {
        DestinationId::FacebookPage
    }

    fn needs_processing(&self, _kind: MediaKind) -> bool {
        true
    }

    fn select_text<'a>(&self, captions: &'a Captions) -> &'a str {
        &captions.description
    }

    async fn create(&self, asset: &Asset, text: &str, cancel: &CancellationToken) -> Result<String, PublishError> {
        if asset.kind != MediaKind::Video {
            return Err(PublishError::Unsupported(
                "the Facebook Page destination only publishes videos".to_string(),
            ));
        }
        let fetch_url = usable_fetch_url(asset, self.fetch_url_max_age)?;
        let url = self.graph.url(&format!("{}/videos", self.page_id()));

        info!(asset = %asset.name, page_id = %self.page_id(), "Uploading video to Facebook Page");
        let reply = cancellable(
            cancel,
            self.graph.transport().post_form(
                &url,
                &[
                    ("access_token", self.token()),
                    ("file_url", fetch_url),
                    ("description", text),
                    ("published", "false"),
                ],
            ),
        )
        .await?;
        created_id(&reply, "Facebook video upload")
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

        let status = parse_status(&reply.body);
        debug!(video_id = creation_id, status = ?status, "Facebook video status");
        Ok(status)
    }

    async fn commit(&self, creation_id: &str, cancel: &CancellationToken) -> Result<Option<String>, PublishError> {
        let reply = cancellable(
            cancel,
            self.graph.transport().post_form(
                &self.graph.url(creation_id),
                &[("published", "true"), ("access_token", self.token())],
            ),
        )
        .await?;

        let accepted = reply.is_success()
            && reply.body.get("success").and_then(Value::as_bool).unwrap_or(true);
        if !accepted {
            return Err(PublishError::DestinationRejected(format!(
                "Facebook publish failed: {}",
                error_detail(&reply)
            )));
        }
        // The published object is the video itself
        Ok(Some(creation_id.to_string()))
    }

    fn verify_target(&self, creation_id: &str, published_id: Option<&str>) -> String {
        published_id.unwrap_or(creation_id).to_string()
    }

    async fn lookup(&self, target: &str, cancel: &CancellationToken) -> Result<Option<String>, PublishError> {
        let (fields, flag) = verify_fields(target);
        let reply = cancellable(
            cancel,
            self.graph.transport().get(
                &self.graph.url(target),
                &[("fields", fields), ("access_token", self.token())],
            ),
        )
        .await?;

        if !reply.is_success() {
            debug!(object = target, detail = %error_detail(&reply), "Facebook lookup not successful");
            return Ok(None);
        }
        let permalink = live_permalink(&reply, flag);
        if permalink.is_none() {
            debug!(object = target, flag, "Facebook object not published yet");
        }
        Ok(permalink)
    }

    async fn attach(
        &self,
        source_object_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PublishError> {
        let url = self.graph.url(&format!("{}/feed", self.page_id()));
        let attached = json!([{ "media_fbid": source_object_id }]).to_string();

        info!(source = source_object_id, page_id = %self.page_id(), "Attaching published media to Page feed");
        let reply = cancellable(
            cancel,
            self.graph.transport().post_form(
                &url,
                &[
                    ("access_token", self.token()),
                    ("message", text),
                    ("attached_media", attached.as_str()),
                ],
            ),
        )
        .await?;
        created_id(&reply, "Facebook crosspost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_ready() {
        let body = json!({"status": {"video_status": "ready"}});
        assert_eq!(parse_status(&body), ProcessingStatus::Finished);
    }

    #[test]
    fn test_parse_status_processing() {
        let body = json!({"status": {"video_status": "processing", "processing_phase": {"status": "in_progress"}}});
        assert_eq!(
            parse_status(&body),
            ProcessingStatus::InProgress("processing".to_string())
        );
    }

    #[test]
    fn test_parse_status_errors() {
        let body = json!({"status": {"video_status": "error"}});
        assert!(matches!(parse_status(&body), ProcessingStatus::Error(_)));

        let body = json!({"status": {"video_status": "processing", "processing_phase": {"status": "error"}}});
        assert!(matches!(parse_status(&body), ProcessingStatus::Error(_)));
    }

    #[test]
    fn test_verify_fields_by_object_kind() {
        assert_eq!(verify_fields("1029384756"), (VIDEO_VERIFY_FIELDS, "published"));
        assert_eq!(verify_fields("1122_3344"), (POST_VERIFY_FIELDS, "is_published"));
    }

    #[test]
    fn test_unpublished_video_has_no_live_permalink() {
        let draft = HttpReply::ok(json!({"id": "1", "permalink_url": "/page/videos/1/", "published": false}));
        assert_eq!(live_permalink(&draft, "published"), None);

        let unflagged = HttpReply::ok(json!({"id": "1", "permalink_url": "/page/videos/1/"}));
        assert_eq!(live_permalink(&unflagged, "published"), None);

        let live = HttpReply::ok(json!({"id": "1", "permalink_url": "/page/videos/1/", "published": true}));
        assert_eq!(live_permalink(&live, "published").as_deref(), Some("/page/videos/1/"));
    }

    #[test]
    fn test_parse_status_missing_is_in_progress() {
        assert_eq!(
            parse_status(&Value::Null),
            ProcessingStatus::InProgress("unknown".to_string())
        );
    }
}
