//! Dropbox staging store (HTTP API v2)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::StagingStore;
use crate::config::StagingConfig;
use crate::error::StagingError;
use crate::tokens::Credentials;
use crate::transport::{until_cancelled, HttpReply, HttpTransport};
use crate::types::{Asset, FetchUrl};

/// Upper bound on pages read for one listing
const MAX_LIST_PAGES: usize = 50;

pub struct DropboxStore {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    folder: String,
    token: SecretString,
}

impl DropboxStore {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &StagingConfig, credentials: Credentials) -> Self {
        Self {
            transport,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            folder: config.folder.clone(),
            token: credentials.token,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    async fn call(&self, endpoint: &str, body: Value, cancel: &CancellationToken) -> Result<HttpReply, StagingError> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let reply = until_cancelled(
            cancel,
            self.transport.post_json(&url, Some(self.token.expose_secret()), &body),
        )
        .await
        .ok_or(StagingError::Cancelled)??;

        if !reply.is_success() {
            return Err(StagingError::Api {
                status: reply.status,
                message: api_error_summary(&reply),
            });
        }
        Ok(reply)
    }
}

/// Dropbox puts a machine-readable `error_summary` on failures
fn api_error_summary(reply: &HttpReply) -> String {
    reply
        .str_field("error_summary")
        .unwrap_or_else(|| format!("status {}", reply.status))
}

/// Convert one `list_folder` entry into an asset, skipping folders,
/// deleted entries and disallowed extensions
fn entry_to_asset(entry: &Value) -> Option<Asset> {
    if entry.get(".tag").and_then(Value::as_str) != Some("file") {
        return None;
    }
    let name = entry.get("name").and_then(Value::as_str)?;
    let path = entry
        .get("path_lower")
        .or_else(|| entry.get("path_display"))
        .and_then(Value::as_str)?;
    let size = entry.get("size").and_then(Value::as_u64).unwrap_or(0);
    Asset::from_listing(name, path, size)
}

#[async_trait]
impl StagingStore for DropboxStore {
    async fn list_eligible(&self, cancel: &CancellationToken) -> Result<Vec<Asset>, StagingError> {
        let mut reply = self
            .call("files/list_folder", json!({ "path": self.folder, "recursive": false }), cancel)
            .await?;
        let mut assets = Vec::new();
        let mut page = 1;

        loop {
            let entries = reply
                .body
                .get("entries")
                .and_then(Value::as_array)
                .ok_or_else(|| StagingError::MissingField("entries".to_string()))?;
            let before = assets.len();
            assets.extend(entries.iter().filter_map(entry_to_asset));
            debug!(
                page,
                entries = entries.len(),
                eligible = assets.len() - before,
                "Listed staging folder page"
            );

            let has_more = reply.body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            if !has_more {
                break;
            }
            if page == MAX_LIST_PAGES {
                warn!(
                    folder = %self.folder,
                    pages = page,
                    eligible = assets.len(),
                    "Staging listing truncated; later entries are not considered this run"
                );
                break;
            }
            let cursor = reply
                .str_field("cursor")
                .ok_or_else(|| StagingError::MissingField("cursor".to_string()))?;
            reply = self
                .call("files/list_folder/continue", json!({ "cursor": cursor }), cancel)
                .await?;
            page += 1;
        }

        info!(folder = %self.folder, eligible = assets.len(), "Listed staging folder");
        Ok(assets)
    }

    async fn fetch_url(&self, asset: &Asset, cancel: &CancellationToken) -> Result<FetchUrl, StagingError> {
        let reply = self
            .call("files/get_temporary_link", json!({ "path": asset.source }), cancel)
            .await?;
        let link = reply
            .str_field("link")
            .ok_or_else(|| StagingError::MissingField("link".to_string()))?;
        debug!(asset = %asset.name, "Obtained temporary link");
        Ok(FetchUrl::new(link))
    }

    async fn delete(&self, asset: &Asset, cancel: &CancellationToken) -> Result<(), StagingError> {
        self.call("files/delete_v2", json!({ "path": asset.source }), cancel)
            .await?;
        info!(asset = %asset.name, "Deleted asset from staging");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;

    const API: &str = "https://dropbox.test/2";

    fn store(mock: Arc<MockTransport>) -> DropboxStore {
        let config = StagingConfig {
            api_url: format!("{}/", API),
            folder: "/reels".to_string(),
            ..StagingConfig::default()
        };
        let credentials = Credentials {
            token: SecretString::from("dbx-token".to_string()),
            subject_id: "app".to_string(),
            expires_at: None,
        };
        DropboxStore::new(mock, &config, credentials)
    }

    fn file(name: &str, size: u64) -> Value {
        json!({".tag": "file", "name": name, "path_lower": format!("/reels/{}", name.to_lowercase()), "size": size})
    }

    #[tokio::test]
    async fn test_list_filters_and_follows_cursor() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            Method::Post,
            format!("{}/files/list_folder", API),
            HttpReply::ok(json!({
                "entries": [
                    file("Clip.MP4", 2048),
                    {".tag": "folder", "name": "archive", "path_lower": "/reels/archive"},
                    file("notes.txt", 10),
                ],
                "has_more": true,
                "cursor": "c1",
            })),
        );
        mock.reply(
            Method::Post,
            format!("{}/files/list_folder/continue", API),
            HttpReply::ok(json!({"entries": [file("photo.png", 512)], "has_more": false})),
        );

        let assets = store(mock.clone()).list_eligible(&CancellationToken::new()).await.unwrap();
        let names: Vec<_> = assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Clip.MP4", "photo.png"]);
        assert_eq!(assets[0].source, "/reels/clip.mp4");
        assert_eq!(assets[0].size_bytes, 2048);

        let calls = mock.calls();
        assert_eq!(calls[0].bearer.as_deref(), Some("dbx-token"));
        assert_eq!(calls[0].json.as_ref().unwrap()["path"], "/reels");
        assert_eq!(calls[1].json.as_ref().unwrap()["cursor"], "c1");
    }

    #[tokio::test]
    async fn test_list_api_error() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            Method::Post,
            format!("{}/files/list_folder", API),
            HttpReply::new(409, json!({"error_summary": "path/not_found/.."})),
        );

        let err = store(mock).list_eligible(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StagingError::Api { status: 409, .. }));
        assert!(err.to_string().contains("path/not_found"));
    }

    #[tokio::test]
    async fn test_list_transport_error() {
        let mock = Arc::new(MockTransport::new());
        mock.route(
            Method::Post,
            format!("{}/files/list_folder", API),
            vec![Err(TransportError::Request("connection refused".to_string()))],
        );

        let err = store(mock).list_eligible(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StagingError::Transport(_)));
    }

    #[tokio::test]
    async fn test_fetch_url_and_delete() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            Method::Post,
            format!("{}/files/get_temporary_link", API),
            HttpReply::ok(json!({"link": "https://dl.dropbox.test/clip.mp4"})),
        );
        mock.reply(
            Method::Post,
            format!("{}/files/delete_v2", API),
            HttpReply::ok(json!({"metadata": {}})),
        );

        let store = store(mock.clone());
        let asset = Asset::from_listing("clip.mp4", "/reels/clip.mp4", 1).unwrap();
        let link = store.fetch_url(&asset, &CancellationToken::new()).await.unwrap();
        assert_eq!(link.url, "https://dl.dropbox.test/clip.mp4");

        store.delete(&asset, &CancellationToken::new()).await.unwrap();
        let delete = mock.calls().pop().unwrap();
        assert_eq!(delete.json.unwrap()["path"], "/reels/clip.mp4");
    }

    #[tokio::test]
    async fn test_list_stops_at_page_limit() {
        let mock = Arc::new(MockTransport::new());
        mock.reply(
            Method::Post,
            format!("{}/files/list_folder", API),
            HttpReply::ok(json!({"entries": [file("a.mp4", 1)], "has_more": true, "cursor": "c"})),
        );
        mock.reply(
            Method::Post,
            format!("{}/files/list_folder/continue", API),
            HttpReply::ok(json!({"entries": [file("b.mp4", 1)], "has_more": true, "cursor": "c"})),
        );

        let assets = store(mock.clone()).list_eligible(&CancellationToken::new()).await.unwrap();
        assert_eq!(assets.len(), MAX_LIST_PAGES);
        // No page is fetched only to be thrown away
        assert_eq!(
            mock.count(Method::Post, &format!("{}/files/list_folder/continue", API)),
            MAX_LIST_PAGES - 1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_hung_call() {
        let mock = Arc::new(MockTransport::new());
        mock.hang(Method::Post, format!("{}/files/list_folder", API));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = store(mock).list_eligible(&cancel).await.unwrap_err();
        assert!(matches!(err, StagingError::Cancelled));
    }

    #[test]
    fn test_error_summary_falls_back_to_status() {
        assert_eq!(api_error_summary(&HttpReply::new(500, Value::Null)), "status 500");
    }
}
