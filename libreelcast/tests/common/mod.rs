//! Shared fixtures for integration tests: a scripted Graph API and Dropbox,
//! ready-made clients and fast timing.
#![allow(dead_code)]

use libreelcast::config::{Config, GraphConfig, Secrets};
use libreelcast::destinations::facebook::FacebookPageClient;
use libreelcast::destinations::instagram::InstagramClient;
use libreelcast::graph::GraphApi;
use libreelcast::notify::RecordingNotifier;
use libreelcast::protocol::{ProtocolContext, Timing};
use libreelcast::tokens::Credentials;
use libreelcast::transport::mock::MockTransport;
use libreelcast::transport::{HttpReply, Method};
use libreelcast::types::{Asset, Captions, FetchUrl};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GRAPH: &str = "https://graph.test";
pub const DROPBOX_API: &str = "https://dropbox.test/2";
pub const DROPBOX_TOKEN_URL: &str = "https://dropbox.test/oauth2/token";
pub const IG_ID: &str = "17841400000000000";
pub const PAGE_ID: &str = "100000000000001";
pub const PAGE_TOKEN: &str = "page-token";
pub const USER_TOKEN: &str = "user-token";

/// Versioned Graph URL for `path`
pub fn graph_url(path: &str) -> String {
    format!("{}/v18.0/{}", GRAPH, path)
}

pub fn dropbox_url(endpoint: &str) -> String {
    format!("{}/{}", DROPBOX_API, endpoint)
}

pub fn ok(body: Value) -> Result<HttpReply, libreelcast::error::TransportError> {
    Ok(HttpReply::ok(body))
}

pub fn graph_error(status: u16, message: &str) -> Result<HttpReply, libreelcast::error::TransportError> {
    Ok(HttpReply::new(
        status,
        json!({"error": {"message": message, "code": 100, "type": "OAuthException"}}),
    ))
}

pub fn graph(mock: &Arc<MockTransport>) -> GraphApi {
    let config = GraphConfig {
        base_url: GRAPH.to_string(),
        version: "v18.0".to_string(),
    };
    GraphApi::new(mock.clone(), &config)
}

fn credentials(subject_id: &str) -> Credentials {
    Credentials {
        token: SecretString::from(PAGE_TOKEN.to_string()),
        subject_id: subject_id.to_string(),
        expires_at: None,
    }
}

const FETCH_URL_MAX_AGE: Duration = Duration::from_secs(4 * 3600);

pub fn instagram(mock: &Arc<MockTransport>) -> InstagramClient {
    InstagramClient::new(graph(mock), credentials(IG_ID), FETCH_URL_MAX_AGE)
}

pub fn facebook(mock: &Arc<MockTransport>) -> FacebookPageClient {
    FacebookPageClient::new(graph(mock), credentials(PAGE_ID), FETCH_URL_MAX_AGE)
}

pub fn video_asset() -> Asset {
    Asset::from_listing("sunset.mp4", "/reels/sunset.mp4", 12 * 1024 * 1024)
        .unwrap()
        .with_fetch_url(FetchUrl::new("https://dl.dropbox.test/sunset.mp4"))
}

pub fn image_asset() -> Asset {
    Asset::from_listing("portrait.jpg", "/reels/portrait.jpg", 2 * 1024 * 1024)
        .unwrap()
        .with_fetch_url(FetchUrl::new("https://dl.dropbox.test/portrait.jpg"))
}

pub fn captions() -> Captions {
    Captions::new("Golden hour ✨", "Golden hour over the bay")
}

/// Reference timing with three verification attempts
pub fn timing() -> Timing {
    Timing {
        poll_interval: Duration::from_secs(5),
        max_polls: 20,
        settle_delay: Duration::from_secs(15),
        verify_attempts: 3,
        verify_delay: Duration::from_secs(3),
    }
}

pub fn context(notifier: &Arc<RecordingNotifier>) -> ProtocolContext {
    ProtocolContext::new(timing(), CancellationToken::new(), notifier.clone())
}

/// Instagram reel that finishes processing on poll `finished_on`, publishes
/// and is visible on the first lookup
pub fn script_instagram_reel(mock: &MockTransport, creation_id: &str, finished_on: usize) {
    let mut statuses: Vec<_> = (1..finished_on).map(|_| ok(json!({"status_code": "IN_PROGRESS"}))).collect();
    statuses.push(ok(json!({"status_code": "FINISHED"})));

    mock.route(Method::Post, graph_url(&format!("{}/media", IG_ID)), vec![ok(json!({"id": creation_id}))]);
    mock.route_with_param(Method::Get, graph_url(creation_id), "fields", "status_code", statuses);
    mock.route(
        Method::Post,
        graph_url(&format!("{}/media_publish", IG_ID)),
        vec![ok(json!({"id": format!("{}-media", creation_id)}))],
    );
    mock.route_with_param(
        Method::Get,
        graph_url(creation_id),
        "fields",
        "permalink",
        vec![ok(json!({"id": creation_id, "permalink": format!("https://instagram.test/reel/{}", creation_id)}))],
    );
}

/// Page video upload that is ready on poll `ready_on`
pub fn script_facebook_upload(mock: &MockTransport, video_id: &str, ready_on: usize) {
    let mut statuses: Vec<_> = (1..ready_on)
        .map(|_| ok(json!({"status": {"video_status": "processing"}})))
        .collect();
    statuses.push(ok(json!({"status": {"video_status": "ready"}})));

    mock.route(Method::Post, graph_url(&format!("{}/videos", PAGE_ID)), vec![ok(json!({"id": video_id}))]);
    mock.route_with_param(Method::Get, graph_url(video_id), "fields", "status", statuses);
}

/// Page video publish flip that succeeds and is visible on the first lookup
pub fn script_facebook_publish(mock: &MockTransport, video_id: &str) {
    mock.route(Method::Post, graph_url(video_id), vec![ok(json!({"success": true}))]);
    mock.route_with_param(
        Method::Get,
        graph_url(video_id),
        "fields",
        "permalink_url",
        vec![ok(json!({
            "id": video_id,
            "permalink_url": format!("https://facebook.test/watch/{}", video_id),
            "published": true
        }))],
    );
}

pub fn secrets() -> Secrets {
    Secrets {
        meta_token: SecretString::from(USER_TOKEN.to_string()),
        dropbox_app_key: "app-key".to_string(),
        dropbox_app_secret: SecretString::from("app-secret".to_string()),
        dropbox_refresh_token: SecretString::from("refresh".to_string()),
        telegram_bot_token: None,
        telegram_chat_id: None,
    }
}

/// Config pointing every endpoint at the mock, with `extra` TOML appended
pub fn config(schedule_path: &str, extra: &str) -> Config {
    let content = format!(
        r#"
[account]
key = "eclipsed_by_you"

[graph]
base_url = "{GRAPH}"

[instagram]
account_id = "{IG_ID}"

[facebook]
page_id = "{PAGE_ID}"

[staging]
folder = "/reels"
api_url = "{DROPBOX_API}"
token_url = "{DROPBOX_TOKEN_URL}"

[schedule]
path = "{schedule_path}"

[timing]
verify_attempts = 3

{extra}
"#
    );
    let config = Config::from_toml(&content).unwrap();
    config.validate().unwrap();
    config
}
