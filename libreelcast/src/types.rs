//! Core data types for Reelcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::PublishError;

/// Extensions accepted as video assets
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Extensions accepted as image assets
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Kind of media held by an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Derive the media kind from a file name's extension (case-insensitive).
    ///
    /// Returns `None` for anything outside the allow-list.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();

        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Short-lived URL a destination can fetch the asset from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchUrl {
    pub url: String,
    pub issued_at: DateTime<Utc>,
}

impl FetchUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            issued_at: Utc::now(),
        }
    }

    /// Whether the link is younger than `max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.issued_at);
        match age.to_std() {
            Ok(age) => age <= max_age,
            // issued_at in the future (clock skew) counts as fresh
            Err(_) => true,
        }
    }
}

/// One media object in the staging store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    /// Opaque handle into the staging store (e.g. a lower-cased Dropbox path)
    pub source: String,
    /// Obtained once per publish attempt
    pub fetch_url: Option<FetchUrl>,
}

impl Asset {
    /// Build an asset from a listing entry, or `None` if the extension is not allowed.
    pub fn from_listing(name: impl Into<String>, source: impl Into<String>, size_bytes: u64) -> Option<Self> {
        let name = name.into();
        let kind = MediaKind::from_file_name(&name)?;
        Some(Self {
            name,
            kind,
            size_bytes,
            source: source.into(),
            fetch_url: None,
        })
    }

    pub fn with_fetch_url(mut self, fetch_url: FetchUrl) -> Self {
        self.fetch_url = Some(fetch_url);
        self
    }

    /// Size formatted in megabytes, e.g. `"12.40MB"`
    pub fn size_display(&self) -> String {
        format!("{:.2}MB", self.size_bytes as f64 / 1024.0 / 1024.0)
    }
}

/// Caption pair resolved for today
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Captions {
    pub caption: String,
    pub description: String,
}

impl Captions {
    pub fn new(caption: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            description: description.into(),
        }
    }
}

/// Identifier of a publishing destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationId {
    /// Instagram reels and feed images
    Instagram,
    /// Facebook Page videos
    FacebookPage,
}

impl DestinationId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationId::Instagram => "instagram",
            DestinationId::FacebookPage => "facebook_page",
        }
    }

    /// Human-readable label used in notifications
    pub fn label(&self) -> &'static str {
        match self {
            DestinationId::Instagram => "Instagram",
            DestinationId::FacebookPage => "Facebook Page",
        }
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DestinationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instagram" => Ok(DestinationId::Instagram),
            "facebook_page" | "facebook" => Ok(DestinationId::FacebookPage),
            _ => Err(format!(
                "Invalid destination: '{}'. Valid options: instagram, facebook_page",
                s
            )),
        }
    }
}

/// Progress of one destination through the publish protocol
///
/// ```text
/// Created -> Processing -> Processed -> Published -> Verified
///    \-> Failed (from any non-terminal state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Created,
    Processing,
    Processed,
    Published,
    Verified,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Verified | AttemptState::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: AttemptState) -> bool {
        use AttemptState::*;
        match (self, next) {
            (Verified, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Created, Processing) | (Created, Processed) => true,
            (Processing, Processed) => true,
            (Processed, Published) => true,
            // Verify runs even when the commit call itself errored
            (Processed, Verified) | (Published, Verified) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Created => "created",
            AttemptState::Processing => "processing",
            AttemptState::Processed => "processed",
            AttemptState::Published => "published",
            AttemptState::Verified => "verified",
            AttemptState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracks one (asset, destination) pair through the state machine
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub destination: DestinationId,
    pub state: AttemptState,
    /// Destination-assigned handle for the asset in progress
    pub creation_id: Option<String>,
    /// Object id returned by the commit call, if it succeeded
    pub published_id: Option<String>,
    pub permalink: Option<String>,
    /// Error reported by the commit call; verification still decides the outcome
    pub commit_error: Option<PublishError>,
    /// The commit call was sent, so the post may be live whatever happened next
    pub commit_issued: bool,
    pub last_error: Option<PublishError>,
    pub started_at: DateTime<Utc>,
}

impl PublishAttempt {
    pub fn new(destination: DestinationId) -> Self {
        Self {
            destination,
            state: AttemptState::Created,
            creation_id: None,
            published_id: None,
            permalink: None,
            commit_error: None,
            commit_issued: false,
            last_error: None,
            started_at: Utc::now(),
        }
    }

    /// Move to `next`, ignoring illegal transitions.
    ///
    /// Returns whether the transition happened.
    pub fn advance(&mut self, next: AttemptState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                destination = %self.destination,
                from = %self.state,
                to = %next,
                "Ignoring illegal attempt transition"
            );
            return false;
        }
        tracing::debug!(destination = %self.destination, from = %self.state, to = %next, "Attempt transition");
        self.state = next;
        true
    }

    pub fn fail(&mut self, error: PublishError) {
        self.advance(AttemptState::Failed);
        self.last_error = Some(error);
    }

    /// Convert the terminal attempt into a reportable outcome
    pub fn into_outcome(self) -> DestinationOutcome {
        let success = self.state == AttemptState::Verified;
        let detail = if success {
            match &self.permalink {
                Some(link) => format!("verified: {}", link),
                None => "verified".to_string(),
            }
        } else {
            let base = self
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("ended in state {}", self.state));
            match &self.commit_error {
                Some(commit) => format!("{} (publish call: {})", base, commit),
                None => base,
            }
        };

        DestinationOutcome {
            success,
            detail,
            state: self.state,
            error: self.last_error,
            permalink: self.permalink,
            committed: self.commit_issued,
        }
    }
}

/// Final result for one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationOutcome {
    pub success: bool,
    pub detail: String,
    pub state: AttemptState,
    #[serde(skip)]
    pub error: Option<PublishError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    /// The publish call went out for this destination
    pub committed: bool,
}

impl DestinationOutcome {
    /// Outcome for a destination that was never invoked
    pub fn not_attempted(error: PublishError) -> Self {
        Self {
            success: false,
            detail: error.to_string(),
            state: AttemptState::Failed,
            error: Some(error),
            permalink: None,
            committed: false,
        }
    }
}

/// Combined result of publishing one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestrationResult {
    pub asset_name: String,
    pub kind: MediaKind,
    pub outcomes: BTreeMap<DestinationId, DestinationOutcome>,
    /// True iff every required destination for `kind` succeeded
    pub overall_success: bool,
}

impl OrchestrationResult {
    pub fn outcome(&self, destination: DestinationId) -> Option<&DestinationOutcome> {
        self.outcomes.get(&destination)
    }

    /// One-line summary, e.g. `Instagram ✅ | Facebook Page ❌`
    pub fn summary_line(&self) -> String {
        self.outcomes
            .iter()
            .map(|(id, outcome)| format!("{} {}", id.label(), if outcome.success { "✅" } else { "❌" }))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
