//! Single-run driver
//!
//! One run publishes at most one asset:
//!
//! 1. check the long-lived user token and report its expiry
//! 2. resolve today's captions
//! 3. refresh the staging token and list eligible assets
//! 4. fetch a URL for the first asset and resolve destination credentials
//! 5. orchestrate, then apply the retention decision
//!
//! Fatal conditions abort the run with a [`ReelcastError`] and are reported
//! to the notifier once. Per-destination failures are not fatal; they show
//! up in the [`RunSummary`].

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, ExecutionMode, Secrets};
use crate::destinations::facebook::FacebookPageClient;
use crate::destinations::instagram::InstagramClient;
use crate::destinations::Destination;
use crate::error::{PublishError, ReelcastError, Result, StagingError};
use crate::graph::GraphApi;
use crate::notify::{Notifier, Severity};
use crate::orchestrator::{Orchestrator, RequiredPolicy};
use crate::protocol::{ProtocolContext, Timing};
use crate::retention::{self, RetentionDecision};
use crate::schedule;
use crate::staging::dropbox::DropboxStore;
use crate::staging::StagingStore;
use crate::tokens::{Credentials, TokenProvider};
use crate::transport::HttpTransport;
use crate::types::{Captions, DestinationId, OrchestrationResult};

/// How long the retention delete may take once orchestration is over,
/// even if the run itself was cancelled meanwhile
const RETENTION_GRACE: Duration = Duration::from_secs(30);

/// Per-invocation overrides
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cancel the run after this long
    pub deadline: Option<Duration>,
    /// Overrides `publish.mode`
    pub mode: Option<ExecutionMode>,
    /// List eligible assets and today's captions without publishing
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing staged
    Idle,
    DryRun,
    /// An asset went through orchestration
    Completed,
}

/// Everything a caller needs to report on a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    /// Names of the eligible assets at the start of the run
    pub eligible: Vec<String>,
    pub captions: Captions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OrchestrationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionDecision>,
    pub deleted: bool,
    pub cancelled: bool,
    pub duration_secs: f64,
}

impl RunSummary {
    fn new(run_id: &str, status: RunStatus, captions: Captions) -> Self {
        Self {
            run_id: run_id.to_string(),
            status,
            eligible: Vec::new(),
            captions,
            result: None,
            retention: None,
            deleted: false,
            cancelled: false,
            duration_secs: 0.0,
        }
    }

    /// 0 when nothing needed doing or everything required succeeded,
    /// 130 when cancelled, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            return 130;
        }
        match (&self.status, &self.result) {
            (RunStatus::Completed, Some(result)) if !result.overall_success => 1,
            _ => 0,
        }
    }
}

pub struct Runner {
    config: Config,
    secrets: Arc<Secrets>,
    transport: Arc<dyn HttpTransport>,
    notifier: Arc<dyn Notifier>,
}

impl Runner {
    pub fn new(
        config: Config,
        secrets: Secrets,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            secrets: Arc::new(secrets),
            transport,
            notifier,
        }
    }

    /// Execute one run. `cancel` is the caller's shutdown token (signals);
    /// the deadline, if any, cancels only this run.
    pub async fn run(&self, options: RunOptions, cancel: CancellationToken) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id, account = %self.config.account.key);

        async {
            let started = Instant::now();
            let cancel = cancel.child_token();
            let _deadline = options.deadline.map(|deadline| arm_deadline(deadline, cancel.clone()));

            let now = Utc::now();
            let local = schedule::parse_utc_offset(&self.config.schedule.utc_offset)
                .map(|offset| now.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| now.format("%Y-%m-%d %H:%M:%S UTC").to_string());
            self.notify(&format!("📡 Run started at: {}", local), Severity::Info).await;

            let outcome = self.execute(&run_id, &options, &cancel).await;
            let elapsed = started.elapsed().as_secs_f64();

            match outcome {
                Ok(mut summary) => {
                    summary.duration_secs = elapsed;
                    self.notify(&format!("🏁 Run complete in {:.1} seconds", elapsed), Severity::Info)
                        .await;
                    Ok(summary)
                }
                Err(e) => {
                    warn!(error = %e, "Run aborted");
                    self.notify(
                        &format!("❌ Run aborted after {:.1} seconds: {}", elapsed, e),
                        Severity::Error,
                    )
                    .await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn notify(&self, message: &str, severity: Severity) {
        self.notifier.notify(message, severity).await;
    }

    async fn execute(&self, run_id: &str, options: &RunOptions, cancel: &CancellationToken) -> Result<RunSummary> {
        let config = &self.config;
        let graph = GraphApi::new(Arc::clone(&self.transport), &config.graph);
        let provider = TokenProvider::new(graph.clone(), Arc::clone(&self.secrets), config);

        // User token
        let status = provider.inspect_user_token(cancel).await.map_err(run_error)?;
        if !status.is_valid {
            return Err(ReelcastError::Credential(format!(
                "Meta user token is invalid. {}",
                status.describe(Utc::now())
            )));
        }
        self.notify(
            &format!("🔐 Meta token is valid\n{}", status.describe(Utc::now())),
            Severity::Info,
        )
        .await;

        // Captions
        let (captions, warning) = schedule::todays_captions(&config.schedule, &config.account.key, Utc::now());
        if let Some(warning) = warning {
            self.notify(&format!("⚠️ {}", warning), Severity::Warning).await;
        }

        // Staging
        let staging_credentials = provider.refresh_staging_token(cancel).await.map_err(staging_error)?;
        let store = DropboxStore::new(Arc::clone(&self.transport), &config.staging, staging_credentials);
        let assets = store.list_eligible(cancel).await.map_err(staging_error)?;
        if cancel.is_cancelled() {
            return Err(ReelcastError::Cancelled);
        }

        let mut summary = RunSummary::new(run_id, RunStatus::Idle, captions.clone());
        summary.eligible = assets.iter().map(|a| a.name.clone()).collect();

        let Some(asset) = assets.first().cloned() else {
            info!(folder = %store.folder(), "No eligible assets");
            self.notify(&format!("📭 No files found in {}", store.folder()), Severity::Info)
                .await;
            return Ok(summary);
        };

        if options.dry_run {
            summary.status = RunStatus::DryRun;
            self.notify(
                &format!(
                    "🧪 Dry run: {} eligible ({}), next would be {}\n📝 Caption: {}",
                    assets.len(),
                    summary.eligible.join(", "),
                    asset.name,
                    captions.caption
                ),
                Severity::Info,
            )
            .await;
            return Ok(summary);
        }

        self.notify(
            &format!(
                "🎯 Processing {}\n📂 Type: {}\n📐 Size: {}\n📦 Remaining: {}",
                asset.name,
                asset.kind,
                asset.size_display(),
                assets.len()
            ),
            Severity::Info,
        )
        .await;

        let fetch_url = store.fetch_url(&asset, cancel).await.map_err(staging_error)?;
        let asset = asset.with_fetch_url(fetch_url);

        // Destinations
        let policy = RequiredPolicy::from_config(&config.publish);
        let ctx = ProtocolContext::new(Timing::from(&config.timing), cancel.clone(), Arc::clone(&self.notifier));
        let mode = options.mode.unwrap_or(config.publish.mode);
        let mut orchestrator = Orchestrator::new(policy.clone(), mode, ctx).with_crosspost(config.publish.crosspost);

        let tokens = provider.for_asset();
        let mut unavailable = Vec::new();
        let required = policy.required(asset.kind);
        for id in required {
            match tokens.get_destination_token(*id, cancel).await {
                Ok(credentials) => orchestrator.register(self.build_destination(*id, &graph, credentials)),
                Err(PublishError::Cancelled) => return Err(ReelcastError::Cancelled),
                Err(e) => {
                    warn!(destination = %id, error = %e, "Destination credentials unavailable");
                    self.notify(&format!("❌ {}: {}", id.label(), e), Severity::Error).await;
                    unavailable.push(format!("{}: {}", id.label(), e));
                    orchestrator.register_unavailable(*id, e);
                }
            }
        }
        if !required.is_empty() && unavailable.len() == required.len() {
            return Err(ReelcastError::Credential(unavailable.join("; ")));
        }

        // Publish
        let result = orchestrator.publish(&asset, &captions).await;
        let decision = retention::decide(&result);
        let cleanup = CancellationToken::new();
        let _grace = arm_deadline(RETENTION_GRACE, cleanup.clone());
        let deleted = retention::apply(decision, &store, &asset, self.notifier.as_ref(), &cleanup).await;

        let mut report = format!("📊 Final Status: {}", result.summary_line());
        for (id, outcome) in &result.outcomes {
            report.push_str(&format!("\n{}: {}", id.label(), outcome.detail));
        }
        let severity = if result.overall_success { Severity::Info } else { Severity::Error };
        self.notify(&report, severity).await;

        summary.status = RunStatus::Completed;
        summary.cancelled = cancel.is_cancelled();
        summary.result = Some(result);
        summary.retention = Some(decision);
        summary.deleted = deleted;
        Ok(summary)
    }

    fn build_destination(&self, id: DestinationId, graph: &GraphApi, credentials: Credentials) -> Arc<dyn Destination> {
        let max_age = Duration::from_secs(self.config.staging.fetch_url_max_age_secs);
        match id {
            DestinationId::Instagram => Arc::new(InstagramClient::new(graph.clone(), credentials, max_age)),
            DestinationId::FacebookPage => Arc::new(FacebookPageClient::new(graph.clone(), credentials, max_age)),
        }
    }
}

fn run_error(error: PublishError) -> ReelcastError {
    match error {
        PublishError::Cancelled => ReelcastError::Cancelled,
        other => ReelcastError::Credential(other.to_string()),
    }
}

fn staging_error(error: StagingError) -> ReelcastError {
    match error {
        StagingError::Cancelled => ReelcastError::Cancelled,
        other => ReelcastError::Staging(other),
    }
}

/// Cancel `cancel` once `deadline` elapses. The timer stops when the
/// returned guard is dropped.
fn arm_deadline(deadline: Duration, cancel: CancellationToken) -> tokio_util::sync::DropGuard {
    let done = CancellationToken::new();
    let stop = done.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                warn!(deadline = ?deadline, "Deadline reached; cancelling");
                cancel.cancel();
            }
            _ = stop.cancelled() => {}
        }
    });
    done.drop_guard()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DestinationOutcome, MediaKind};
    use std::collections::BTreeMap;

    fn completed(overall_success: bool) -> RunSummary {
        let mut summary = RunSummary::new("id", RunStatus::Completed, Captions::new("c", "c"));
        summary.result = Some(OrchestrationResult {
            asset_name: "a.mp4".to_string(),
            kind: MediaKind::Video,
            outcomes: BTreeMap::<DestinationId, DestinationOutcome>::new(),
            overall_success,
        });
        summary
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunSummary::new("id", RunStatus::Idle, Captions::new("c", "c")).exit_code(), 0);
        assert_eq!(completed(true).exit_code(), 0);
        assert_eq!(completed(false).exit_code(), 1);

        let mut cancelled = completed(false);
        cancelled.cancelled = true;
        assert_eq!(cancelled.exit_code(), 130);
    }

    #[test]
    fn test_run_error_mapping() {
        assert!(matches!(run_error(PublishError::Cancelled), ReelcastError::Cancelled));
        assert!(matches!(
            run_error(PublishError::Transport("reset".to_string())),
            ReelcastError::Credential(_)
        ));
    }

    #[test]
    fn test_staging_error_mapping() {
        assert!(matches!(staging_error(StagingError::Cancelled), ReelcastError::Cancelled));
        assert!(matches!(
            staging_error(StagingError::MissingField("link".to_string())),
            ReelcastError::Staging(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels() {
        let cancel = CancellationToken::new();
        let _guard = arm_deadline(Duration::from_secs(30), cancel.clone());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_guard_disarms() {
        let cancel = CancellationToken::new();
        drop(arm_deadline(Duration::from_secs(30), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!cancel.is_cancelled());
    }
}
