//! Reelcast - publish staged media to Instagram and a Facebook Page
//!
//! This library drives one media asset from a Dropbox staging folder
//! through each destination's asynchronous publish protocol (create,
//! process, publish, verify), reconciles partial failures and decides
//! whether the staged asset may be deleted.

pub mod config;
pub mod destinations;
pub mod error;
pub mod graph;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod protocol;
pub mod retention;
pub mod runner;
pub mod schedule;
pub mod staging;
pub mod tokens;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ExecutionMode, Secrets};
pub use error::{PublishError, ReelcastError, Result};
pub use orchestrator::{Orchestrator, RequiredPolicy};
pub use retention::RetentionDecision;
pub use runner::{RunOptions, RunStatus, RunSummary, Runner};
pub use types::{Asset, AttemptState, Captions, DestinationId, MediaKind, OrchestrationResult};
