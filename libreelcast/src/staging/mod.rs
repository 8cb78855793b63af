//! Staging store
//!
//! Where pending media waits before it is published. The store lists
//! eligible assets, hands out short-lived fetch URLs destinations can
//! download from, and deletes assets once the retention decision allows it.
//! Every call gives up with [`StagingError::Cancelled`] once the run's
//! token fires.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StagingError;
use crate::types::{Asset, FetchUrl};

pub mod dropbox;

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Assets with an allow-listed extension, in listing order
    async fn list_eligible(&self, cancel: &CancellationToken) -> Result<Vec<Asset>, StagingError>;

    /// Fresh URL the destinations can fetch `asset` from
    async fn fetch_url(&self, asset: &Asset, cancel: &CancellationToken) -> Result<FetchUrl, StagingError>;

    async fn delete(&self, asset: &Asset, cancel: &CancellationToken) -> Result<(), StagingError>;
}
