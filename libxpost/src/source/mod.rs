//! Source feed abstraction and implementations

use async_trait::async_trait;

use crate::config::UserConfig;
use crate::error::Result;
use crate::types::SourceItem;

pub mod mock;
pub mod weibo;

/// Read access to the accounts being mirrored
#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Recent posts of `user`, newest first
    ///
    /// # Errors
    ///
    /// Returns `SourceError` when the feed cannot be fetched or parsed. The
    /// sync engine logs it and moves on to the next user.
    async fn fetch_recent(&self, user: &UserConfig) -> Result<Vec<SourceItem>>;
}
