//! Target service abstraction and implementations
//!
//! The sync engine only talks to the target through [`TargetService`], so the
//! Mastodon client can be swapped for the mock in tests.
//!
//! # Examples
//!
//! ```no_run
//! use libxpost::platforms::{mastodon::MastodonClient, TargetService};
//!
//! # async fn example() -> libxpost::error::Result<()> {
//! let mut client = MastodonClient::new(
//!     "https://botsin.space".to_string(),
//!     "your-access-token".to_string(),
//! )?;
//! client.authenticate().await?;
//!
//! let post_id = client.publish("Hello from xpost", None, &[]).await?;
//! println!("Posted: {}", post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::types::MediaHandle;

pub mod fetch;
pub mod mastodon;

// Mock target is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Operations the sync engine needs from the target microblogging service
#[async_trait]
pub trait TargetService: Send + Sync {
    /// Verify the credentials against the service
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` if the token is rejected.
    async fn authenticate(&mut self) -> Result<()>;

    /// Publish a status and return its id
    ///
    /// # Arguments
    ///
    /// * `text` - Final composed text
    /// * `reply_to` - Status to thread under, if any
    /// * `media` - Handles returned by [`TargetService::upload_media`]
    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&str>,
        media: &[MediaHandle],
    ) -> Result<String>;

    /// Upload one attachment
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::PayloadTooLarge` when the service refuses the
    /// payload because of its size; callers drop that attachment and go on.
    async fn upload_media(&self, bytes: Vec<u8>, mime: &str) -> Result<MediaHandle>;

    /// Delete a status
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::NotFound` when the status does not exist
    /// (anymore); callers treat that as already deleted.
    async fn delete(&self, post_id: &str) -> Result<()>;

    /// Lowercase identifier for logs (e.g. "mastodon")
    fn name(&self) -> &str;

    /// Largest attachment the service accepts, in bytes
    ///
    /// Default is 40MB (Mastodon limit).
    fn max_attachment_size(&self) -> u64 {
        40 * 1024 * 1024
    }
}
