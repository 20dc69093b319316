//! In-memory target service and media fetcher for testing
//!
//! `MockTarget` records every call so tests can assert on what the sync
//! engine published, uploaded, and deleted, and can be configured to fail in
//! the ways the real service does.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{PlatformError, Result, SourceError};
use crate::platforms::fetch::{mime_from_url, FetchedMedia, MediaFetcher};
use crate::platforms::TargetService;
use crate::types::MediaHandle;

/// A status the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedStatus {
    pub id: String,
    pub text: String,
    pub reply_to: Option<String>,
    pub media: Vec<MediaHandle>,
}

/// Configuration for mock target behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Error returned by every publish call
    pub publish_error: Option<PlatformError>,

    /// Publishes whose text contains this marker fail with a network error
    pub failing_text: Option<String>,

    /// Uploads whose payload contains this marker are rejected as too large
    pub oversize_marker: Option<String>,

    /// Error returned by every upload that is not rejected as too large
    pub upload_error: Option<PlatformError>,

    /// Error returned by every delete of a status not marked missing
    pub delete_error: Option<PlatformError>,

    /// Error returned by `authenticate`
    pub auth_error: Option<String>,
}

/// Mock target service
#[derive(Debug, Default)]
pub struct MockTarget {
    config: MockConfig,
    next_id: AtomicU64,
    published: Mutex<Vec<PublishedStatus>>,
    publish_attempts: Mutex<usize>,
    uploads: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    missing: Mutex<HashSet<String>>,
}

impl MockTarget {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// A target that accepts everything
    pub fn success() -> Self {
        Self::new(MockConfig::default())
    }

    /// A target whose publish calls always fail with `error`
    pub fn publish_failure(error: PlatformError) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error),
            ..Default::default()
        })
    }

    /// A target that rejects uploads containing `marker` as too large
    pub fn with_oversize_marker(marker: &str) -> Self {
        Self::new(MockConfig {
            oversize_marker: Some(marker.to_string()),
            ..Default::default()
        })
    }

    /// Make `delete` report `post_id` as not found
    pub fn mark_missing(&self, post_id: &str) {
        self.missing.lock().unwrap().insert(post_id.to_string());
    }

    /// Statuses published so far, oldest first
    pub fn published(&self) -> Vec<PublishedStatus> {
        self.published.lock().unwrap().clone()
    }

    /// Publish calls made, successful or not
    pub fn publish_attempts(&self) -> usize {
        *self.publish_attempts.lock().unwrap()
    }

    /// MIME types of all upload attempts, in order
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    /// Ids passed to successful `delete` calls
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", prefix, n)
    }
}

#[async_trait]
impl TargetService for MockTarget {
    async fn authenticate(&mut self) -> Result<()> {
        match &self.config.auth_error {
            Some(msg) => Err(PlatformError::Authentication(msg.clone()).into()),
            None => Ok(()),
        }
    }

    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&str>,
        media: &[MediaHandle],
    ) -> Result<String> {
        *self.publish_attempts.lock().unwrap() += 1;

        if let Some(error) = &self.config.publish_error {
            return Err(error.clone().into());
        }
        if let Some(marker) = &self.config.failing_text {
            if text.contains(marker.as_str()) {
                return Err(PlatformError::Network(format!("status containing {:?} timed out", marker)).into());
            }
        }

        let id = self.next_id("status");
        self.published.lock().unwrap().push(PublishedStatus {
            id: id.clone(),
            text: text.to_string(),
            reply_to: reply_to.map(str::to_string),
            media: media.to_vec(),
        });
        Ok(id)
    }

    async fn upload_media(&self, bytes: Vec<u8>, mime: &str) -> Result<MediaHandle> {
        self.uploads.lock().unwrap().push(mime.to_string());

        if let Some(marker) = &self.config.oversize_marker {
            if String::from_utf8_lossy(&bytes).contains(marker.as_str()) {
                return Err(PlatformError::PayloadTooLarge(format!(
                    "{} bytes of {} rejected",
                    bytes.len(),
                    mime
                ))
                .into());
            }
        }

        if let Some(error) = &self.config.upload_error {
            return Err(error.clone().into());
        }

        Ok(MediaHandle(self.next_id("media")))
    }

    async fn delete(&self, post_id: &str) -> Result<()> {
        if self.missing.lock().unwrap().contains(post_id) {
            return Err(PlatformError::NotFound(format!("status {} not found", post_id)).into());
        }
        if let Some(error) = &self.config.delete_error {
            return Err(error.clone().into());
        }
        self.deleted.lock().unwrap().push(post_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Media fetcher that returns the URL itself as the payload
#[derive(Debug, Default)]
pub struct MockFetcher {
    fail_urls: HashSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail downloads of `url` with a network error
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            fail_urls: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    /// URLs fetched so far, in order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.fail_urls.contains(url) {
            return Err(SourceError::Network(format!("mock download of {} failed", url)).into());
        }
        Ok(FetchedMedia {
            bytes: url.as_bytes().to_vec(),
            mime: mime_from_url(url).to_string(),
        })
    }
}
