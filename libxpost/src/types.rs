//! Core types for xpost

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Number of characters of the source text kept in the ledger summary
pub const SUMMARY_LEN: usize = 30;

/// A post as returned by the source feed
///
/// Media URL lists keep the feed's delimited form: images are separated by
/// `,`, videos by `;`, and an empty string means none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub user_id: String,
    pub screen_name: String,
    pub text: String,
    pub pics: String,
    pub video_url: String,
    pub retweet: Option<Box<SourceItem>>,
}

impl SourceItem {
    pub fn is_repost(&self) -> bool {
        self.retweet.is_some()
    }

    pub fn image_urls(&self) -> Vec<&str> {
        split_urls(&self.pics, ',')
    }

    pub fn video_urls(&self) -> Vec<&str> {
        split_urls(&self.video_url, ';')
    }

    pub fn has_video(&self) -> bool {
        !self.video_urls().is_empty()
    }
}

fn split_urls(list: &str, delimiter: char) -> Vec<&str> {
    list.split(delimiter)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .collect()
}

/// Outcome of publishing one source item, as stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    /// Target post id; empty while the item is in the pending-failure state
    pub published_post_id: String,
    pub source_item_id: String,
    pub author_id: String,
    pub author_name: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub failure_count: u32,
}

impl PublicationRecord {
    /// Build the success record for `item` published as `post_id`
    pub fn success(item: &SourceItem, post_id: impl Into<String>) -> Self {
        Self {
            published_post_id: post_id.into(),
            source_item_id: item.id.clone(),
            author_id: item.user_id.clone(),
            author_name: normalize_name(&item.screen_name),
            summary: summarize(&item.text),
            timestamp: Utc::now(),
            failure_count: 0,
        }
    }

    /// Build the first failure record for `item`
    pub fn first_failure(item: &SourceItem) -> Self {
        Self {
            published_post_id: String::new(),
            source_item_id: item.id.clone(),
            author_id: item.user_id.clone(),
            author_name: normalize_name(&item.screen_name),
            summary: summarize(&item.text),
            timestamp: Utc::now(),
            failure_count: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure_count == 0 && !self.published_post_id.is_empty()
    }
}

/// Canonical (NFC) form of an author name
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}

/// First [`SUMMARY_LEN`] characters of a text
pub fn summarize(text: &str) -> String {
    text.chars().take(SUMMARY_LEN).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Label used when media is listed as links instead of uploaded
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "图片",
            MediaKind::Video => "视频",
        }
    }
}

/// A media attachment candidate derived from a source item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaItem {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Video,
            url: url.into(),
        }
    }
}

/// Target-side identifier of an uploaded attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(pub String);

impl MediaHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
