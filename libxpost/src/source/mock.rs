//! In-memory source feed for testing

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::config::UserConfig;
use crate::error::{Result, SourceError};
use crate::source::SourceFeed;
use crate::types::SourceItem;

/// Feed that serves whatever items were last set for each user
#[derive(Debug, Default)]
pub struct MockFeed {
    items: Mutex<HashMap<String, Vec<SourceItem>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the feed of `user_id`; `items` must be newest first
    pub fn set_items(&self, user_id: &str, items: Vec<SourceItem>) {
        self.items.lock().unwrap().insert(user_id.to_string(), items);
    }

    /// Make every fetch for `user_id` fail with a network error
    pub fn fail_user(&self, user_id: &str) {
        self.failing.lock().unwrap().insert(user_id.to_string());
    }
}

#[async_trait]
impl SourceFeed for MockFeed {
    async fn fetch_recent(&self, user: &UserConfig) -> Result<Vec<SourceItem>> {
        if self.failing.lock().unwrap().contains(&user.id) {
            return Err(SourceError::Network(format!("feed of {} unavailable", user.id)).into());
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(&user.id)
            .cloned()
            .unwrap_or_default())
    }
}
