//! Sync engine
//!
//! One cycle walks every configured user, fetches their recent posts, and
//! publishes the ones the ledger does not know yet, oldest first. Each item
//! ends up skipped, published, or failed; only errors that would make every
//! later item fail the same way (rejected credentials, a broken ledger)
//! abort the cycle.

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compose::{self, ComposeContext, RepostLayout};
use crate::config::{Config, EffectiveSettings};
use crate::error::{Result, XpostError};
use crate::ledger::Ledger;
use crate::media::{self, UploadReport};
use crate::platforms::fetch::MediaFetcher;
use crate::platforms::TargetService;
use crate::source::SourceFeed;
use crate::thread::{self, ThreadPlan};
use crate::types::{PublicationRecord, SourceItem};

/// Lottery and giveaway posts
static SPAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"抽奖|开奖|转发抽|抽取?\s*\d+\s*[位个名]").expect("spam regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyPublished,
    RepostExcluded,
    Spam,
    /// Failed more often than the configured threshold
    Suppressed(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Skipped(SkipReason),
    Published(String),
    Failed,
}

/// Tally of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Users whose feed could not be read
    pub feed_errors: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped(_) => self.skipped += 1,
            ItemOutcome::Published(_) => self.published += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct SyncEngine {
    ledger: Arc<dyn Ledger>,
    target: Arc<dyn TargetService>,
    fetcher: Arc<dyn MediaFetcher>,
}

impl SyncEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        target: Arc<dyn TargetService>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        Self {
            ledger,
            target,
            fetcher,
        }
    }

    /// Run one pass over every user in `config`
    ///
    /// # Errors
    ///
    /// Only unrecoverable errors are returned; see
    /// [`XpostError::is_recoverable`].
    pub async fn run_cycle(&self, config: &Config, feed: &dyn SourceFeed) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for user in &config.user_list {
            let items = match feed.fetch_recent(user).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("Failed to fetch feed of {}: {}", user.id, e);
                    report.feed_errors += 1;
                    continue;
                }
            };
            report.fetched += items.len();

            let settings = config.effective(&user.id);
            for item in items.iter().rev() {
                let outcome = self
                    .process_item(item, &settings, config.failure_threshold)
                    .await?;
                debug!("Item {} of {}: {:?}", item.id, user.id, outcome);
                report.record(&outcome);
            }
        }

        info!(
            "Cycle finished: {} fetched, {} published, {} skipped, {} failed",
            report.fetched, report.published, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Filter, publish, and record a single item
    pub async fn process_item(
        &self,
        item: &SourceItem,
        settings: &EffectiveSettings,
        failure_threshold: u32,
    ) -> Result<ItemOutcome> {
        if self.ledger.lookup(&item.id).await?.is_some() {
            return Ok(ItemOutcome::Skipped(SkipReason::AlreadyPublished));
        }
        if item.is_repost() && !settings.include_repost {
            return Ok(ItemOutcome::Skipped(SkipReason::RepostExcluded));
        }
        if is_spam(item) {
            debug!("Skipping lottery post {}", item.id);
            return Ok(ItemOutcome::Skipped(SkipReason::Spam));
        }
        let failures = self.ledger.failure_count(&item.id).await?;
        if failures > failure_threshold {
            return Ok(ItemOutcome::Skipped(SkipReason::Suppressed(failures)));
        }

        let mut records = Vec::new();
        let result = self.publish_item(item, settings, 0, &mut records).await;

        // Anything that did get published must reach the ledger before the
        // failure does, or a retry would publish it a second time
        if !records.is_empty() {
            self.ledger.record_success(&records).await?;
        }

        match result {
            Ok(post_id) => {
                info!("Published {} as {} on {}", item.id, post_id, self.target.name());
                Ok(ItemOutcome::Published(post_id))
            }
            Err(e) if e.is_recoverable() => {
                warn!("Failed to publish {} (attempt {}): {}", item.id, failures + 1, e);
                self.ledger.record_failure(item).await?;
                Ok(ItemOutcome::Failed)
            }
            Err(e) => Err(e),
        }
    }

    /// Publish `item`, publishing its original first when it has to be
    /// threaded under one that is not on the target yet
    ///
    /// A success record is pushed to `records` for every toot created,
    /// original first.
    fn publish_item<'a>(
        &'a self,
        item: &'a SourceItem,
        settings: &'a EffectiveSettings,
        depth: usize,
        records: &'a mut Vec<PublicationRecord>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let plan = thread::plan(item, settings, self.ledger.as_ref(), depth).await?;
            let (layout, reply_to) = match plan {
                ThreadPlan::NotRepost => (RepostLayout::None, None),
                ThreadPlan::Inline => (RepostLayout::Inline, None),
                ThreadPlan::ReplyTo(post_id) => (RepostLayout::Linked, Some(post_id)),
                ThreadPlan::PublishOriginal => {
                    let original = item.retweet.as_deref().ok_or_else(|| {
                        XpostError::InvalidInput(format!("{} has no original to publish", item.id))
                    })?;
                    debug!("Publishing original {} ahead of {}", original.id, item.id);
                    let post_id = self
                        .publish_item(original, settings, depth + 1, records)
                        .await?;
                    (RepostLayout::Linked, Some(post_id))
                }
            };

            let candidates = media::collect(item, layout == RepostLayout::Inline);
            let (report, external_media) = if settings.external_media {
                (UploadReport::default(), Some(candidates.as_slice()))
            } else {
                let report = media::upload(
                    &candidates,
                    settings.max_attachment_count,
                    self.fetcher.as_ref(),
                    self.target.as_ref(),
                )
                .await?;
                (report, None)
            };

            let composed = compose::compose(
                item,
                settings,
                &ComposeContext {
                    repost: layout,
                    external_media,
                    media_omitted: report.media_omitted(),
                },
            );
            if composed.source_link_forced {
                debug!("Source link added to {}: content left out", item.id);
            }

            let post_id = self
                .target
                .publish(&composed.text, reply_to.as_deref(), &report.handles)
                .await?;
            records.push(PublicationRecord::success(item, post_id.clone()));
            Ok(post_id)
        })
    }
}

/// Whether the item (or the post it reposts) is a lottery post
pub fn is_spam(item: &SourceItem) -> bool {
    SPAM.is_match(&item.text)
        || item
            .retweet
            .as_deref()
            .is_some_and(|original| SPAM.is_match(&original.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::platforms::mock::{MockFetcher, MockTarget};

    fn settings() -> EffectiveSettings {
        EffectiveSettings {
            toot_len_limit: 500,
            max_attachment_count: 4,
            include_repost: true,
            external_media: false,
            standalone_repost: false,
            include_post_url: false,
        }
    }

    fn item(id: &str, text: &str) -> SourceItem {
        SourceItem {
            id: id.to_string(),
            user_id: "1".to_string(),
            screen_name: "someone".to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    async fn engine(target: Arc<MockTarget>) -> (SyncEngine, Arc<Database>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let engine = SyncEngine::new(db.clone(), target, Arc::new(MockFetcher::new()));
        (engine, db)
    }

    #[test]
    fn test_spam_detection() {
        assert!(is_spam(&item("1", "转发本条微博抽奖送三台手机")));
        assert!(is_spam(&item("1", "明天开奖")));
        assert!(is_spam(&item("1", "抽3位送签名照")));
        assert!(!is_spam(&item("1", "今天天气不错")));

        let mut repost = item("2", "支持一下");
        repost.retweet = Some(Box::new(item("3", "关注并转发抽 10 个人")));
        assert!(is_spam(&repost));
    }

    #[tokio::test]
    async fn test_publish_and_record() {
        let target = Arc::new(MockTarget::success());
        let (engine, db) = engine(target.clone()).await;

        let outcome = engine
            .process_item(&item("10", "hello"), &settings(), 3)
            .await
            .unwrap();

        let ItemOutcome::Published(post_id) = outcome else {
            panic!("expected publish, got {:?}", outcome);
        };
        assert_eq!(db.lookup("10").await.unwrap(), Some(post_id));
        assert_eq!(target.published()[0].text, "#someone\nhello\n\n");
    }

    #[tokio::test]
    async fn test_excluded_repost_is_skipped() {
        let target = Arc::new(MockTarget::success());
        let (engine, _db) = engine(target.clone()).await;

        let mut repost = item("11", "look");
        repost.retweet = Some(Box::new(item("12", "original")));
        let mut no_reposts = settings();
        no_reposts.include_repost = false;

        assert_eq!(
            engine.process_item(&repost, &no_reposts, 3).await.unwrap(),
            ItemOutcome::Skipped(SkipReason::RepostExcluded)
        );
        assert_eq!(target.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn test_authentication_error_propagates() {
        let target = Arc::new(MockTarget::publish_failure(
            crate::error::PlatformError::Authentication("token revoked".to_string()),
        ));
        let (engine, db) = engine(target).await;

        let result = engine.process_item(&item("13", "hello"), &settings(), 3).await;
        assert!(result.is_err());
        assert_eq!(db.failure_count("13").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inline_repost_carries_original_media() {
        let target = Arc::new(MockTarget::success());
        let (engine, _db) = engine(target.clone()).await;

        let mut original = item("14", "原文");
        original.pics = "https://a/1.jpg,https://a/2.jpg".to_string();
        let mut repost = item("15", "转");
        repost.retweet = Some(Box::new(original));

        engine.process_item(&repost, &settings(), 3).await.unwrap();

        let published = target.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].media.len(), 2);
        assert!(published[0].text.contains("【转发】#someone\n原文"));
    }

    #[tokio::test]
    async fn test_external_media_is_listed_not_uploaded() {
        let target = Arc::new(MockTarget::success());
        let (engine, _db) = engine(target.clone()).await;

        let mut with_pics = item("16", "看图");
        with_pics.pics = "https://a/1.jpg".to_string();
        let mut external = settings();
        external.external_media = true;

        engine.process_item(&with_pics, &external, 3).await.unwrap();

        assert!(target.uploads().is_empty());
        let published = target.published();
        assert!(published[0].media.is_empty());
        assert!(published[0].text.contains("图片：https://a/1.jpg\n"));
    }
}
