//! Deciding how a repost relates to its original on the target

use crate::config::EffectiveSettings;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::types::SourceItem;

/// Deepest level at which an original is published as its own toot
///
/// An original found at depth 0 may be published standalone (depth 1). Any
/// repost nested below that is copied inline instead.
pub const MAX_THREAD_DEPTH: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadPlan {
    NotRepost,
    /// Copy the original's text into this toot
    Inline,
    /// Reply to the already-published original
    ReplyTo(String),
    /// Publish the original first, then reply to it
    PublishOriginal,
}

/// Work out how `item` should be threaded
pub async fn plan(
    item: &SourceItem,
    settings: &EffectiveSettings,
    ledger: &dyn Ledger,
    depth: usize,
) -> Result<ThreadPlan> {
    let Some(original) = item.retweet.as_deref() else {
        return Ok(ThreadPlan::NotRepost);
    };

    if !settings.standalone_repost {
        return Ok(ThreadPlan::Inline);
    }

    if let Some(post_id) = ledger.lookup(&original.id).await? {
        return Ok(ThreadPlan::ReplyTo(post_id));
    }

    if depth >= MAX_THREAD_DEPTH {
        return Ok(ThreadPlan::Inline);
    }

    Ok(ThreadPlan::PublishOriginal)
}
