//! Durable record of what has been published
//!
//! The ledger is the only source of truth for "has this item already been
//! published, or is it suppressed by repeated failure". Nothing in the sync
//! engine asks the target service for that.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{PublicationRecord, SourceItem};

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Target post id of a successfully published item
    async fn lookup(&self, item_id: &str) -> Result<Option<String>>;

    /// Recorded failures for an item; 0 when there is no row
    async fn failure_count(&self, item_id: &str) -> Result<u32>;

    /// Replace any prior rows for these items with success rows
    ///
    /// Applied all-or-nothing: a partially stored chain would wrongly
    /// suppress the retry of the missing items.
    async fn record_success(&self, records: &[PublicationRecord]) -> Result<()>;

    /// Increment the failure row of `item`, inserting it with count 1 if
    /// absent. Rows that record a success are left untouched.
    async fn record_failure(&self, item: &SourceItem) -> Result<()>;

    /// Records whose timestamp is older than `max_age_days`; 0 disables the
    /// query and returns nothing
    async fn old_records(&self, max_age_days: u32) -> Result<Vec<PublicationRecord>>;

    /// Flag a record whose target post has been deleted by the retention
    /// sweep. The row keeps suppressing re-publication but is no longer
    /// returned by [`Ledger::old_records`].
    async fn mark_expired(&self, item_id: &str) -> Result<()>;
}
