//! Deleting published toots once they reach a configured age

use tracing::{info, warn};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::platforms::TargetService;

/// Delete the toots of ledger records older than `max_age_days`
///
/// A toot that no longer exists on the target counts as deleted. Records are
/// marked expired rather than removed so their items stay deduplicated.
/// Failure records have no toot and are only marked. Returns the number of
/// records expired; 0 days disables the sweep.
///
/// # Errors
///
/// Ledger errors and authentication failures are returned. Any other delete
/// failure leaves the record for the next sweep.
pub async fn sweep_expired(
    ledger: &dyn Ledger,
    target: &dyn TargetService,
    max_age_days: u32,
) -> Result<usize> {
    if max_age_days == 0 {
        return Ok(0);
    }

    let mut expired = 0;
    for record in ledger.old_records(max_age_days).await? {
        if record.is_success() {
            match target.delete(&record.published_post_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "Failed to delete {} (item {}): {}",
                        record.published_post_id, record.source_item_id, e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        ledger.mark_expired(&record.source_item_id).await?;
        expired += 1;
    }

    if expired > 0 {
        info!(
            "Expired {} records older than {} days on {}",
            expired,
            max_age_days,
            target.name()
        );
    }
    Ok(expired)
}
