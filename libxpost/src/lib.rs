//! xpost - mirror microblog accounts to Mastodon
//!
//! This library holds everything the `xpost-sync` daemon does: reading the
//! source feed, composing toots, threading reposts under their originals,
//! re-uploading media, and keeping a ledger of what has been published so
//! nothing goes out twice.

pub mod compose;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod retention;
pub mod source;
pub mod sync;
pub mod thread;
pub mod types;

// Re-export commonly used types
pub use config::{Config, EffectiveSettings, UserConfig};
pub use db::Database;
pub use error::{Result, XpostError};
pub use ledger::Ledger;
pub use sync::{CycleReport, ItemOutcome, SyncEngine};
pub use types::{PublicationRecord, SourceItem};
