//! Error types for xpost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, XpostError>;

#[derive(Error, Debug)]
pub enum XpostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Source feed error: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl XpostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            XpostError::InvalidInput(_) => 3,
            XpostError::Config(_) => 2,
            XpostError::Platform(PlatformError::Authentication(_)) => 2,
            XpostError::Platform(_) => 1,
            XpostError::Source(_) => 1,
            XpostError::Database(_) => 1,
        }
    }

    /// Whether a failed publish attempt should be turned into a ledger
    /// failure increment instead of aborting the cycle.
    ///
    /// Authentication failures would fail every item the same way, and a
    /// broken ledger cannot record anything, so those propagate.
    ///
    /// A request the target rejects as invalid (`PlatformError::Validation`,
    /// HTTP 422) is recoverable: it concerns that one item, and the failure
    /// threshold stops it from being retried forever.
    pub fn is_recoverable(&self) -> bool {
        match self {
            XpostError::Platform(PlatformError::Authentication(_)) => false,
            XpostError::Platform(_) => true,
            XpostError::Source(_) => true,
            XpostError::Config(_) | XpostError::Database(_) | XpostError::InvalidInput(_) => false,
        }
    }

    /// True when the target rejected an upload because the payload is too big
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, XpostError::Platform(PlatformError::PayloadTooLarge(_)))
    }

    /// True when the target reported that the referenced object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, XpostError::Platform(PlatformError::NotFound(_)))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt ledger row for {item_id}: {reason}")]
    CorruptRow { item_id: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Parse(String),
}
