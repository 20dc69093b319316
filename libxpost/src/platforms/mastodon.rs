//! Mastodon target implementation
//!
//! Talks to Mastodon (and other Fediverse servers implementing the Mastodon
//! API) through the megalodon library.

use async_trait::async_trait;
use megalodon::entities::UploadMedia;
use megalodon::megalodon::{PostStatusInputOptions, PostStatusOutput};
use megalodon::{Megalodon, SNS};
use secrecy::ExposeSecret;

use crate::config::Config;
use crate::credentials::read_token;
use crate::error::{PlatformError, Result};
use crate::platforms::TargetService;
use crate::types::MediaHandle;

/// Mastodon API client
pub struct MastodonClient {
    /// The megalodon client for API interactions
    client: Box<dyn Megalodon + Send + Sync>,

    /// The instance URL (e.g., "https://botsin.space")
    instance_url: String,

    /// Character limit for posts (instance-specific)
    character_limit: usize,
}

impl MastodonClient {
    /// Create a new Mastodon client
    ///
    /// Uses the default character limit (500) until
    /// [`MastodonClient::fetch_instance_info`] has been called.
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
            character_limit: 500, // Default, will be updated by fetch_instance_info
        })
    }

    /// Create a client for the configured instance with the configured token file
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = read_token(&config.token_file)?;
        Self::new(config.instance_url(), token.expose_secret().to_string())
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Character limit reported by the instance
    pub fn character_limit(&self) -> usize {
        self.character_limit
    }

    /// Query the instance for its status character limit
    pub async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        let limit = response.json.configuration.statuses.max_characters;
        self.character_limit = limit as usize;

        Ok(())
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        let char_count = content.chars().count();

        if char_count > self.character_limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Mastodon's {} character limit (current: {} characters)",
                self.character_limit, char_count
            ))
            .into());
        }

        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        Ok(())
    }
}

#[async_trait]
impl TargetService for MastodonClient {
    async fn authenticate(&mut self) -> Result<()> {
        self.client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "authenticate"))?;

        Ok(())
    }

    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&str>,
        media: &[MediaHandle],
    ) -> Result<String> {
        self.validate_content(text)?;

        let options = PostStatusInputOptions {
            media_ids: if media.is_empty() {
                None
            } else {
                Some(media.iter().map(|m| m.as_str().to_string()).collect())
            },
            in_reply_to_id: reply_to.map(str::to_string),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(text.to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let post_id = match response.json {
            PostStatusOutput::Status(status) => status.id,
            PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(post_id)
    }

    async fn upload_media(&self, bytes: Vec<u8>, mime: &str) -> Result<MediaHandle> {
        let size = bytes.len() as u64;
        if size > self.max_attachment_size() {
            return Err(PlatformError::PayloadTooLarge(format!(
                "{} attachment of {} bytes exceeds the {} byte limit",
                mime,
                size,
                self.max_attachment_size()
            ))
            .into());
        }

        let reader = Box::new(std::io::Cursor::new(bytes));
        let response = self
            .client
            .upload_media_reader(reader, None)
            .await
            .map_err(|e| map_megalodon_error(e, "upload media"))?;

        let id = match response.json {
            UploadMedia::Attachment(attachment) => attachment.id,
            UploadMedia::AsyncAttachment(attachment) => attachment.id,
        };

        Ok(MediaHandle(id))
    }

    async fn delete(&self, post_id: &str) -> Result<()> {
        self.client
            .delete_status(post_id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "delete status"))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "mastodon"
    }
}

/// Map megalodon errors to PlatformError
///
/// # Error Mapping
///
/// - HTTP 401/403 → `PlatformError::Authentication` (OAuth token issues)
/// - HTTP 404 → `PlatformError::NotFound` (deleted or unknown status)
/// - HTTP 413 → `PlatformError::PayloadTooLarge` (attachment too big)
/// - HTTP 422 → `PlatformError::Validation` (content validation failures)
/// - HTTP 429 → `PlatformError::RateLimit` (rate limit exceeded)
/// - HTTP 5xx → `PlatformError::Network` (server errors)
/// - Parse errors → `PlatformError::Posting` (response parsing failures)
/// - Other errors → `PlatformError::Network` (network/connection issues)
///
/// The status code megalodon attaches to the error is used when present; the
/// message is only inspected when there is none.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let status = match &error {
        megalodon::error::Error::OwnError(own) => own.status,
        megalodon::error::Error::RequestError(e) => e.status().map(|s| s.as_u16()),
        _ => None,
    };
    classify_error(&error.to_string(), status, context)
}

fn classify_error(error_str: &str, status: Option<u16>, context: &str) -> PlatformError {
    let error_lower = error_str.to_lowercase();

    match status.or_else(|| extract_http_status(error_str)) {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}. \
                Suggestion: Verify the access token is valid and has not been revoked.",
            context, error_str
        )),
        Some(404) => PlatformError::NotFound(format!("Mastodon ({}): {}", context, error_str)),
        Some(413) => {
            PlatformError::PayloadTooLarge(format!("Mastodon ({}): {}", context, error_str))
        }
        Some(422) => PlatformError::Validation(format!(
            "Mastodon validation failed ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Network(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None => {
            if error_lower.contains("unauthorized")
                || error_lower.contains("forbidden")
                || error_lower.contains("token")
            {
                PlatformError::Authentication(format!(
                    "Mastodon authentication failed ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("too large") || error_lower.contains("file size") {
                PlatformError::PayloadTooLarge(format!("Mastodon ({}): {}", context, error_str))
            } else if error_lower.contains("not found") {
                PlatformError::NotFound(format!("Mastodon ({}): {}", context, error_str))
            } else if error_lower.contains("parse")
                || error_lower.contains("json")
                || error_lower.contains("deserialize")
            {
                PlatformError::Posting(format!(
                    "Mastodon response parse error ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                PlatformError::RateLimit(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else {
                PlatformError::Network(format!("Mastodon error ({}): {}", context, error_str))
            }
        }
    }
}

/// Extract HTTP status code from error message
///
/// Looks for patterns like "HTTP 401", "status 403", "401:", etc.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code_str) = after_prefix.get(0..3) {
                if let Ok(code) = code_str.parse::<u16>() {
                    if (100..=599).contains(&code) {
                        return Some(code);
                    }
                }
            }
        }
    }

    // Standalone 3-digit codes followed by colon or space
    for (i, window) in error_str.as_bytes().windows(4).enumerate() {
        if window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2].is_ascii_digit()
            && (window[3] == b':' || window[3] == b' ')
        {
            if let Ok(code_str) = std::str::from_utf8(&window[0..3]) {
                if let Ok(code) = code_str.parse::<u16>() {
                    if (100..=599).contains(&code)
                        && (i == 0 || !error_str.as_bytes()[i - 1].is_ascii_digit())
                    {
                        return Some(code);
                    }
                }
            }
        }
    }

    None
}
