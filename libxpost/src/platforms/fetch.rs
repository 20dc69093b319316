//! Downloading media from the source before it is re-uploaded

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SourceError};

/// Downloaded media payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia>;
}

/// Media fetcher backed by `reqwest`
pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("xpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        // Weibo's CDN refuses hotlinked requests without a weibo referer
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, "https://m.weibo.cn/")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::Network(format!("Failed to download {}: {}", url, e)))?;

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| mime_from_url(url).to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Network(format!("Failed to read {}: {}", url, e)))?
            .to_vec();

        debug!("Fetched {} ({} bytes, {})", url, bytes.len(), mime);
        Ok(FetchedMedia { bytes, mime })
    }
}

/// Guess a MIME type from the URL path when the server does not send one
pub fn mime_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}
