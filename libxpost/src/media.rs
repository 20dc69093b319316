//! Attachment collection and upload
//!
//! Media is uploaded one item at a time in feed order. An attachment the
//! target refuses as too large is dropped and reported; the rest still go out.

use tracing::{debug, warn};

use crate::error::Result;
use crate::platforms::fetch::MediaFetcher;
use crate::platforms::TargetService;
use crate::types::{MediaHandle, MediaItem, SourceItem};

/// What happened to the attachments of one item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub handles: Vec<MediaHandle>,
    /// At least one attachment was refused as too large
    pub too_large: bool,
    /// More attachments than allowed; the excess was never uploaded
    pub too_many: bool,
}

impl UploadReport {
    /// Something was left out and the reader should be pointed at the source
    pub fn media_omitted(&self) -> bool {
        self.too_large || self.too_many
    }
}

/// Attachment candidates for `item`: images first, then videos
///
/// When `include_original` is set and the item is a repost, the original's
/// media follows. Only one level of repost is looked at.
pub fn collect(item: &SourceItem, include_original: bool) -> Vec<MediaItem> {
    let mut items = own_media(item);
    if include_original {
        if let Some(original) = item.retweet.as_deref() {
            items.extend(own_media(original));
        }
    }
    items
}

fn own_media(item: &SourceItem) -> Vec<MediaItem> {
    item.image_urls()
        .into_iter()
        .map(MediaItem::image)
        .chain(item.video_urls().into_iter().map(MediaItem::video))
        .collect()
}

/// Download and re-upload up to `max` attachments
///
/// # Errors
///
/// Any failure other than a too-large rejection aborts the upload and is
/// returned; the caller treats it like a failed publish.
pub async fn upload(
    items: &[MediaItem],
    max: usize,
    fetcher: &dyn MediaFetcher,
    target: &dyn TargetService,
) -> Result<UploadReport> {
    let mut report = UploadReport {
        too_many: items.len() > max,
        ..Default::default()
    };

    for item in items.iter().take(max) {
        let media = fetcher.fetch(&item.url).await?;

        if media.bytes.len() as u64 > target.max_attachment_size() {
            warn!(
                "Skipping {} ({} bytes): over the {} upload limit",
                item.url,
                media.bytes.len(),
                target.name()
            );
            report.too_large = true;
            continue;
        }

        match target.upload_media(media.bytes, &media.mime).await {
            Ok(handle) => {
                debug!("Uploaded {} as {}", item.url, handle);
                report.handles.push(handle);
            }
            Err(e) if e.is_payload_too_large() => {
                warn!("{} refused {}: {}", target.name(), item.url, e);
                report.too_large = true;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}
