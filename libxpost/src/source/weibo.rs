//! Weibo feed over the public mobile web API
//!
//! Timelines come from the `container/getIndex` endpoint of m.weibo.cn. Posts
//! flagged as long text only carry a preview there; the full text is fetched
//! from `statuses/extend`. Text arrives as HTML and is flattened to plain text
//! with emoji images replaced by their alt text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::UserConfig;
use crate::error::{Result, SourceError};
use crate::source::SourceFeed;
use crate::types::SourceItem;

pub const DEFAULT_BASE_URL: &str = "https://m.weibo.cn";

/// Prefix of the container id that holds a user's own posts
const TIMELINE_CONTAINER_PREFIX: &str = "107603";

/// Card type of a post inside a timeline container
const CARD_TYPE_POST: i64 = 9;

static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break regex"));
static IMG_ALT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]*\balt="([^"]*)"[^>]*>"#).expect("img alt regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

/// Source feed reading m.weibo.cn
pub struct WeiboFeed {
    client: reqwest::Client,
    base_url: String,
}

impl WeiboFeed {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Feed against another host serving the same API
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("xpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, format!("{}/", self.base_url))
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::Network(format!("GET {} failed: {}", url, e)))?
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("Failed to read {}: {}", url, e)))?;

        serde_json::from_str(&body)
            .map_err(|e| SourceError::Parse(format!("Unexpected response from {}: {}", url, e)).into())
    }

    /// Full text of a long post; `None` if the endpoint has nothing for it
    async fn long_text(&self, id: &str) -> Result<Option<String>> {
        let url = format!("{}/statuses/extend?id={}", self.base_url, id);
        let response: ApiResponse<ExtendData> = self.get_json(&url).await?;
        Ok(response
            .data
            .and_then(|d| d.long_text_content)
            .filter(|t| !t.is_empty()))
    }

    /// Replace preview text with the full text in the post and its original
    async fn expand(&self, mut post: RawPost) -> RawPost {
        self.expand_text(&mut post).await;
        if let Some(original) = post.retweeted_status.as_deref_mut() {
            self.expand_text(original).await;
        }
        post
    }

    async fn expand_text(&self, post: &mut RawPost) {
        if !post.is_long_text {
            return;
        }
        match self.long_text(&post.id).await {
            Ok(Some(text)) => post.text = text,
            Ok(None) => debug!("No long text for {}, keeping preview", post.id),
            Err(e) => warn!("Failed to expand {}: {}", post.id, e),
        }
    }
}

#[async_trait]
impl SourceFeed for WeiboFeed {
    async fn fetch_recent(&self, user: &UserConfig) -> Result<Vec<SourceItem>> {
        let url = format!(
            "{}/api/container/getIndex?containerid={}{}",
            self.base_url, TIMELINE_CONTAINER_PREFIX, user.id
        );
        let response: ApiResponse<TimelineData> = self.get_json(&url).await?;
        if response.ok != 1 {
            return Err(SourceError::Parse(format!("Timeline of {} returned ok={}", user.id, response.ok)).into());
        }

        let mut items = Vec::new();
        for post in timeline_posts(response) {
            items.push(self.expand(post).await.into_item());
        }
        sort_newest_first(&mut items);

        debug!("Fetched {} posts of {}", items.len(), user.id);
        Ok(items)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    ok: i64,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct TimelineData {
    #[serde(default)]
    cards: Vec<Card>,
}

#[derive(Debug, Deserialize)]
struct Card {
    #[serde(default)]
    card_type: i64,
    mblog: Option<RawPost>,
}

#[derive(Debug, Deserialize)]
struct ExtendData {
    #[serde(rename = "longTextContent")]
    long_text_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPost {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default, rename = "isLongText")]
    is_long_text: bool,
    user: Option<RawUser>,
    #[serde(default)]
    pics: Vec<RawPic>,
    page_info: Option<RawPageInfo>,
    retweeted_status: Option<Box<RawPost>>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct RawPic {
    #[serde(default)]
    url: String,
    large: Option<RawPicSize>,
}

#[derive(Debug, Deserialize)]
struct RawPicSize {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPageInfo {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    urls: Option<serde_json::Map<String, serde_json::Value>>,
    media_info: Option<RawMediaInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMediaInfo {
    #[serde(default)]
    stream_url_hd: String,
    #[serde(default)]
    stream_url: String,
}

/// Stream renditions in order of preference
const VIDEO_RENDITIONS: [&str; 3] = ["mp4_720p_mp4", "mp4_hd_mp4", "mp4_ld_mp4"];

impl RawPost {
    fn into_item(self) -> SourceItem {
        let (user_id, screen_name) = self
            .user
            .map(|u| (u.id, u.screen_name))
            .unwrap_or_default();

        let pics = self
            .pics
            .iter()
            .map(|p| p.large.as_ref().map_or(p.url.as_str(), |l| l.url.as_str()))
            .filter(|u| !u.is_empty())
            .collect::<Vec<_>>()
            .join(",");

        let video_url = self
            .page_info
            .as_ref()
            .and_then(RawPageInfo::video_url)
            .unwrap_or_default();

        SourceItem {
            id: self.id,
            user_id,
            screen_name,
            text: html_to_text(&self.text),
            pics,
            video_url,
            retweet: self.retweeted_status.map(|r| Box::new(r.into_item())),
        }
    }
}

impl RawPageInfo {
    fn video_url(&self) -> Option<String> {
        if self.kind != "video" {
            return None;
        }
        let from_urls = self.urls.as_ref().and_then(|urls| {
            VIDEO_RENDITIONS
                .iter()
                .filter_map(|key| urls.get(*key).and_then(|v| v.as_str()))
                .find(|u| !u.is_empty())
                .map(str::to_string)
        });
        from_urls.or_else(|| {
            self.media_info.as_ref().and_then(|m| {
                [&m.stream_url_hd, &m.stream_url]
                    .into_iter()
                    .find(|u| !u.is_empty())
                    .cloned()
            })
        })
    }
}

fn timeline_posts(response: ApiResponse<TimelineData>) -> Vec<RawPost> {
    response
        .data
        .unwrap_or_default()
        .cards
        .into_iter()
        .filter(|c| c.card_type == CARD_TYPE_POST)
        .filter_map(|c| c.mblog)
        .collect()
}

/// Pinned posts come first regardless of age; ids grow over time, so sorting
/// on them restores the chronological order
///
/// Left in feed order if any id is not numeric.
fn sort_newest_first(items: &mut [SourceItem]) {
    if items.iter().all(|item| item.id.parse::<u64>().is_ok()) {
        items.sort_by_cached_key(|item| {
            std::cmp::Reverse(item.id.parse::<u64>().unwrap_or_default())
        });
    }
}

/// Flatten post HTML to plain text
pub fn html_to_text(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = IMG_ALT.replace_all(&text, "$1");
    let text = TAG.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE: &str = r#"{
        "ok": 1,
        "data": {
            "cards": [
                {"card_type": 11},
                {"card_type": 9, "mblog": {
                    "id": "4900000000000001",
                    "text": "置顶的微博",
                    "isTop": 1,
                    "user": {"id": 1669879400, "screen_name": "Dear-迪丽热巴"}
                }},
                {"card_type": 9, "mblog": {
                    "id": "4900000000000003",
                    "text": "今天<br />天气不错 <span class=\"url-icon\"><img alt=\"[太阳]\" src=\"x.png\" /></span>",
                    "user": {"id": 1669879400, "screen_name": "Dear-迪丽热巴"},
                    "pics": [
                        {"url": "https://wx1.sinaimg.cn/orj360/a.jpg", "large": {"url": "https://wx1.sinaimg.cn/large/a.jpg"}},
                        {"url": "https://wx1.sinaimg.cn/orj360/b.jpg"}
                    ]
                }},
                {"card_type": 9, "mblog": {
                    "id": 4900000000000002,
                    "text": "转发一下",
                    "user": {"id": 1669879400, "screen_name": "Dear-迪丽热巴"},
                    "retweeted_status": {
                        "id": "4899999999999999",
                        "text": "原微博 &amp; 视频",
                        "isLongText": false,
                        "user": {"id": "2803301701", "screen_name": "人民日报"},
                        "page_info": {
                            "type": "video",
                            "urls": {"mp4_ld_mp4": "https://f.video.weibocdn.com/ld.mp4", "mp4_720p_mp4": "https://f.video.weibocdn.com/720.mp4"},
                            "media_info": {"stream_url": "https://f.video.weibocdn.com/s.mp4"}
                        }
                    }
                }}
            ]
        }
    }"#;

    fn parse(json: &str) -> Vec<SourceItem> {
        let response: ApiResponse<TimelineData> = serde_json::from_str(json).unwrap();
        let mut items: Vec<SourceItem> = timeline_posts(response)
            .into_iter()
            .map(RawPost::into_item)
            .collect();
        sort_newest_first(&mut items);
        items
    }

    #[test]
    fn test_timeline_parsing() {
        let items = parse(TIMELINE);
        assert_eq!(items.len(), 3);

        // pinned post sorted back into place
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["4900000000000003", "4900000000000002", "4900000000000001"]
        );

        let newest = &items[0];
        assert_eq!(newest.user_id, "1669879400");
        assert_eq!(newest.text, "今天\n天气不错 [太阳]");
        assert_eq!(
            newest.pics,
            "https://wx1.sinaimg.cn/large/a.jpg,https://wx1.sinaimg.cn/orj360/b.jpg"
        );
        assert!(newest.retweet.is_none());
    }

    #[test]
    fn test_non_numeric_ids_keep_feed_order() {
        let mut items: Vec<SourceItem> = ["30", "Nx7f", "50", "10"]
            .iter()
            .map(|id| SourceItem {
                id: id.to_string(),
                ..Default::default()
            })
            .collect();
        sort_newest_first(&mut items);

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["30", "Nx7f", "50", "10"]);
    }

    #[test]
    fn test_repost_with_video() {
        let items = parse(TIMELINE);
        let repost = &items[1];
        let original = repost.retweet.as_deref().unwrap();

        assert_eq!(original.id, "4899999999999999");
        assert_eq!(original.user_id, "2803301701");
        assert_eq!(original.screen_name, "人民日报");
        assert_eq!(original.text, "原微博 & 视频");
        assert_eq!(original.video_url, "https://f.video.weibocdn.com/720.mp4");
    }

    #[test]
    fn test_deleted_original_has_no_user() {
        let json = r#"{"ok": 1, "data": {"cards": [{"card_type": 9, "mblog": {
            "id": "2", "text": "转发", "user": {"id": 1, "screen_name": "a"},
            "retweeted_status": {"id": "1", "text": "抱歉，此微博已被作者删除。", "user": null}
        }}]}}"#;
        let items = parse(json);
        let original = items[0].retweet.as_deref().unwrap();
        assert_eq!(original.user_id, "");
        assert_eq!(original.screen_name, "");
    }

    #[test]
    fn test_video_falls_back_to_stream_url() {
        let info = RawPageInfo {
            kind: "video".to_string(),
            urls: None,
            media_info: Some(RawMediaInfo {
                stream_url_hd: String::new(),
                stream_url: "https://f.video.weibocdn.com/s.mp4".to_string(),
            }),
        };
        assert_eq!(
            info.video_url().as_deref(),
            Some("https://f.video.weibocdn.com/s.mp4")
        );

        let article = RawPageInfo {
            kind: "article".to_string(),
            ..Default::default()
        };
        assert!(article.video_url().is_none());
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<a href=\"/n/someone\">@someone</a> hi<br/>there &lt;3"),
            "@someone hi\nthere <3"
        );
    }

    #[test]
    fn test_extend_response() {
        let json = r#"{"ok": 1, "data": {"longTextContent": "完整<br />内容"}}"#;
        let response: ApiResponse<ExtendData> = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.data.unwrap().long_text_content.as_deref(),
            Some("完整<br />内容")
        );
    }
}
