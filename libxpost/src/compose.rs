//! Toot text composition
//!
//! Turns a source item into the text that is published on the target. This
//! module is pure: everything it needs (thread layout, media outcome) is
//! decided beforehand and passed in through [`ComposeContext`].
//!
//! Lengths are counted in `char`s, which is how Mastodon counts them, and
//! truncation never splits a character.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::EffectiveSettings;
use crate::types::{MediaItem, SourceItem};

/// Characters kept free below the configured limit for notices and the link
pub const SAFETY_MARGIN: usize = 100;

pub const REPOST_MARKER: &str = "【转发】";
pub const TRUNCATION_NOTICE: &str = "……\n\n（太长了，完整版看原微博）\n";
pub const MEDIA_OMITTED_NOTICE: &str = "（图片或视频太多或太大，完整版看原微博）\n";
pub const SOURCE_URL_BASE: &str = "https://m.weibo.cn/detail/";

static VIDEO_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S*的微博视频").expect("video caption regex"));
static ARTICLE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"发布了头条文章：《[^》]*》").expect("article marker regex"));

/// How a repost's original appears in the composed text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepostLayout {
    /// Not a repost
    None,
    /// The original is its own toot; this one replies to it
    Linked,
    /// The original's text is copied below the marker
    Inline,
}

#[derive(Debug, Clone)]
pub struct ComposeContext<'a> {
    pub repost: RepostLayout,
    /// Media to list as links instead of attaching (external-media mode)
    pub external_media: Option<&'a [MediaItem]>,
    /// Upload dropped media because there was too much or it was too large
    pub media_omitted: bool,
}

impl Default for ComposeContext<'_> {
    fn default() -> Self {
        Self {
            repost: RepostLayout::None,
            external_media: None,
            media_omitted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedText {
    pub text: String,
    /// The source link was appended regardless of configuration because
    /// content had to be left out
    pub source_link_forced: bool,
}

/// Canonical link to the source item
pub fn source_url(item_id: &str) -> String {
    format!("{}{}", SOURCE_URL_BASE, item_id)
}

/// Build the toot text for `item`
pub fn compose(
    item: &SourceItem,
    settings: &EffectiveSettings,
    ctx: &ComposeContext<'_>,
) -> ComposedText {
    let limit = settings.toot_len_limit;
    let budget = limit.saturating_sub(SAFETY_MARGIN);

    let mut body = base_body(item);
    match (ctx.repost, item.retweet.as_deref()) {
        (RepostLayout::Linked, _) => {
            body.push_str(REPOST_MARKER);
            body.push_str("\n\n");
        }
        (RepostLayout::Inline, Some(original)) => {
            body.push_str(REPOST_MARKER);
            body.push_str(&base_body(original));
        }
        _ => {}
    }

    let mut force_link = false;
    let mut postamble = String::new();
    if let Some(media) = ctx.external_media {
        for m in media {
            postamble.push_str(&format!("{}：{}\n", m.kind.label(), m.url));
        }
    } else if ctx.media_omitted {
        postamble.push_str(MEDIA_OMITTED_NOTICE);
        force_link = true;
    }
    if char_len(&postamble) > budget {
        postamble = take_chars(&postamble, budget);
    }

    if char_len(&body) + char_len(&postamble) > budget {
        let keep = budget.saturating_sub(char_len(&postamble));
        body = take_chars(&body, keep);
        body.push_str(TRUNCATION_NOTICE);
        force_link = true;
    }

    let mut text = body;
    text.push_str(&postamble);
    if settings.include_post_url || force_link {
        text.push_str(&format!("源：{}\n", source_url(&item.id)));
    }

    // Only reachable with an unusually long item id
    if char_len(&text) > limit {
        text = take_chars(&text, limit);
    }

    ComposedText {
        text,
        source_link_forced: force_link && !settings.include_post_url,
    }
}

/// Attribution tag, text, and two trailing newlines
fn base_body(item: &SourceItem) -> String {
    format!("{}\n{}\n\n", attribution_tag(&item.screen_name), clean_text(item))
}

/// Hashtag form of an author name
///
/// Characters that would end a hashtag early are dropped; a name with none
/// left is used verbatim.
pub fn attribution_tag(name: &str) -> String {
    let tag: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if tag.is_empty() {
        name.to_string()
    } else {
        format!("#{}", tag)
    }
}

/// Source text with post-type boilerplate removed and mentions neutralized
pub fn clean_text(item: &SourceItem) -> String {
    let mut text = item.text.clone();
    if item.has_video() {
        text = VIDEO_CAPTION.replace_all(&text, "").into_owned();
    }
    text = ARTICLE_MARKER.replace_all(&text, "").into_owned();
    text.trim().replace('@', "@ ")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
