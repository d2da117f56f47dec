use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?([a-zA-Z][a-zA-Z0-9]*)[^>]*>").expect("tag pattern is valid")
});

static VIDEO_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/)([a-zA-Z0-9_-]{11})")
        .expect("video url pattern is valid")
});

/// Tags accepted in article bodies. Includes the `div`/`iframe` pair produced by
/// `rewrite_embeds`.
const ADMIN_CONTENT_TAGS: &[&str] = &["img", "b", "i", "a", "u", "strong", "em", "iframe", "div", "p"];

/// Inline formatting only, for short fields such as teasers.
const STRICT_TAGS: &[&str] = &["img", "b", "i", "a", "u", "strong", "em"];

/// ContentSanitizer
///
/// Allow-list check over tag names plus video link rewriting. This is a tag-name
/// filter, not a full HTML sanitizer: attributes are not inspected.
#[derive(Debug, Clone)]
pub struct ContentSanitizer {
    allowed: HashSet<&'static str>,
}

impl Default for ContentSanitizer {
    fn default() -> Self {
        Self::admin_content()
    }
}

impl ContentSanitizer {
    pub fn admin_content() -> Self {
        Self {
            allowed: ADMIN_CONTENT_TAGS.iter().copied().collect(),
        }
    }

    pub fn strict() -> Self {
        Self {
            allowed: STRICT_TAGS.iter().copied().collect(),
        }
    }

    /// True when every opening or closing tag name is on the allow-list.
    /// Blank input is trivially safe.
    pub fn is_safe(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return true;
        }
        TAG_PATTERN.captures_iter(text).all(|caps| {
            let name = caps[1].to_ascii_lowercase();
            self.allowed.contains(name.as_str())
        })
    }

    /// Replaces every YouTube watch/short link with a responsive 16:9 iframe,
    /// leaving the surrounding text untouched.
    pub fn rewrite_embeds(text: &str) -> String {
        VIDEO_URL_PATTERN
            .replace_all(text, |caps: &regex::Captures| embed_fragment(&caps[1]))
            .into_owned()
    }

    /// process
    ///
    /// Rewrites embeds first, then validates the result, so the generated
    /// `div`/`iframe` markup is judged by the same allow-list as user markup.
    pub fn process(&self, text: &str) -> AppResult<String> {
        let rewritten = Self::rewrite_embeds(text);
        if !self.is_safe(&rewritten) {
            return Err(AppError::InvalidInput(
                "Content contains disallowed HTML tags".to_string(),
            ));
        }
        Ok(rewritten)
    }
}

fn embed_fragment(video_id: &str) -> String {
    format!(
        "<div style=\"position: relative; padding-bottom: 56.25%; height: 0; overflow: hidden;\">\
<iframe src=\"https://www.youtube.com/embed/{video_id}\" \
style=\"position: absolute; top: 0; left: 0; width: 100%; height: 100%;\" \
frameborder=\"0\" allowfullscreen></iframe></div>"
    )
}
