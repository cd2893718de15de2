//! "Tell me more" handling: pick a link and pull its full content.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use shared_types::RoomMessage;

use crate::actors::room::RoomContext;
use crate::collaborators::{PageFetcher, SearchIndex};

pub const DETAIL_MAX_CHARS: usize = 8000;

/// Sent to the room before a slow full-content fetch.
pub const PROGRESS_NOTICE: &str = "Let me pull up the full article, one moment...";

/// Appended to the question once the progress notice has gone out.
pub const PROGRESS_ANNOTATION: &str =
    "(You already told the room you are pulling up the full article; do not say that again.)";

static MORE_DETAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(tell me more|more (?:detail|details|info|information)|go deeper|dig deeper|elaborate|expand on (?:that|this|it)|full (?:article|story|text)|read (?:the|that) (?:article|story))\b",
    )
    .expect("valid regex")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid regex"));

pub fn is_more_detail_request(text: &str) -> bool {
    MORE_DETAIL_RE.is_match(text)
}

pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .collect()
}

/// The link a "tell me more" most likely refers to.
///
/// The room's own source wins; otherwise the first link in the assembled
/// context, then the newest link mentioned in the room.
pub fn pick_detail_url(
    room: &RoomContext,
    context: &[String],
    recent: &[RoomMessage],
) -> Option<String> {
    if !room.source_url.trim().is_empty() {
        return Some(room.source_url.trim().to_string());
    }
    context
        .iter()
        .flat_map(|line| extract_urls(line))
        .next()
        .or_else(|| {
            recent
                .iter()
                .rev()
                .flat_map(|m| extract_urls(&m.content))
                .next()
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailSource {
    /// Served by this site; resolved through the index by entry id.
    Internal { entry_id: String },
    External { url: String },
}

/// Links on `internal_host` resolve to an index entry named by the last
/// path segment (`https://host/news/42` → `42`).
pub fn classify_url(url: &str, internal_host: Option<&str>) -> DetailSource {
    let external = || DetailSource::External {
        url: url.to_string(),
    };
    let (Some(host), Ok(parsed)) = (internal_host, Url::parse(url)) else {
        return external();
    };
    if !parsed
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(host))
    {
        return external();
    }
    match parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
    {
        Some(entry_id) => DetailSource::Internal {
            entry_id: entry_id.to_string(),
        },
        None => external(),
    }
}

/// Fetch the full text behind `url`. Failures are logged and yield `None`.
pub async fn fetch_detail(
    index: &dyn SearchIndex,
    fetcher: &dyn PageFetcher,
    url: &str,
    internal_host: Option<&str>,
) -> Option<String> {
    let text = match classify_url(url, internal_host) {
        DetailSource::Internal { entry_id } => match index.get_entry(&entry_id).await {
            Ok(Some(entry)) => {
                let body = if entry.content.trim().is_empty() {
                    entry.summary
                } else {
                    entry.content
                };
                body.chars().take(DETAIL_MAX_CHARS).collect::<String>()
            }
            Ok(None) => {
                tracing::debug!(entry_id = %entry_id, "Internal link has no indexed entry");
                return None;
            }
            Err(e) => {
                tracing::warn!(entry_id = %entry_id, error = %e, "Internal detail lookup failed");
                return None;
            }
        },
        DetailSource::External { url } => match fetcher.fetch_text(&url, DETAIL_MAX_CHARS).await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Detail fetch failed");
                return None;
            }
        },
    };

    let text = text.trim();
    (!text.is_empty()).then(|| format!("Full content of {url}:\n{text}"))
}
