//! Raw items into [`EntryDraft`]s: trimming, stable guid resolution, timestamp
//! sanity checks and enclosure inference.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use feedloom_core::{Enclosure, EntryDraft};
use scraper::Html;
use url::Url;
use uuid::Uuid;

use crate::parse::{RawEnclosure, RawFeedDocument, RawItem};

/// Timestamps further than this into the future are clamped to "now".
pub const MAX_FUTURE_SKEW_SECS: i64 = 5 * 60;

/// Link suffixes that imply a downloadable enclosure when none is declared.
const INFERRED_ENCLOSURES: &[(&str, &str)] = &[
    (".torrent", "application/x-bittorrent"),
    (".mp3", "audio/mpeg"),
    (".m4a", "audio/mp4"),
    (".mp4", "video/mp4"),
    (".mkv", "video/x-matroska"),
    (".pdf", "application/pdf"),
    (".zip", "application/zip"),
];

/// Recursive whitespace trimming. Empty strings become absent.
pub trait Trim {
    fn trimmed(self) -> Self;
}

impl Trim for Option<String> {
    fn trimmed(self) -> Self {
        self.and_then(|s| {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        })
    }
}

impl Trim for Vec<String> {
    fn trimmed(self) -> Self {
        self.into_iter()
            .filter_map(|s| Some(s).trimmed())
            .collect()
    }
}

impl Trim for RawEnclosure {
    fn trimmed(self) -> Self {
        Self {
            url: self.url.trimmed(),
            mime_type: self.mime_type.trimmed(),
            length: self.length.trimmed(),
        }
    }
}

impl Trim for RawItem {
    fn trimmed(self) -> Self {
        Self {
            guid: self.guid.trimmed(),
            id: self.id.trimmed(),
            link: self.link.trimmed(),
            comments: self.comments.trimmed(),
            title: self.title.trimmed(),
            content_encoded: self.content_encoded.trimmed(),
            content: self.content.trimmed(),
            summary: self.summary.trimmed(),
            published: self.published.trimmed(),
            updated: self.updated.trimmed(),
            author: self.author.trimmed(),
            categories: self.categories.trimmed(),
            enclosure: self.enclosure.map(Trim::trimmed),
        }
    }
}

/// http(s)/ftp URL with a host.
pub fn is_well_formed_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https" | "ftp")
                && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// First of guid, id, link, comments that is a URL; otherwise a fresh random id.
pub fn resolve_guid(item: &RawItem) -> String {
    [&item.guid, &item.id, &item.link, &item.comments]
        .into_iter()
        .flatten()
        .find(|candidate| is_well_formed_url(candidate))
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Reject implausible timestamps: far-future ones become `now`, pre-epoch ones are dropped.
pub fn sanitize_timestamp(ts: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ts > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
        Some(now)
    } else if ts < DateTime::UNIX_EPOCH {
        None
    } else {
        Some(ts)
    }
}

/// Publish time from the first timestamp field that parses. No usable field means unset, not "now".
pub fn resolve_published(item: &RawItem, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ts = [&item.published, &item.updated]
        .into_iter()
        .flatten()
        .find_map(|raw| parse_timestamp(raw))?;
    sanitize_timestamp(ts, now)
}

pub fn parse_enclosure_length(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    let n = raw.parse::<f64>().ok()?;
    (n.is_finite() && n >= 0.0).then(|| n.floor() as u64)
}

/// Re-serialize http(s) URLs through the URL parser; anything else (magnet links, ...) passes through.
pub fn normalize_enclosure_url(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return raw.to_string();
    }
    Url::parse(raw)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn infer_enclosure(link: &str) -> Option<Enclosure> {
    let path = link
        .split(['?', '#'])
        .next()
        .unwrap_or(link)
        .to_ascii_lowercase();
    INFERRED_ENCLOSURES
        .iter()
        .find(|(suffix, _)| path.ends_with(suffix))
        .map(|(_, mime_type)| Enclosure {
            url: normalize_enclosure_url(link),
            mime_type: Some((*mime_type).to_string()),
            length: None,
        })
}

/// Declared enclosure if it has a URL, else one inferred from the item link.
pub fn resolve_enclosure(item: &RawItem) -> Option<Enclosure> {
    if let Some(raw) = &item.enclosure {
        if let Some(url) = raw.url.as_deref() {
            return Some(Enclosure {
                url: normalize_enclosure_url(url),
                mime_type: raw.mime_type.clone(),
                length: parse_enclosure_length(raw.length.as_deref()),
            });
        }
    }
    item.link.as_deref().and_then(infer_enclosure)
}

/// Plain text of an HTML fragment with whitespace collapsed.
pub fn html_to_snippet(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    let text = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

pub fn normalize_item(item: RawItem, feed_author: Option<&str>, now: DateTime<Utc>) -> EntryDraft {
    let item = item.trimmed();
    let guid = resolve_guid(&item);
    let published_at = resolve_published(&item, now);
    let enclosure = resolve_enclosure(&item);
    let rich = item.content_encoded.or(item.content);
    let snippet = rich.as_deref().and_then(html_to_snippet);

    EntryDraft {
        guid,
        link: item.link,
        title: item.title,
        body: rich,
        snippet,
        summary: item.summary,
        author: item.author.or_else(|| feed_author.map(str::to_string)),
        categories: item.categories,
        enclosure,
        published_at,
    }
}

pub fn normalize_document(document: RawFeedDocument, now: DateTime<Utc>) -> Vec<EntryDraft> {
    let feed_author = document.author.trimmed();
    document
        .items
        .into_iter()
        .map(|item| normalize_item(item, feed_author.as_deref(), now))
        .collect()
}
