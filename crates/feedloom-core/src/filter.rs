//! Read-side inclusion/exclusion filtering over persisted entries.
//!
//! Stages run in a fixed order: recency gate, exclusion (`FilterOut`), inclusion
//! (`Filter`), truncation. Because exclusion runs first and both stages must pass,
//! a value matching both an inclusion and an exclusion pattern is excluded.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::Entry;

/// Result size used when `limit` is unset, zero or negative.
pub const DEFAULT_LIMIT: usize = 20;

/// Per-field regex patterns. `None` and empty strings impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldRules {
    pub link: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub categories: Option<String>,
    pub enclosure_url: Option<String>,
    pub enclosure_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    #[serde(flatten)]
    pub rules: FieldRules,
    /// Byte quantity such as `"500 MiB"`; entries must have a strictly smaller enclosure.
    pub enclosure_length: Option<String>,
    /// Recency window in seconds.
    pub time: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterOut {
    #[serde(flatten)]
    pub rules: FieldRules,
}

#[derive(Debug, Error)]
#[error("invalid pattern {pattern:?} for field {field}: {source}")]
pub struct FilterPatternError {
    pub field: &'static str,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Link,
    Title,
    Body,
    Summary,
    Author,
    Categories,
    EnclosureUrl,
    EnclosureType,
}

const TEXT_FIELDS: [TextField; 8] = [
    TextField::Link,
    TextField::Title,
    TextField::Body,
    TextField::Summary,
    TextField::Author,
    TextField::Categories,
    TextField::EnclosureUrl,
    TextField::EnclosureType,
];

impl TextField {
    fn name(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Title => "title",
            Self::Body => "body",
            Self::Summary => "summary",
            Self::Author => "author",
            Self::Categories => "categories",
            Self::EnclosureUrl => "enclosureUrl",
            Self::EnclosureType => "enclosureType",
        }
    }

    fn pattern(self, rules: &FieldRules) -> Option<&str> {
        let pattern = match self {
            Self::Link => &rules.link,
            Self::Title => &rules.title,
            Self::Body => &rules.body,
            Self::Summary => &rules.summary,
            Self::Author => &rules.author,
            Self::Categories => &rules.categories,
            Self::EnclosureUrl => &rules.enclosure_url,
            Self::EnclosureType => &rules.enclosure_type,
        };
        pattern.as_deref().filter(|p| !p.is_empty())
    }

    /// Values the pattern is tested against; empty when the entry lacks the field.
    fn values(self, entry: &Entry) -> Vec<&str> {
        fn single(value: &Option<String>) -> Vec<&str> {
            value.as_deref().into_iter().collect()
        }
        match self {
            Self::Link => single(&entry.link),
            Self::Title => single(&entry.title),
            Self::Body => single(&entry.body),
            Self::Summary => single(&entry.summary),
            Self::Author => single(&entry.author),
            Self::Categories => entry.categories.iter().map(String::as_str).collect(),
            Self::EnclosureUrl => entry.enclosure.iter().map(|e| e.url.as_str()).collect(),
            Self::EnclosureType => entry
                .enclosure
                .as_ref()
                .and_then(|e| e.mime_type.as_deref())
                .into_iter()
                .collect(),
        }
    }
}

struct CompiledRule {
    field: TextField,
    regex: Regex,
}

impl CompiledRule {
    /// `None` when the entry lacks the field; otherwise whether any value matches.
    fn matches(&self, entry: &Entry) -> Option<bool> {
        let values = self.field.values(entry);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().any(|v| self.regex.is_match(v)))
    }
}

fn compile_field(field: TextField, pattern: &str) -> Result<Regex, FilterPatternError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| FilterPatternError {
            field: field.name(),
            pattern: pattern.to_string(),
            source,
        })
}

/// Compile every configured field. A bad pattern is logged and its field dropped.
fn compile_rules(rules: &FieldRules) -> Vec<CompiledRule> {
    TEXT_FIELDS
        .iter()
        .filter_map(|&field| {
            let pattern = field.pattern(rules)?;
            match compile_field(field, pattern) {
                Ok(regex) => Some(CompiledRule { field, regex }),
                Err(err) => {
                    warn!(field = field.name(), error = %err, "skipping filter field with invalid pattern");
                    None
                }
            }
        })
        .collect()
}

fn within_window(entry: &Entry, window_secs: Option<i64>, now: DateTime<Utc>) -> bool {
    let (Some(published), Some(window)) = (entry.published_at, window_secs.filter(|w| *w > 0)) else {
        return true;
    };
    (now - published).num_seconds() <= window
}

/// Apply `filter`/`filter_out` using the current wall clock for the recency gate.
pub fn apply(entries: Vec<Entry>, filter: &Filter, filter_out: &FilterOut) -> Vec<Entry> {
    apply_at(entries, filter, filter_out, Utc::now())
}

/// Same as [`apply`] with an explicit reference time. Input is expected newest first.
pub fn apply_at(entries: Vec<Entry>, filter: &Filter, filter_out: &FilterOut, now: DateTime<Utc>) -> Vec<Entry> {
    let exclusions = compile_rules(&filter_out.rules);
    let inclusions = compile_rules(&filter.rules);
    let max_length = filter.enclosure_length.as_deref().and_then(|raw| {
        let parsed = parse_byte_size(raw);
        if parsed.is_none() && !raw.trim().is_empty() {
            warn!(enclosure_length = raw, "ignoring unparseable enclosure length threshold");
        }
        parsed
    });
    let limit = match filter.limit {
        Some(n) if n > 0 => n as usize,
        _ => DEFAULT_LIMIT,
    };

    entries
        .into_iter()
        .filter(|entry| within_window(entry, filter.time, now))
        .filter(|entry| !exclusions.iter().any(|rule| rule.matches(entry) == Some(true)))
        .filter(|entry| inclusions.iter().all(|rule| rule.matches(entry) != Some(false)))
        .filter(|entry| {
            let length = entry.enclosure.as_ref().and_then(|e| e.length);
            match (max_length, length) {
                (Some(max), Some(length)) => length < max,
                _ => true,
            }
        })
        .take(limit)
        .collect()
}

/// Parse a byte quantity such as `"1024"`, `"1 KiB"` or `"1.5GB"`.
///
/// Units are case-insensitive and 1024-based whether or not the `i` is present.
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let number: f64 = number.parse().ok()?;
    let exponent = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 1,
        "m" | "mb" | "mib" => 2,
        "g" | "gb" | "gib" => 3,
        "t" | "tb" | "tib" => 4,
        "p" | "pb" | "pib" => 5,
        _ => return None,
    };
    let bytes = number * 1024f64.powi(exponent);
    if !bytes.is_finite() || bytes < 0.0 {
        return None;
    }
    Some(bytes.floor() as u64)
}
