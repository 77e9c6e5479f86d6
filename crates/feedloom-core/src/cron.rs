//! Fixed table of human-readable schedule labels.
//!
//! Expressions use the six-field form (seconds first) understood by the job scheduler.

pub const CRON_LABELS: &[(&str, &str)] = &[
    ("every 5 minutes", "0 */5 * * * *"),
    ("every 10 minutes", "0 */10 * * * *"),
    ("every 15 minutes", "0 */15 * * * *"),
    ("every 30 minutes", "0 */30 * * * *"),
    ("every hour", "0 0 * * * *"),
    ("every 2 hours", "0 0 */2 * * *"),
    ("every 6 hours", "0 0 */6 * * *"),
    ("every 12 hours", "0 0 */12 * * *"),
    ("every day", "0 0 0 * * *"),
    ("every week", "0 0 0 * * Sun"),
];

/// Resolve a label to its cron expression. Matching ignores case and surrounding whitespace.
pub fn resolve_cron_label(label: &str) -> Option<&'static str> {
    let label = label.trim();
    CRON_LABELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(label))
        .map(|(_, expr)| *expr)
}

pub fn cron_labels() -> impl Iterator<Item = &'static str> {
    CRON_LABELS.iter().map(|(name, _)| *name)
}
