use std::sync::LazyLock;

use regex::Regex;

// Compiled once at first use; normalize() itself never builds a pattern.
static TIMESTAMP_HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z]{2}\s+\d+\s+\d+:\d+:\d+\s+\S+\s+").unwrap());
static PID_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\d+\]").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Canonicalize a raw log line for comparison and embedding: drop the
/// syslog `Mon DD HH:MM:SS hostname ` prefix, drop `[pid]` tags, collapse
/// whitespace runs, trim. Lines that match none of the patterns pass
/// through with only whitespace cleanup.
pub fn normalize(line: &str) -> String {
    let line = TIMESTAMP_HOSTNAME.replace(line, "");
    let line = PID_TAG.replace_all(&line, "");
    let line = WHITESPACE_RUN.replace_all(&line, " ");
    line.trim().to_string()
}
