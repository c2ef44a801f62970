//! Whitespace canonicalisation shared by plain-text and HTML leaves.

use std::sync::LazyLock;

use regex::Regex;

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static HSPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// Canonicalises the line structure of extracted text.
///
/// Steps, in order: collapse 3+ newlines to two, collapse runs of
/// spaces/tabs to one space, trim every line, trim blank lines off both
/// ends. Lines that were whitespace-only become empty in the trim step,
/// so the blank-line collapse runs once more at the end; without it the
/// function would not be idempotent.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    let text = HSPACE_RUNS.replace_all(&text, " ");

    let trimmed = text
        .split('\n')
        .map(|line| line.trim_matches(|c| c == ' ' || c == '\t' || c == '\r'))
        .collect::<Vec<_>>()
        .join("\n");

    let trimmed = trimmed.trim_matches('\n');
    BLANK_RUNS.replace_all(trimmed, "\n\n").into_owned()
}
