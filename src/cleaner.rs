//! Response normalization for heterogeneous backend output.
//!
//! Pure, line-oriented, and idempotent: cleaning already-clean text is a
//! no-op. Strips a leading reasoning-trace block when a closing marker is
//! present, removes markdown decoration per line, and collapses runs of
//! blank lines.

use regex::Regex;
use std::sync::LazyLock;

/// Closing markers of reasoning-trace blocks some backends emit before the
/// actual answer. Only what follows the marker is kept.
const TRACE_CLOSERS: &[&str] = &["</think>", "</thinking>", "</reasoning>"];

/// Alternative marker convention: everything after the last `RESPONSE:`.
const RESPONSE_MARKER: &str = "RESPONSE:";

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+").unwrap());

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:[-*+]|\d{1,3}[.)])\s+").unwrap());

static HRULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:-{3,}|\*{3,}|_{3,})\s*$").unwrap());

static STRONG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*\*|__)([^*_]+?)\1").unwrap());

// Single-character emphasis needs tighter bounds: `2 * 3` and
// `snake_case_name` must survive.
static STAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\s](?:[^*]*[^*\s])?)\*").unwrap());

static UNDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_([^_\s](?:[^_]*[^_\s])?)_\b").unwrap());

static EXCESS_BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Drop a leading reasoning trace, keeping only what follows its closing
/// marker. Falls back to the original text when stripping would leave
/// nothing.
fn strip_reasoning_trace(text: &str) -> &str {
    for closer in TRACE_CLOSERS {
        if let Some(pos) = text.find(closer) {
            let after = &text[pos + closer.len()..];
            if !after.trim().is_empty() {
                return after;
            }
        }
    }
    if let Some(pos) = text.rfind(RESPONSE_MARKER) {
        let after = &text[pos + RESPONSE_MARKER.len()..];
        if !after.trim().is_empty() {
            return after;
        }
    }
    text
}

/// Normalize raw backend output.
pub fn clean(text: &str) -> String {
    let body = strip_reasoning_trace(text);

    let lines: Vec<String> = body
        .lines()
        .map(|line| {
            if HRULE_RE.is_match(line) {
                return String::new();
            }
            let line = HEADER_RE.replace(line, "");
            let line = BULLET_RE.replace(&line, "$1");
            let line = STRONG_RE.replace_all(&line, "$2");
            let line = STAR_RE.replace_all(&line, "$1");
            let line = UNDER_RE.replace_all(&line, "$1");
            line.trim_end().to_string()
        })
        .collect();

    let joined = lines.join("\n");
    EXCESS_BLANK_RE
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let text = "The reverb tail decays over 2.3 seconds.";
        assert_eq!(clean(text), text);
    }

    #[test]
    fn clean_is_idempotent() {
        let inputs = [
            "Plain prose answer with nothing to strip.",
            "Two paragraphs.\n\nSecond one here.",
            "## Heading\n**bold** and *italic*\n- item one\n- item two",
        ];
        for input in inputs {
            let once = clean(input);
            assert_eq!(clean(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn strips_leading_think_block() {
        let raw = "<think>\nlet me work this out\n</think>\nThe answer is 42.";
        assert_eq!(clean(raw), "The answer is 42.");
    }

    #[test]
    fn keeps_text_after_response_marker() {
        let raw = "internal deliberation...\nRESPONSE: Final answer here.";
        assert_eq!(clean(raw), "Final answer here.");
    }

    #[test]
    fn trace_strip_never_leaves_nothing() {
        let raw = "<think>only thoughts</think>";
        assert!(!clean(raw).is_empty());
    }

    #[test]
    fn strips_markdown_headers() {
        assert_eq!(clean("### Results\nAll good."), "Results\nAll good.");
    }

    #[test]
    fn strips_bullet_markers() {
        let raw = "- first point\n* second point\n3. third point";
        assert_eq!(clean(raw), "first point\nsecond point\nthird point");
    }

    #[test]
    fn strips_emphasis_delimiters() {
        assert_eq!(clean("this is **important** and *subtle*"), "this is important and subtle");
        assert_eq!(clean("__bold__ and _quiet_"), "bold and quiet");
    }

    #[test]
    fn arithmetic_and_identifiers_survive() {
        assert_eq!(clean("compute 2 * 3 * 4"), "compute 2 * 3 * 4");
        assert_eq!(clean("see snake_case_name for details"), "see snake_case_name for details");
    }

    #[test]
    fn removes_horizontal_rules() {
        let raw = "above\n---\nbelow";
        assert_eq!(clean(raw), "above\n\nbelow");
    }

    #[test]
    fn collapses_blank_line_runs() {
        let raw = "one\n\n\n\n\ntwo";
        assert_eq!(clean(raw), "one\n\ntwo");
    }

    #[test]
    fn nested_bullets_keep_indentation() {
        let raw = "- outer\n  - inner";
        assert_eq!(clean(raw), "outer\n  inner");
    }
}
