use std::sync::LazyLock;

use log::debug;
use regex::Regex;

const FENCE: &str = "```";

static FENCE_WITH_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z][A-Za-z0-9_+\-]*").expect("valid fence regex"));

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"));

// ---------------------------------------------------------------------------
// Fence stripping
// ---------------------------------------------------------------------------

/// Unwrap raw model output so it can be handed to a JSON parser.
///
/// Removes a leading fence (with or without a language tag) and a trailing
/// fence, trimming whitespace around both. Passes repeat until nothing
/// changes, so the result is always a fixed point: sanitizing twice gives
/// the same text as sanitizing once.
///
/// The output is best effort; it is not guaranteed to be valid JSON.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw.trim();
    loop {
        let next = strip_fences_once(current);
        if next.len() == current.len() {
            return current.to_string();
        }
        current = next;
    }
}

fn strip_fences_once(text: &str) -> &str {
    let mut s = text.trim();

    if let Some(m) = FENCE_WITH_TAG.find(s) {
        let rest = &s[m.end()..];
        // "```jsonish" glued to content is not a tag; only strip the tag when
        // it is followed by whitespace, the start of a JSON value, or nothing.
        let tag_ends = rest
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '{' || c == '[');
        s = if tag_ends { rest } else { &s[FENCE.len()..] };
    } else if let Some(rest) = s.strip_prefix(FENCE) {
        s = rest;
    }

    if let Some(rest) = s.strip_suffix(FENCE) {
        s = rest;
    }

    s.trim()
}

// ---------------------------------------------------------------------------
// Reasoning blocks
// ---------------------------------------------------------------------------

/// Drop `<think>...</think>` sections emitted by reasoning models.
pub fn strip_reasoning(raw: &str) -> String {
    for cap in THINK_BLOCK.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }
    THINK_BLOCK.replace_all(raw, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_json_fence() {
        assert_eq!(sanitize("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_bare_fence() {
        assert_eq!(sanitize("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_no_fence_is_unchanged() {
        assert_eq!(sanitize("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_trims_surrounding_whitespace() {
        assert_eq!(sanitize("  \n```json\n{\"a\":1}\n```  \n"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_other_language_tag() {
        assert_eq!(sanitize("```javascript\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(sanitize("```JSON {\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_tag_glued_to_brace() {
        assert_eq!(sanitize("```json{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_only_opening_fence() {
        assert_eq!(sanitize("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_only_closing_fence() {
        assert_eq!(sanitize("{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_sanitize_empty_and_fence_only() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("   "), "");
        assert_eq!(sanitize("```"), "");
        assert_eq!(sanitize("``````"), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "",
            "not json",
            "```json\n{\"a\":1}\n```",
            "``````json\n{}\n```",
            "```\n```json\n{\"a\":1}\n```\n```",
            "```json",
            "  ```text\nhello```  ",
            "{\"story\": \"ends with a fence ```\"}",
            "````",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_strip_reasoning() {
        let raw = "<think>The player ran away, time skip.</think>\n{\"a\":1}";
        assert_eq!(strip_reasoning(raw), "{\"a\":1}");
    }

    #[test]
    fn test_strip_reasoning_multiple_blocks() {
        let raw = "<think>one</think>```json\n<think>\ntwo\n</think>{\"a\":1}```";
        assert_eq!(sanitize(&strip_reasoning(raw)), "{\"a\":1}");
    }

    #[test]
    fn test_strip_reasoning_without_blocks() {
        assert_eq!(strip_reasoning("  {\"a\":1} "), "{\"a\":1}");
    }
}
