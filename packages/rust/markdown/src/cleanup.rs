//! Post-conversion passes that flatten Markdown into readable plain text.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on converted Markdown.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = strip_leftover_html(&result);
    result = drop_images(&result);
    result = collapse_links(&result, base_url);
    result = strip_formatting(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove any HTML tags that survived conversion, keeping their text.
///
/// Lines inside fenced code blocks are left alone.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    let mut lines = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
            continue;
        }
        if in_code_block {
            lines.push(line.to_string());
        } else {
            lines.push(HTML_TAG_RE.replace_all(line, "").to_string());
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Drop images
// ---------------------------------------------------------------------------

fn drop_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Collapse links to their labels
// ---------------------------------------------------------------------------

/// Replace `[label](href)` with `label`.
///
/// A link without a label keeps its target, resolved against `base_url`
/// when relative.
fn collapse_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]*)[^)]*\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let label = caps[1].trim();
            if !label.is_empty() {
                return label.to_string();
            }
            let href = &caps[2];
            match base_url.and_then(|base| base.join(href).ok()) {
                Some(resolved) => resolved.to_string(),
                None => href.to_string(),
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Strip Markdown formatting
// ---------------------------------------------------------------------------

/// Remove heading markers, emphasis, inline code ticks and code fences.
fn strip_formatting(md: &str) -> String {
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("valid regex"));
    static FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^\s*```.*$").expect("valid regex"));
    static STRONG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__").expect("valid regex")
    });
    static EM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\*([^*\s][^*\n]*)\*").expect("valid regex"));
    static CODE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));

    let result = HEADING_RE.replace_all(md, "");
    let result = FENCE_RE.replace_all(&result, "");
    let result = STRONG_RE.replace_all(&result, |caps: &regex::Captures| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    });
    let result = EM_RE.replace_all(&result, "$1");
    let result = CODE_RE.replace_all(&result, "$1");

    result.replace("\\", "")
}

// ---------------------------------------------------------------------------
// Pass 5: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim line ends and collapse runs of spaces inside a line.
fn normalize_whitespace(md: &str) -> String {
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]{2,}").expect("valid regex"));

    md.lines()
        .map(|line| SPACES_RE.replace_all(line.trim_end(), " ").to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 6: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into a single paragraph break.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_leftover_html_keeps_text() {
        let input = "<div class=\"note\">Important info</div>\n<span>inline</span>";
        assert_eq!(strip_leftover_html(input), "Important info\ninline");
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "```html\n<div>Preserved</div>\n```";
        assert!(strip_leftover_html(input).contains("<div>Preserved</div>"));
    }

    #[test]
    fn comparisons_are_not_tags() {
        let input = "if a < b and c > d";
        assert_eq!(strip_leftover_html(input), input);
    }

    #[test]
    fn images_are_dropped() {
        assert_eq!(drop_images("before ![alt](/a.png) after"), "before  after");
    }

    #[test]
    fn links_collapse_to_labels() {
        let input = "see [the docs](https://docs.example.com \"Docs\") and [guide](/guide)";
        assert_eq!(collapse_links(input, None), "see the docs and guide");
    }

    #[test]
    fn empty_label_keeps_resolved_target() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        assert_eq!(
            collapse_links("[](/about)", Some(&base)),
            "https://example.com/about"
        );
    }

    #[test]
    fn formatting_is_removed() {
        let input = "## Setup\n\nRun **cargo** with *care* and `--release`.\n\n```rust\nfn main() {}\n```";
        let result = strip_formatting(input);
        assert!(result.starts_with("Setup"));
        assert!(result.contains("Run cargo with care and --release."));
        assert!(result.contains("fn main() {}"));
        assert!(!result.contains("```"));
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(
            normalize_whitespace("a   b\t\tc   \nline 2  "),
            "a b c\nline 2"
        );
    }

    #[test]
    fn clean_blank_lines_collapses_excess() {
        assert_eq!(clean_blank_lines("Line 1\n\n\n\n\nLine 2"), "Line 1\n\nLine 2");
        assert_eq!(clean_blank_lines("Line 1\n\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn full_pipeline_produces_plain_text() {
        let input = "# Title\n\n\n\n<div>Some [linked](/x) content</div>\n\n![logo](/logo.png)\n\n**End**";
        let result = run_pipeline(input, None);
        assert_eq!(result, "Title\n\nSome linked content\n\nEnd");
    }
}
