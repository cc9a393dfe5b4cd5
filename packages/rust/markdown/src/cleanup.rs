//! Cleanup pipeline that turns converted Markdown into plain reference text.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = strip_leftover_html(&result);
    result = flatten_images(&result);
    result = flatten_links(&result);
    result = strip_heading_markers(&result);
    result = strip_emphasis(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove any HTML tag that survived conversion, keeping its inner text.
/// Fenced code blocks are left untouched.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex"));

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Images and links to plain text
// ---------------------------------------------------------------------------

/// `![alt](src)` becomes `alt`; images without alt text disappear.
fn flatten_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "$1").into_owned()
}

/// `[text](url)` becomes `text`.
///
/// Leaving link syntax in reference text would be picked up as new links
/// when the text is inlined into a prompt.
fn flatten_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    LINK_RE.replace_all(md, "$1").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 3: Markdown decoration
// ---------------------------------------------------------------------------

fn strip_heading_markers(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("valid regex"));

    H_RE.replace_all(md, "").into_owned()
}

/// Drop `**bold**` / `__bold__` / `*em*` / `_em_` markers, keeping the words.
fn strip_emphasis(md: &str) -> String {
    static STRONG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\*\*|__)(\S(?:.*?\S)?)(\*\*|__)").expect("valid regex"));
    static EM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(^|[\s(])[*_](\S(?:[^*_]*?\S)?)[*_]").expect("valid regex"));

    let result = STRONG_RE.replace_all(md, "$2");
    EM_RE.replace_all(&result, "$1$2").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
