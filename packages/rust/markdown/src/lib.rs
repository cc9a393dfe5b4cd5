//! Web page text extraction for reference material.
//!
//! Pulls the main content out of a fetched HTML page, converts it with `htmd`,
//! then runs a cleanup pipeline that flattens the result to readable plain text
//! suitable for inlining into a prompt.

mod cleanup;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use promptbatch_shared::{PromptBatchError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Text extracted from one HTML page.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Cleaned plain text of the main content.
    pub text: String,
    /// Page title from `<title>` or the first `<h1>`, if any.
    pub title: Option<String>,
    /// Whitespace-separated word count of `text`.
    pub word_count: usize,
}

impl ExtractedText {
    /// True when nothing useful survived extraction.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Tags dropped wholesale during conversion (page chrome and non-text media).
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "button", "iframe",
    "noscript", "svg", "canvas", "video", "audio",
];

/// Main-content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article .entry-content",
    "article .post-content",
    "[itemprop=\"articleBody\"]",
    "article",
    "[role=\"main\"]",
    "main",
    "#content",
    ".content",
];

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Extract readable text from an HTML page.
///
/// Chooses the main content container, renders tables as pipe-separated rows,
/// converts the rest via `htmd` and flattens the markdown to plain text.
#[instrument(skip(html), fields(url = %source_url, html_len = html.len()))]
pub fn extract_text(html: &str, source_url: &str) -> Result<ExtractedText> {
    let doc = Html::parse_document(html);
    let title = extract_title(&doc);

    let content_html = select_content_html(&doc).unwrap_or_else(|| html.to_string());
    let content_html = flatten_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();

    let raw = converter
        .convert(&content_html)
        .map_err(|e| PromptBatchError::Conversion(format!("htmd conversion failed: {e}")))?;

    let text = cleanup::run_pipeline(&raw);
    let word_count = text.split_whitespace().count();

    debug!(word_count, text_len = text.len(), "extraction complete");

    Ok(ExtractedText {
        text,
        title,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Inner HTML of the first matching content container, falling back to `<body>`.
fn select_content_html(doc: &Html) -> Option<String> {
    CONTENT_SELECTORS
        .iter()
        .chain(std::iter::once(&"body"))
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|selector| doc.select(&selector).next().map(|el| el.inner_html()))
}

/// `<title>` text, else the first `<h1>`.
fn extract_title(doc: &Html) -> Option<String> {
    ["title", "h1"]
        .iter()
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|selector| {
            doc.select(&selector)
                .next()
                .map(|el| collapse_text(&el))
                .filter(|t| !t.is_empty())
        })
}

fn collapse_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace each `<table>` with one `<p>` per row, cells joined by ` | `.
///
/// `htmd` has no table support, so rows would otherwise run together.
fn flatten_tables(html: &str) -> String {
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("th, td"),
    ) else {
        return html.to_string();
    };

    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();

    for table in fragment.select(&table_sel) {
        let rows: Vec<String> = table
            .select(&row_sel)
            .map(|row| {
                row.select(&cell_sel)
                    .map(|cell| collapse_text(&cell))
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .filter(|row| !row.trim_matches(|c: char| c == '|' || c.is_whitespace()).is_empty())
            .map(|row| format!("<p>{row}</p>"))
            .collect();

        result = result.replacen(&table.html(), &rows.concat(), 1);
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
