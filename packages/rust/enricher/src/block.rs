//! Enrichment block rendering.

use chrono::NaiveDate;

use promptbatch_shared::Link;

use crate::fetch::FetchedReference;

/// Appended to reference content cut at the character cap.
pub const TRUNCATION_MARKER: &str = "\n[... reference truncated ...]";

const HEADER: &str = "# Context Information";

const REFERENCES_INTRO: &str =
    "## References\nThe prompt cites the following sources by number:";

const CLOSING_INSTRUCTIONS: &str = "## Writing Instructions\n\
    Use the context above to inform your response. Where a numbered reference \
    is relevant, cite it by its number, for example [1]. Keep a friendly, \
    engaging tone while being thorough and accurate.";

/// Rendering options for the block.
#[derive(Debug, Clone)]
pub struct BlockSettings {
    /// Characters of each reference kept before truncating.
    pub max_reference_chars: usize,
    /// Optional framing line placed after the date.
    pub locale_note: Option<String>,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            max_reference_chars: 1500,
            locale_note: None,
        }
    }
}

/// Render the enrichment block for one prompt.
///
/// `references[i]` belongs to `links[i]` and is numbered `i + 1`. References
/// without content are left out but keep their number, so the numbering in
/// the rewritten prompt stays valid.
pub fn build_enrichment_block(
    references: &[FetchedReference],
    links: &[Link],
    today: NaiveDate,
    settings: &BlockSettings,
) -> String {
    let mut sections = vec![
        HEADER.to_string(),
        format!("Current date: {}", today.format("%B %d, %Y")),
    ];

    if let Some(note) = settings.locale_note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        sections.push(note.to_string());
    }

    let rendered: Vec<String> = links
        .iter()
        .zip(references)
        .enumerate()
        .filter_map(|(i, (link, reference))| {
            let content = reference.content.as_deref()?;
            Some(format!(
                "Reference [{}]: {}\n{}",
                i + 1,
                link.url,
                truncate_chars(content, settings.max_reference_chars)
            ))
        })
        .collect();

    if !rendered.is_empty() {
        sections.push(REFERENCES_INTRO.to_string());
        sections.extend(rendered);
    }

    sections.push(CLOSING_INSTRUCTIONS.to_string());
    sections.join("\n\n")
}

/// Cut `text` to at most `max` characters, appending the truncation marker
/// when anything was dropped.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn reference(url: &str, content: Option<&str>) -> FetchedReference {
        FetchedReference {
            url: url.into(),
            content: content.map(String::from),
        }
    }

    #[test]
    fn no_links_still_frames_date_and_instructions() {
        let block = build_enrichment_block(&[], &[], date(), &BlockSettings::default());
        assert!(block.starts_with("# Context Information"));
        assert!(block.contains("Current date: March 03, 2025"));
        assert!(block.contains("## Writing Instructions"));
        assert!(!block.contains("Reference ["));
        assert!(!block.contains("## References"));
    }

    #[test]
    fn references_render_exactly() {
        let links = vec![Link::new("x", "http://example.com")];
        let refs = vec![reference("http://example.com", Some("Example content."))];
        let block = build_enrichment_block(&refs, &links, date(), &BlockSettings::default());
        assert!(block.contains("Reference [1]: http://example.com\nExample content."));
    }

    #[test]
    fn absent_references_keep_numbering() {
        let links = vec![
            Link::new("a", "http://a.example"),
            Link::new("b", "http://b.example"),
        ];
        let refs = vec![
            reference("http://a.example", None),
            reference("http://b.example", Some("B text")),
        ];
        let block = build_enrichment_block(&refs, &links, date(), &BlockSettings::default());
        assert!(!block.contains("Reference [1]"));
        assert!(block.contains("Reference [2]: http://b.example\nB text"));
    }

    #[test]
    fn locale_note_follows_date() {
        let settings = BlockSettings {
            locale_note: Some("Write for readers in New Zealand.".into()),
            ..BlockSettings::default()
        };
        let block = build_enrichment_block(&[], &[], date(), &settings);
        let date_at = block.find("Current date").unwrap();
        let note_at = block.find("New Zealand").unwrap();
        assert!(date_at < note_at);
    }

    #[test]
    fn long_content_truncated_with_marker() {
        let links = vec![Link::new("l", "http://l.example")];
        let refs = vec![reference("http://l.example", Some(&"é".repeat(20)))];
        let settings = BlockSettings {
            max_reference_chars: 5,
            locale_note: None,
        };
        let block = build_enrichment_block(&refs, &links, date(), &settings);
        let expected = format!("Reference [1]: http://l.example\n{}{TRUNCATION_MARKER}", "é".repeat(5));
        assert!(block.contains(&expected));
    }

    #[test]
    fn truncate_at_exact_limit_is_untouched() {
        assert_eq!(truncate_chars("abcde", 5), "abcde");
        assert_eq!(truncate_chars("abcdef", 5), format!("abcde{TRUNCATION_MARKER}"));
    }
}
