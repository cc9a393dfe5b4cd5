//! Delimited-block extraction for generated text (`<think>…</think>` etc.).

/// An opening and closing delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPair {
    pub start: &'static str,
    pub end: &'static str,
}

/// Reasoning emitted by thinking models.
pub const THINK_TAGS: TagPair = TagPair {
    start: "<think>",
    end: "</think>",
};

/// Article wrapper some prompts ask the model to emit.
pub const ARTICLE_TAGS: TagPair = TagPair {
    start: "<article>",
    end: "</article>",
};

/// Which closing delimiter ends a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// The first closing delimiter after the opening one.
    #[default]
    Lazy,
    /// The last closing delimiter in the text.
    Greedy,
}

/// Byte range of the first block, `(outer_start, inner_start, inner_end, outer_end)`.
fn find_block(text: &str, tags: TagPair, policy: MatchPolicy) -> Option<(usize, usize, usize, usize)> {
    let outer_start = text.find(tags.start)?;
    let inner_start = outer_start + tags.start.len();
    let rest = &text[inner_start..];
    let rel_end = match policy {
        MatchPolicy::Lazy => rest.find(tags.end)?,
        MatchPolicy::Greedy => rest.rfind(tags.end)?,
    };
    let inner_end = inner_start + rel_end;
    Some((outer_start, inner_start, inner_end, inner_end + tags.end.len()))
}

/// Content of the first complete block, whitespace-trimmed.
pub fn extract_first(text: &str, tags: TagPair, policy: MatchPolicy) -> Option<String> {
    find_block(text, tags, policy).map(|(_, start, end, _)| text[start..end].trim().to_string())
}

/// Remove every complete block, delimiters included. An unterminated opening
/// delimiter is left in place.
pub fn strip_all(text: &str, tags: TagPair, policy: MatchPolicy) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some((outer_start, _, _, outer_end)) = find_block(rest, tags, policy) {
        out.push_str(&rest[..outer_start]);
        rest = &rest[outer_end..];
    }

    out.push_str(rest);
    out
}
