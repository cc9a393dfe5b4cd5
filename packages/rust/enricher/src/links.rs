//! `[text](url)` link extraction and reference-number rewriting.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use promptbatch_shared::Link;

/// Matches `[text](url)` with non-empty text and url.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("link regex")
});

/// Extract links in order of first appearance. Identical (text, url) pairs
/// are reported once.
pub fn extract_links(text: &str) -> Vec<Link> {
    let mut seen = HashSet::new();

    LINK_RE
        .captures_iter(text)
        .map(|caps| Link::new(&caps[1], &caps[2]))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Replace every `[text](url)` with `text[n]`, where `n` is the 1-based
/// position of the link in `links`.
///
/// Matches that are not in `links` are left untouched. The text is scanned
/// once, so inserted reference numbers are never re-matched.
pub fn rewrite_prompt(text: &str, links: &[Link]) -> String {
    let mut numbers: HashMap<&Link, usize> = HashMap::with_capacity(links.len());
    for (i, link) in links.iter().enumerate() {
        numbers.entry(link).or_insert(i + 1);
    }

    LINK_RE
        .replace_all(text, |caps: &Captures| {
            match numbers.get(&Link::new(&caps[1], &caps[2])) {
                Some(n) => format!("{}[{n}]", &caps[1]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_links_is_identity() {
        let prompt = "Write a haiku about autumn. [not a link] (nor this)";
        let links = extract_links(prompt);
        assert!(links.is_empty());
        assert_eq!(rewrite_prompt(prompt, &links), prompt);
    }

    #[test]
    fn numbering_follows_first_appearance() {
        let prompt = "Compare [B](http://b.example) with [A](http://a.example).";
        let links = extract_links(prompt);
        assert_eq!(
            links,
            vec![
                Link::new("B", "http://b.example"),
                Link::new("A", "http://a.example"),
            ]
        );
        assert_eq!(rewrite_prompt(prompt, &links), "Compare B[1] with A[2].");
    }

    #[test]
    fn identical_pairs_share_a_number() {
        let prompt = "[x](http://e.com) then [y](http://f.com) then [x](http://e.com)";
        let links = extract_links(prompt);
        assert_eq!(links.len(), 2);
        assert_eq!(rewrite_prompt(prompt, &links), "x[1] then y[2] then x[1]");
    }

    #[test]
    fn same_url_different_text_are_distinct() {
        let prompt = "[docs](http://e.com) and [manual](http://e.com)";
        let links = extract_links(prompt);
        assert_eq!(links.len(), 2);
        assert_eq!(rewrite_prompt(prompt, &links), "docs[1] and manual[2]");
    }

    #[test]
    fn adjacent_links_rewrite_independently() {
        let prompt = "[a](http://a.example)[b](http://b.example)(see above)";
        let links = extract_links(prompt);
        assert_eq!(rewrite_prompt(prompt, &links), "a[1]b[2](see above)");
    }

    #[test]
    fn unknown_links_left_alone() {
        let prompt = "[a](http://a.example) [b](http://b.example)";
        let only_a = vec![Link::new("a", "http://a.example")];
        assert_eq!(rewrite_prompt(prompt, &only_a), "a[1] [b](http://b.example)");
    }
}
