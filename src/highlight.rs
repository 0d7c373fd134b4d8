//! Excerpt highlighting over the chapter document.
//!
//! Matching works one text node at a time: an excerpt that crosses an
//! element boundary is not found. Hits inside a node are wrapped from the
//! last to the first so the node keeps the untouched prefix and the offsets
//! of the remaining hits stay valid.

use crate::dom::{ChapterDocument, NodeId};
use crate::excerpts::ExcerptRecord;
use std::collections::HashSet;
use tracing::debug;

pub const HIGHLIGHT_CLASS: &str = "epub-highlight";
pub const SOURCE_ATTR: &str = "data-source-file";

/// A byte range inside one text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub node: NodeId,
    pub span: Span,
}

/// Non-overlapping occurrences of `needle`, scanning left to right.
pub fn compute_highlight_spans(text: &str, needle: &str) -> Vec<Span> {
    if needle.is_empty() {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(found) = text[from..].find(needle) {
        let start = from + found;
        let end = start + needle.len();
        spans.push(Span { start, end });
        from = end;
    }
    spans
}

pub fn is_highlight(document: &ChapterDocument, node: NodeId) -> bool {
    document.tag_name(node) == Some("span") && document.has_class(node, HIGHLIGHT_CLASS)
}

/// Every hit of `needle` in document order, skipping text that is already
/// highlighted.
pub fn find_hits(document: &ChapterDocument, container: NodeId, needle: &str) -> Vec<Hit> {
    document
        .text_nodes(container)
        .into_iter()
        .filter(|node| document.closest(*node, is_highlight).is_none())
        .flat_map(|node| {
            let text = document.text(node).unwrap_or("");
            compute_highlight_spans(text, needle)
                .into_iter()
                .map(move |span| Hit { node, span })
        })
        .collect()
}

/// Wrap every occurrence of the record's text. Returns the number wrapped.
pub fn highlight(document: &mut ChapterDocument, container: NodeId, record: &ExcerptRecord) -> usize {
    let needle = record.excerpt_text.trim();
    if needle.is_empty() {
        return 0;
    }
    let hits = find_hits(document, container, needle);
    let mut wrapped = 0;
    for hit in hits.iter().rev() {
        let mut attrs = vec![("class".to_string(), HIGHLIGHT_CLASS.to_string())];
        if let Some(source) = record.source_file.as_deref().filter(|s| !s.is_empty()) {
            attrs.push((SOURCE_ATTR.to_string(), source.to_string()));
        }
        match document.surround_text(hit.node, hit.span.start, hit.span.end, "span", attrs) {
            Ok(_) => wrapped += 1,
            Err(err) => debug!(node = hit.node.index(), "Skipping highlight hit: {err}"),
        }
    }
    wrapped
}

/// Highlight a batch of records, ignoring exact duplicates.
pub fn apply_highlights(document: &mut ChapterDocument, container: NodeId, records: &[ExcerptRecord]) -> usize {
    let mut seen: HashSet<(&str, Option<&str>)> = HashSet::new();
    let mut total = 0;
    for record in records {
        if !seen.insert((record.excerpt_text.trim(), record.source_file.as_deref())) {
            continue;
        }
        total += highlight(document, container, record);
    }
    total
}

/// The excerpt file behind a highlight the user activated, if any.
pub fn highlight_source(document: &ChapterDocument, node: NodeId) -> Option<String> {
    let span = document.closest(node, is_highlight)?;
    document
        .attr(span, SOURCE_ATTR)
        .filter(|source| !source.is_empty())
        .map(str::to_string)
}

/// Unwrap highlights, all of them or only those from `source`.
pub fn remove_highlights(document: &mut ChapterDocument, container: NodeId, source: Option<&str>) -> usize {
    let targets: Vec<NodeId> = document
        .descendants(container)
        .into_iter()
        .filter(|node| is_highlight(document, *node))
        .filter(|node| source.is_none_or(|source| document.attr(*node, SOURCE_ATTR) == Some(source)))
        .collect();
    for node in &targets {
        document.unwrap(*node);
    }
    if !targets.is_empty() {
        document.normalize(container);
    }
    targets.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ParsedChapter;

    fn record(text: &str, source: Option<&str>) -> ExcerptRecord {
        ExcerptRecord {
            excerpt_text: text.to_string(),
            source_file: source.map(str::to_string),
            cfi: None,
        }
    }

    fn chapter(body: &str) -> ChapterDocument {
        ParsedChapter::parse(&format!("<html><body>{body}</body></html>"))
            .expect("fixture should parse")
            .document
    }

    #[test]
    fn spans_are_disjoint_and_ordered() {
        assert_eq!(
            compute_highlight_spans("aaaa", "aa"),
            vec![Span { start: 0, end: 2 }, Span { start: 2, end: 4 }]
        );
        assert!(compute_highlight_spans("abc", "").is_empty());
        assert!(compute_highlight_spans("abc", "z").is_empty());
    }

    #[test]
    fn all_hits_in_one_node_are_wrapped_in_place() {
        let mut document = chapter("<p>catcatcat</p>");
        let root = document.root();

        assert_eq!(highlight(&mut document, root, &record("cat", Some("n.md"))), 3);

        let html = document.inner_html(root);
        let span = r#"<span class="epub-highlight" data-source-file="n.md">cat</span>"#;
        assert_eq!(html, format!("<p>{span}{span}{span}</p>"));
        assert_eq!(document.text_content(root), "catcatcat");
    }

    #[test]
    fn hits_across_nodes_keep_text_intact() {
        let mut document = chapter("<p>The sea. The <em>sea</em> again, the sea.</p>");
        let root = document.root();
        let before = document.text_content(root);

        let count = highlight(&mut document, root, &record("sea", None));

        assert_eq!(count, 3);
        assert_eq!(document.text_content(root), before);
        assert_eq!(
            document.inner_html(root),
            "<p>The <span class=\"epub-highlight\">sea</span>. The <em><span class=\"epub-highlight\">sea</span></em> again, the <span class=\"epub-highlight\">sea</span>.</p>"
        );
    }

    #[test]
    fn multibyte_text_splits_on_character_boundaries() {
        let mut document = chapter("<p>naïve café, naïve café</p>");
        let root = document.root();
        assert_eq!(highlight(&mut document, root, &record(" café", None)), 2);
        assert_eq!(document.text_content(root), "naïve café, naïve café");
    }

    #[test]
    fn highlighted_text_is_not_highlighted_again() {
        let mut document = chapter("<p>red fox</p>");
        let root = document.root();
        assert_eq!(highlight(&mut document, root, &record("red fox", Some("a.md"))), 1);
        assert_eq!(highlight(&mut document, root, &record("fox", Some("b.md"))), 0);
        assert_eq!(document.elements_by_tag(root, "span").len(), 1);
    }

    #[test]
    fn blank_and_duplicate_records_are_skipped() {
        let mut document = chapter("<p>one two one</p>");
        let root = document.root();
        let records = vec![
            record("  ", None),
            record("one", Some("x.md")),
            record(" one ", Some("x.md")),
        ];
        assert_eq!(apply_highlights(&mut document, root, &records), 2);
    }

    #[test]
    fn activation_reports_the_source_file() {
        let mut document = chapter("<p>alpha beta</p>");
        let root = document.root();
        highlight(&mut document, root, &record("beta", Some("notes/b.md")));
        let span = document.elements_by_tag(root, "span")[0];
        let inner = document.children(span)[0];

        assert_eq!(highlight_source(&document, inner).as_deref(), Some("notes/b.md"));
        let p = document.elements_by_tag(root, "p")[0];
        assert_eq!(highlight_source(&document, p), None);
    }

    #[test]
    fn removal_unwraps_only_the_matching_source() {
        let mut document = chapter("<p>alpha beta alpha</p>");
        let root = document.root();
        highlight(&mut document, root, &record("alpha", Some("a.md")));
        highlight(&mut document, root, &record("beta", Some("b.md")));

        assert_eq!(remove_highlights(&mut document, root, Some("a.md")), 2);
        assert_eq!(
            document.inner_html(root),
            "<p>alpha <span class=\"epub-highlight\" data-source-file=\"b.md\">beta</span> alpha</p>"
        );
        assert_eq!(remove_highlights(&mut document, root, None), 1);
        assert_eq!(document.inner_html(root), "<p>alpha beta alpha</p>");
        assert_eq!(highlight(&mut document, root, &record("alpha beta", None)), 1);
    }
}
