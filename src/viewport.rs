//! The host-facing render surface.
//!
//! A `Viewport` holds at most one rendered chapter plus the style elements
//! injected for it. Replacing the chapter drops its `ResourceBag`, which
//! revokes every handle minted for it.

use crate::dom::ChapterDocument;
use crate::error::Notice;
use crate::object_urls::{ObjectUrlStore, ResourceBag, URL_PREFIX};
use anyhow::{Result, bail};
use html_escape::{encode_double_quoted_attribute, encode_text};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const CHAPTER_STYLE_ATTR: &str = "data-epub-chapter-style";

static HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"{}[0-9a-f]+", regex::escape(URL_PREFIX))).unwrap());

/// Style text safe to place inside a `<style>` element. `<\/` reads the
/// same inside a CSS string and can never close the element.
fn style_text(css: &str) -> Cow<'_, str> {
    if css.contains("</") {
        Cow::Owned(css.replace("</", "<\\/"))
    } else {
        Cow::Borrowed(css)
    }
}

/// A scoped `<style>` element tagged with the chapter it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedStyle {
    pub chapter: usize,
    pub css: String,
}

#[derive(Debug)]
pub struct RenderedChapter {
    pub index: usize,
    pub title: Option<String>,
    pub document: ChapterDocument,
    resources: ResourceBag,
}

impl RenderedChapter {
    pub fn new(index: usize, title: Option<String>, document: ChapterDocument, resources: ResourceBag) -> Self {
        RenderedChapter {
            index,
            title,
            document,
            resources,
        }
    }

    pub fn resources(&self) -> &ResourceBag {
        &self.resources
    }
}

#[derive(Debug, Default)]
pub enum ViewContent {
    #[default]
    Empty,
    Placeholder(Notice),
    Chapter(RenderedChapter),
    Failed { index: usize, notice: Notice },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScrollAnchor {
    /// The scrolling container around the chapter.
    Container,
    /// The chapter element itself.
    Content,
}

#[derive(Debug)]
pub struct Viewport {
    store: ObjectUrlStore,
    reader_css: String,
    styles: Vec<InjectedStyle>,
    content: ViewContent,
    scroll: BTreeMap<ScrollAnchor, f64>,
}

impl Viewport {
    pub fn new(store: ObjectUrlStore, reader_css: impl Into<String>) -> Self {
        Viewport {
            store,
            reader_css: reader_css.into(),
            styles: Vec::new(),
            content: ViewContent::Empty,
            scroll: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &ObjectUrlStore {
        &self.store
    }

    pub fn new_bag(&self) -> ResourceBag {
        ResourceBag::new(self.store.clone())
    }

    pub fn set_reader_css(&mut self, css: impl Into<String>) {
        self.reader_css = css.into();
    }

    /// Tear down the previous chapter and show the loading placeholder.
    pub fn begin_chapter(&mut self) {
        let removed = self.remove_chapter_styles();
        let released = match std::mem::replace(&mut self.content, ViewContent::Placeholder(Notice::Loading)) {
            ViewContent::Chapter(mut chapter) => chapter.resources.release(),
            _ => 0,
        };
        debug!(removed, released, "Cleared previous chapter");
    }

    pub fn remove_chapter_styles(&mut self) -> usize {
        let removed = self.styles.len();
        self.styles.clear();
        removed
    }

    pub fn inject_style(&mut self, chapter: usize, css: String) {
        if css.trim().is_empty() {
            return;
        }
        self.styles.push(InjectedStyle { chapter, css });
    }

    pub fn styles(&self) -> &[InjectedStyle] {
        &self.styles
    }

    pub fn install(&mut self, chapter: RenderedChapter) {
        debug!(
            chapter = chapter.index,
            resources = chapter.resources.len(),
            "Installed chapter"
        );
        self.content = ViewContent::Chapter(chapter);
    }

    pub fn fail(&mut self, index: usize, notice: Notice) {
        self.content = ViewContent::Failed { index, notice };
    }

    pub fn content(&self) -> &ViewContent {
        &self.content
    }

    pub fn rendered(&self) -> Option<&RenderedChapter> {
        match &self.content {
            ViewContent::Chapter(chapter) => Some(chapter),
            _ => None,
        }
    }

    pub fn document(&self) -> Option<&ChapterDocument> {
        self.rendered().map(|chapter| &chapter.document)
    }

    pub fn document_mut(&mut self) -> Option<&mut ChapterDocument> {
        match &mut self.content {
            ViewContent::Chapter(chapter) => Some(&mut chapter.document),
            _ => None,
        }
    }

    pub fn set_scroll(&mut self, anchor: ScrollAnchor, offset: f64) {
        self.scroll.insert(anchor, offset.max(0.0));
    }

    pub fn scroll_offset(&self, anchor: ScrollAnchor) -> f64 {
        self.scroll.get(&anchor).copied().unwrap_or(0.0)
    }

    pub fn reset_scroll(&mut self) {
        self.scroll.clear();
    }

    pub fn clear(&mut self) {
        self.remove_chapter_styles();
        self.content = ViewContent::Empty;
        self.scroll.clear();
    }

    /// Style elements followed by the chapter subtree, as a host would
    /// mount them.
    pub fn render_html(&self) -> String {
        let mut out = String::new();
        for style in &self.styles {
            out.push_str(&format!(
                "<style {CHAPTER_STYLE_ATTR}=\"{}\">{}</style>",
                style.chapter,
                style_text(&style.css)
            ));
        }
        match &self.content {
            ViewContent::Empty => {}
            ViewContent::Placeholder(notice) | ViewContent::Failed { notice, .. } => {
                out.push_str(&format!(
                    "<div class=\"epub-reader-notice\">{}</div>",
                    encode_text(&notice.to_string())
                ));
            }
            ViewContent::Chapter(chapter) => {
                out.push_str(&chapter.document.outer_html(chapter.document.root()))
            }
        }
        out
    }

    /// A standalone HTML document of the current chapter with every live
    /// handle inlined as a `data:` URL.
    pub fn snapshot(&self, title: &str) -> Result<String> {
        let Some(chapter) = self.rendered() else {
            bail!("No chapter is rendered");
        };
        let inline = |value: &str| -> String {
            HANDLE
                .replace_all(value, |caps: &regex::Captures<'_>| {
                    let handle = &caps[0];
                    self.store.to_data_url(handle).unwrap_or_else(|| {
                        warn!(%handle, "Snapshot refers to a revoked handle");
                        handle.to_string()
                    })
                })
                .into_owned()
        };

        let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        let title = chapter.title.as_deref().unwrap_or(title);
        html.push_str(&format!("<title>{}</title>\n", encode_text(title)));
        html.push_str(&format!("<style>{}</style>\n", style_text(&self.reader_css)));
        for style in &self.styles {
            html.push_str(&format!(
                "<style {CHAPTER_STYLE_ATTR}=\"{}\">{}</style>\n",
                encode_double_quoted_attribute(&style.chapter.to_string()),
                style_text(&inline(&style.css))
            ));
        }
        html.push_str("</head>\n<body>\n");
        html.push_str(&chapter.document.outer_html_with(
            chapter.document.root(),
            &|_: &str, _: &str, value: &str| {
                if value.contains(URL_PREFIX) {
                    inline(value)
                } else {
                    value.to_string()
                }
            },
        ));
        html.push_str("\n</body>\n</html>\n");
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ParsedChapter;

    fn chapter(viewport: &Viewport, index: usize, markup: &str) -> RenderedChapter {
        let parsed = ParsedChapter::parse(markup).expect("parse chapter");
        RenderedChapter::new(index, parsed.title, parsed.document, viewport.new_bag())
    }

    #[test]
    fn begin_chapter_releases_resources_and_styles() {
        let store = ObjectUrlStore::new();
        let mut viewport = Viewport::new(store.clone(), "");
        let mut rendered = chapter(&viewport, 0, "<body><p>one</p></body>");
        rendered.resources.mint(vec![1, 2, 3], "a.png");
        viewport.inject_style(0, ".epub-reader-content p { color: red; }".to_string());
        viewport.install(rendered);
        assert_eq!(store.live_count(), 1);

        viewport.begin_chapter();
        assert_eq!(store.live_count(), 0);
        assert!(viewport.styles().is_empty());
        assert!(matches!(viewport.content(), ViewContent::Placeholder(Notice::Loading)));
    }

    #[test]
    fn scroll_anchors_reset_to_top() {
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        viewport.set_scroll(ScrollAnchor::Container, 420.0);
        viewport.set_scroll(ScrollAnchor::Content, -5.0);
        assert_eq!(viewport.scroll_offset(ScrollAnchor::Container), 420.0);
        assert_eq!(viewport.scroll_offset(ScrollAnchor::Content), 0.0);
        viewport.reset_scroll();
        assert_eq!(viewport.scroll_offset(ScrollAnchor::Container), 0.0);
    }

    #[test]
    fn render_html_tags_styles_with_the_chapter() {
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        viewport.inject_style(3, ".epub-reader-content p { margin: 0; }".to_string());
        viewport.inject_style(3, "   ".to_string());
        let rendered = chapter(&viewport, 3, "<body><p>text</p></body>");
        viewport.install(rendered);
        let html = viewport.render_html();
        assert!(html.starts_with("<style data-epub-chapter-style=\"3\">"));
        assert_eq!(viewport.styles().len(), 1);
        assert!(html.contains("<p>text</p>"));
    }

    #[test]
    fn snapshot_inlines_live_handles() {
        let store = ObjectUrlStore::new();
        let mut viewport = Viewport::new(store.clone(), "body { margin: 0; }");
        let mut rendered = chapter(&viewport, 0, "<body><img src=\"x\"></body>");
        let url = rendered.resources.mint(b"GIF89a".to_vec(), "pic.gif");
        let img = rendered.document.elements_by_tag(rendered.document.root(), "img")[0];
        rendered.document.set_attr(img, "src", &url);
        viewport.inject_style(0, format!("@font-face {{ src: url({url}); }}"));
        viewport.install(rendered);

        let html = viewport.snapshot("Untitled").expect("snapshot");
        assert!(!html.contains(URL_PREFIX));
        assert!(html.contains("src=\"data:image/gif;base64,"));
        assert!(html.contains("url(data:image/gif;base64,"));
        assert!(html.contains("<title>Untitled</title>"));
    }

    #[test]
    fn snapshot_without_chapter_is_an_error() {
        let viewport = Viewport::new(ObjectUrlStore::new(), "");
        assert!(viewport.snapshot("x").is_err());
    }

    #[test]
    fn style_text_cannot_close_the_element() {
        let css = crate::stylesheet::scope_css(
            r#"p::after { content: "</style><img src=x onerror=alert(1)>" }"#,
        );
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "p::before { content: \"</STYLE>\" }");
        viewport.inject_style(0, css);
        let rendered = chapter(&viewport, 0, "<body><p>text</p></body>");
        viewport.install(rendered);

        let html = viewport.render_html();
        assert_eq!(html.matches("</style>").count(), 1, "{html}");
        assert!(html.contains(r#"content: "<\/style><img src=x onerror=alert(1)>""#));

        let snapshot = viewport.snapshot("x").expect("snapshot");
        assert_eq!(snapshot.matches("</style>").count(), 2, "{snapshot}");
        assert!(!snapshot.contains("</STYLE>"));
    }
}
