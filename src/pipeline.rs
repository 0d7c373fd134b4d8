//! One chapter render pass, from archive markup to an installed chapter.
//!
//! Stages run in order: load the chapter document, collect and scope its
//! styles, rewrite image sources to resource handles, then relocate stored
//! excerpts. The ticket is checked before every viewport mutation so a
//! render overtaken by a newer navigation leaves the viewport alone.

use crate::book::Book;
use crate::dom::{ChapterDocument, ParsedChapter, StyleSource};
use crate::error::{Notice, RenderError};
use crate::excerpts::ExcerptSource;
use crate::highlight::apply_highlights;
use crate::object_urls::ResourceBag;
use crate::render_token::RenderTicket;
use crate::resolver::{self, is_direct_reference};
use crate::stylesheet::{CssSource, sanitize};
use crate::viewport::{RenderedChapter, Viewport};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Idle,
    Loading,
    StylesCollected,
    ImagesRewritten,
    HighlightsApplied,
    Rendered,
    Failed,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Idle => "idle",
            RenderStage::Loading => "loading",
            RenderStage::StylesCollected => "styles-collected",
            RenderStage::ImagesRewritten => "images-rewritten",
            RenderStage::HighlightsApplied => "highlights-applied",
            RenderStage::Rendered => "rendered",
            RenderStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered {
        index: usize,
        highlights: usize,
        hidden_images: usize,
    },
    Failed {
        index: usize,
        notice: Notice,
    },
    /// A newer render took over; nothing was installed.
    Superseded { index: usize },
}

impl RenderOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, RenderOutcome::Rendered { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Embed the book's `@font-face` rules and let its fonts win.
    pub embed_foreign_fonts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterRenderer {
    options: RenderOptions,
}

impl ChapterRenderer {
    pub fn new(options: RenderOptions) -> Self {
        ChapterRenderer { options }
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    pub fn set_options(&mut self, options: RenderOptions) {
        self.options = options;
    }

    /// Render chapter `index` into `viewport`. Never fails outright: the
    /// book and the viewport stay usable whatever the chapter contains.
    pub fn render(
        &self,
        book: &dyn Book,
        index: usize,
        ticket: &RenderTicket,
        viewport: &mut Viewport,
        excerpts: &dyn ExcerptSource,
    ) -> RenderOutcome {
        match self.try_render(book, index, ticket, viewport, excerpts) {
            Ok(outcome) => outcome,
            Err(err) if err.is_superseded() => {
                debug!(chapter = index, ticket = ticket.id(), "{err}");
                RenderOutcome::Superseded { index }
            }
            Err(err) => {
                warn!(chapter = index, stage = %RenderStage::Failed, "Chapter render failed: {err}");
                if ticket.is_current() {
                    viewport.fail(index, Notice::FailedToLoad);
                }
                RenderOutcome::Failed {
                    index,
                    notice: Notice::FailedToLoad,
                }
            }
        }
    }

    fn try_render(
        &self,
        book: &dyn Book,
        index: usize,
        ticket: &RenderTicket,
        viewport: &mut Viewport,
        excerpts: &dyn ExcerptSource,
    ) -> Result<RenderOutcome, RenderError> {
        ticket.check(RenderStage::Idle.as_str())?;
        viewport.begin_chapter();

        let chapter = book.section(index).ok_or(RenderError::MissingChapter(index))?;
        let base = chapter.href.clone();
        debug!(chapter = index, href = %base, stage = %RenderStage::Loading, "Loading chapter");
        let parsed = book.create_document(index)?;
        ticket.check(RenderStage::Loading.as_str())?;
        let Some(ParsedChapter {
            mut document,
            styles,
            title,
        }) = parsed
        else {
            warn!(chapter = index, href = %base, "{}", RenderError::Unparseable(index));
            viewport.fail(index, Notice::CannotParseChapter);
            return Ok(RenderOutcome::Failed {
                index,
                notice: Notice::CannotParseChapter,
            });
        };

        let mut bag = viewport.new_bag();
        let sources = collect_styles(book, &base, &styles);
        let css = sanitize(&sources, self.options.embed_foreign_fonts, |reference, from| {
            let located = resolver::locate(book, reference, from)?;
            Some(bag.mint(located.bytes, &located.path))
        });
        ticket.check(RenderStage::StylesCollected.as_str())?;
        viewport.inject_style(index, css);

        let hidden_images = rewrite_images(book, &base, &mut document, &mut bag);
        debug!(
            chapter = index,
            minted = bag.len(),
            hidden_images,
            stage = %RenderStage::ImagesRewritten,
            "Rewrote image sources"
        );

        let records = match excerpts.excerpts_for_chapter(index) {
            Ok(records) => records,
            Err(err) => {
                warn!(chapter = index, "Failed to read excerpts: {err:#}");
                Vec::new()
            }
        };
        let root = document.root();
        let highlights = apply_highlights(&mut document, root, &records);
        ticket.check(RenderStage::HighlightsApplied.as_str())?;

        viewport.install(RenderedChapter::new(index, title, document, bag));
        info!(
            chapter = index,
            highlights,
            hidden_images,
            stage = %RenderStage::Rendered,
            "Rendered chapter"
        );
        Ok(RenderOutcome::Rendered {
            index,
            highlights,
            hidden_images,
        })
    }
}

/// Inline styles resolve from the chapter; linked sheets from their own
/// archive path. Unreachable sheets are skipped.
fn collect_styles(book: &dyn Book, chapter_href: &str, styles: &[StyleSource]) -> Vec<CssSource> {
    styles
        .iter()
        .filter_map(|style| match style {
            StyleSource::Inline(css) => Some(CssSource::new(css.clone(), chapter_href)),
            StyleSource::Linked(href) => match resolver::locate(book, href, chapter_href) {
                Some(located) => Some(CssSource::new(
                    String::from_utf8_lossy(&located.bytes).into_owned(),
                    located.path,
                )),
                None => {
                    debug!(%href, "Linked stylesheet not found");
                    None
                }
            },
        })
        .collect()
}

/// Point `<img>` and SVG `<image>` sources at resource handles. Returns the
/// number of images hidden because their file is missing.
fn rewrite_images(book: &dyn Book, chapter_href: &str, document: &mut ChapterDocument, bag: &mut ResourceBag) -> usize {
    let root = document.root();
    let mut targets = Vec::new();
    for img in document.elements_by_tag(root, "img") {
        targets.push((img, "src"));
    }
    for image in document.elements_by_tag(root, "image") {
        for key in ["href", "xlink:href"] {
            if document.attr(image, key).is_some() {
                targets.push((image, key));
            }
        }
    }

    let mut hidden = 0;
    for (node, key) in targets {
        let Some(reference) = document.attr(node, key).map(str::trim).map(str::to_string) else {
            continue;
        };
        if !reference.is_empty() && is_direct_reference(&reference) {
            continue;
        }
        let located = if reference.is_empty() {
            None
        } else {
            resolver::locate(book, &reference, chapter_href)
        };
        match located {
            Some(located) => {
                let url = bag.mint(located.bytes, &located.path);
                document.set_attr(node, key, &url);
            }
            None => {
                debug!(%reference, "Hiding image with missing source");
                hide(document, node);
                hidden += 1;
            }
        }
    }
    hidden
}

fn hide(document: &mut ChapterDocument, node: crate::dom::NodeId) {
    document.set_attr(node, "hidden", "");
    let style = match document.attr(node, "style").map(str::trim) {
        Some(existing) if !existing.is_empty() => {
            format!("{}; display: none", existing.trim_end_matches(';'))
        }
        _ => "display: none".to_string(),
    };
    document.set_attr(node, "style", &style);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::MemoryBook;
    use crate::excerpts::ExcerptRecord;
    use crate::highlight::{HIGHLIGHT_CLASS, SOURCE_ATTR};
    use crate::object_urls::{ObjectUrlStore, URL_PREFIX};
    use crate::render_token::RenderGeneration;
    use crate::viewport::ViewContent;

    struct Fixed(Vec<ExcerptRecord>);

    impl ExcerptSource for Fixed {
        fn excerpts_for_chapter(&self, _chapter_index: usize) -> anyhow::Result<Vec<ExcerptRecord>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl ExcerptSource for Broken {
        fn excerpts_for_chapter(&self, _chapter_index: usize) -> anyhow::Result<Vec<ExcerptRecord>> {
            anyhow::bail!("vault unavailable")
        }
    }

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn book() -> MemoryBook {
        MemoryBook::new("Sample")
            .with_chapter(
                "c1",
                "OEBPS/Text/c1.xhtml",
                r#"<html><head><link rel="stylesheet" href="../Styles/book.css"/>
                <style>body { color: #222; } p.note { font-style: italic; }</style></head>
                <body><p>It was a dark and stormy night.</p>
                <p><img src="../Images/fig1.png"/><img src="missing.png" style="width: 10px;"/></p>
                <svg><image href="cover.png"/></svg></body></html>"#,
            )
            .with_chapter("c2", "OEBPS/Text/c2.xhtml", "<body><p>Second chapter.</p></body>")
            .with_chapter("c3", "OEBPS/Text/c3.xhtml", "<html><body>   </body></html>")
            .with_entry(
                "OEBPS/Styles/book.css",
                "@font-face { font-family: Book; src: url(../Fonts/book.ttf); }\nh1 { font-family: Book; }",
            )
            .with_entry("OEBPS/Fonts/book.ttf", vec![0, 1, 0, 0])
            .with_entry("OEBPS/Images/fig1.png", PNG.to_vec())
            .with_entry("OEBPS/images/cover.png", PNG.to_vec())
    }

    #[test]
    fn renders_styles_images_and_highlights() {
        let book = book();
        let store = ObjectUrlStore::new();
        let mut viewport = Viewport::new(store.clone(), "");
        let generation = RenderGeneration::new();
        let renderer = ChapterRenderer::new(RenderOptions {
            embed_foreign_fonts: true,
        });
        let excerpts = Fixed(vec![ExcerptRecord::new("dark and stormy", "notes/a.md")]);

        let outcome = renderer.render(&book, 0, &generation.issue(), &mut viewport, &excerpts);
        assert_eq!(
            outcome,
            RenderOutcome::Rendered {
                index: 0,
                highlights: 1,
                hidden_images: 1,
            }
        );

        let styles = viewport.styles();
        assert_eq!(styles.len(), 1);
        assert_eq!(styles[0].chapter, 0);
        assert!(styles[0].css.contains(&format!("url(\"{URL_PREFIX}")));
        assert!(styles[0].css.contains(".epub-reader-content h1 { font-family: Book !important; }"));
        assert!(styles[0].css.contains(".epub-reader-content { color: #222; }"));

        let html = viewport.render_html();
        assert!(html.contains(&format!("<img src=\"{URL_PREFIX}")));
        assert!(html.contains(&format!("<image href=\"{URL_PREFIX}")));
        assert!(html.contains("hidden=\"\""));
        assert!(html.contains("style=\"width: 10px; display: none\""));
        assert!(html.contains(&format!(
            "<span class=\"{HIGHLIGHT_CLASS}\" {SOURCE_ATTR}=\"notes/a.md\">dark and stormy</span>"
        )));
        // font + two images
        assert_eq!(store.live_count(), 3);
    }

    #[test]
    fn fonts_are_dropped_unless_embedding() {
        let book = book();
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        let generation = RenderGeneration::new();
        let renderer = ChapterRenderer::default();
        renderer.render(&book, 0, &generation.issue(), &mut viewport, &Fixed(Vec::new()));
        let css = &viewport.styles()[0].css;
        assert!(!css.contains("@font-face"));
        assert!(!css.contains("!important"));
    }

    #[test]
    fn next_render_releases_previous_chapter() {
        let book = book();
        let store = ObjectUrlStore::new();
        let mut viewport = Viewport::new(store.clone(), "");
        let generation = RenderGeneration::new();
        let renderer = ChapterRenderer::default();

        renderer.render(&book, 0, &generation.issue(), &mut viewport, &Fixed(Vec::new()));
        assert!(store.live_count() > 0);
        let outcome = renderer.render(&book, 1, &generation.issue(), &mut viewport, &Fixed(Vec::new()));
        assert!(outcome.is_rendered());
        assert_eq!(store.live_count(), 0);
        assert!(viewport.styles().iter().all(|style| style.chapter == 1));
        assert_eq!(viewport.rendered().map(|chapter| chapter.index), Some(1));
    }

    #[test]
    fn empty_body_shows_the_parse_notice() {
        let book = book();
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        let generation = RenderGeneration::new();
        let outcome = ChapterRenderer::default().render(
            &book,
            2,
            &generation.issue(),
            &mut viewport,
            &Fixed(Vec::new()),
        );
        assert_eq!(
            outcome,
            RenderOutcome::Failed {
                index: 2,
                notice: Notice::CannotParseChapter,
            }
        );
        assert!(matches!(
            viewport.content(),
            ViewContent::Failed {
                index: 2,
                notice: Notice::CannotParseChapter
            }
        ));
    }

    #[test]
    fn out_of_range_chapter_fails_gracefully() {
        let book = book();
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        let generation = RenderGeneration::new();
        let outcome = ChapterRenderer::default().render(
            &book,
            9,
            &generation.issue(),
            &mut viewport,
            &Fixed(Vec::new()),
        );
        assert_eq!(
            outcome,
            RenderOutcome::Failed {
                index: 9,
                notice: Notice::FailedToLoad,
            }
        );
    }

    #[test]
    fn superseded_render_leaves_viewport_untouched() {
        let book = book();
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        let generation = RenderGeneration::new();
        let renderer = ChapterRenderer::default();
        renderer.render(&book, 1, &generation.issue(), &mut viewport, &Fixed(Vec::new()));

        let stale = generation.issue();
        generation.issue();
        let outcome = renderer.render(&book, 0, &stale, &mut viewport, &Fixed(Vec::new()));
        assert_eq!(outcome, RenderOutcome::Superseded { index: 0 });
        assert_eq!(viewport.rendered().map(|chapter| chapter.index), Some(1));
    }

    #[test]
    fn excerpt_failures_do_not_fail_the_render() {
        let book = book();
        let mut viewport = Viewport::new(ObjectUrlStore::new(), "");
        let generation = RenderGeneration::new();
        let outcome = ChapterRenderer::default().render(&book, 1, &generation.issue(), &mut viewport, &Broken);
        assert_eq!(
            outcome,
            RenderOutcome::Rendered {
                index: 1,
                highlights: 0,
                hidden_images: 0,
            }
        );
    }
}
