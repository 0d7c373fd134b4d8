//! Reading position and chapter navigation for one open book.
//!
//! `Reader` owns everything tied to the open book: the render generation,
//! the viewport, the excerpt store and the progress list. Navigation is
//! optimistic: the index moves and progress is saved before the chapter
//! renders, so a failed render never loses the reader's place.

use crate::book::{Book, Chapter, TocEntry};
use crate::config::ReaderConfig;
use crate::dom::NodeId;
use crate::epub_loader::cover_data_url;
use crate::error::{NavigationError, Notice};
use crate::excerpts::{BookContext, DeleteOutcome, ExcerptRecord, ExcerptStore, ExcerptWrite};
use crate::highlight::{highlight, highlight_source, remove_highlights};
use crate::object_urls::ObjectUrlStore;
use crate::pipeline::{ChapterRenderer, RenderOptions, RenderOutcome};
use crate::progress::{ProgressStore, ReadingProgress};
use crate::render_token::RenderGeneration;
use crate::vault::Vault;
use crate::viewport::{ScrollAnchor, Viewport};
use anyhow::Result;
use chrono::{DateTime, TimeZone};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Told whenever the current chapter changes, so a table of contents can
/// follow along.
pub trait TocObserver {
    /// `toc_path` holds child indices from the toc root down to the entry
    /// pointing at the chapter, when one does.
    fn chapter_changed(&mut self, index: usize, chapter: &Chapter, toc_path: Option<&[usize]>);
}

/// What a host view needs from a mounted reader.
pub trait Screen {
    fn title(&self) -> String;

    fn render(&mut self) -> RenderOutcome;

    fn on_teardown(&mut self);
}

pub struct Reader {
    book: Box<dyn Book>,
    book_path: String,
    current: usize,
    config: ReaderConfig,
    progress: ProgressStore,
    renderer: ChapterRenderer,
    generation: RenderGeneration,
    viewport: Viewport,
    excerpts: ExcerptStore,
    toc_observer: Option<Box<dyn TocObserver>>,
    cover: Option<String>,
    notice: Option<Notice>,
}

impl Reader {
    /// Open `book` at its stored position. Nothing renders until
    /// `resume` or a navigation call.
    pub fn open(
        book: Box<dyn Book>,
        book_path: &str,
        config: ReaderConfig,
        progress: ProgressStore,
        vault: Arc<dyn Vault>,
    ) -> Self {
        let total = book.section_count();
        let current = match progress.get(book_path) {
            Some(stored) if stored.section_index < total => stored.section_index,
            Some(stored) => {
                warn!(
                    path = %book_path,
                    stored = stored.section_index,
                    total,
                    "Stored position is past the end of the book; starting over"
                );
                0
            }
            None => 0,
        };
        let context = BookContext::new(book_path, book.metadata().title.as_deref());
        let excerpts = ExcerptStore::new(
            vault,
            config.excerpt_storage_mode,
            &config.single_excerpt_path,
            context,
        );
        let cover = cover_data_url(book.as_ref());
        info!(path = %book_path, sections = total, current, "Opened book for reading");

        Reader {
            renderer: ChapterRenderer::new(RenderOptions {
                embed_foreign_fonts: config.prefer_book_font,
            }),
            viewport: Viewport::new(ObjectUrlStore::new(), config.reader_css()),
            generation: RenderGeneration::new(),
            book,
            book_path: book_path.to_string(),
            current,
            config,
            progress,
            excerpts,
            toc_observer: None,
            cover,
            notice: None,
        }
    }

    pub fn set_toc_observer(&mut self, observer: Box<dyn TocObserver>) {
        self.toc_observer = Some(observer);
    }

    pub fn book(&self) -> &dyn Book {
        self.book.as_ref()
    }

    pub fn book_path(&self) -> &str {
        &self.book_path
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.book.section_count()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn excerpts(&self) -> &ExcerptStore {
        &self.excerpts
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn generation(&self) -> &RenderGeneration {
        &self.generation
    }

    /// The latest user-facing notice, cleared once read.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    /// Render the stored position and restore its scroll offset.
    pub fn resume(&mut self) -> Result<RenderOutcome, NavigationError> {
        let scroll = self
            .progress
            .get(&self.book_path)
            .filter(|stored| stored.section_index == self.current)
            .map(|stored| stored.scroll_position)
            .unwrap_or(0.0);
        let outcome = self.go_to(self.current)?;
        if outcome.is_rendered() && scroll > 0.0 {
            self.viewport.set_scroll(ScrollAnchor::Container, scroll);
        }
        Ok(outcome)
    }

    pub fn go_to(&mut self, index: usize) -> Result<RenderOutcome, NavigationError> {
        let total = self.total();
        if index >= total {
            return Err(NavigationError::OutOfRange {
                requested: index,
                total,
            });
        }
        debug!(from = self.current, to = index, "Navigating");
        self.current = index;
        self.viewport.reset_scroll();
        if self.config.auto_save_progress {
            if let Err(err) = self.save_progress() {
                warn!("Failed to save reading progress: {err:#}");
            }
        }

        let outcome = self.render_current();
        if matches!(outcome, RenderOutcome::Superseded { .. }) {
            return Ok(outcome);
        }
        self.viewport.reset_scroll();
        self.notify_toc();
        Ok(outcome)
    }

    /// `None` at the last chapter.
    pub fn next(&mut self) -> Option<RenderOutcome> {
        let target = self.current + 1;
        if target >= self.total() {
            return None;
        }
        self.go_to(target).ok()
    }

    /// `None` at the first chapter.
    pub fn previous(&mut self) -> Option<RenderOutcome> {
        let target = self.current.checked_sub(1)?;
        self.go_to(target).ok()
    }

    /// Re-render the current chapter in place, keeping the scroll offset.
    pub fn refresh(&mut self) -> RenderOutcome {
        let container = self.viewport.scroll_offset(ScrollAnchor::Container);
        let outcome = self.render_current();
        if outcome.is_rendered() {
            self.viewport.set_scroll(ScrollAnchor::Container, container);
        }
        outcome
    }

    /// Swap in new settings and re-render with them.
    pub fn apply_config(&mut self, config: ReaderConfig) -> RenderOutcome {
        self.renderer.set_options(RenderOptions {
            embed_foreign_fonts: config.prefer_book_font,
        });
        self.viewport.set_reader_css(config.reader_css());
        self.progress.set_max_recent(config.max_recent_books);
        if config.excerpt_storage_mode != self.config.excerpt_storage_mode
            || config.single_excerpt_path != self.config.single_excerpt_path
        {
            self.excerpts = ExcerptStore::new(
                Arc::clone(self.excerpts.vault()),
                config.excerpt_storage_mode,
                &config.single_excerpt_path,
                self.excerpts.book().clone(),
            );
        }
        self.config = config;
        self.refresh()
    }

    /// Record the current position, merging metadata into the stored one.
    pub fn save_progress(&mut self) -> Result<()> {
        let mut metadata = self.book.metadata().clone();
        if let Some(cover) = &self.cover {
            metadata.cover = Some(cover.clone());
        }
        let mut record = ReadingProgress::new(&self.book_path, self.current, self.total())
            .with_metadata(metadata);
        record.scroll_position = self.viewport.scroll_offset(ScrollAnchor::Container);
        self.progress.upsert(record);
        self.progress.save()
    }

    /// Write `selection` as an excerpt of the current chapter and highlight
    /// it right away.
    pub fn create_excerpt<Tz>(&mut self, selection: &str, now: &DateTime<Tz>) -> Result<ExcerptWrite>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let written = match self.excerpts.create(selection, self.current, now) {
            Ok(written) => written,
            Err(err) => {
                self.notice = Some(Notice::FailedToWriteExcerpt);
                return Err(err);
            }
        };
        if let Some(document) = self.viewport.document_mut() {
            let root = document.root();
            let record = ExcerptRecord::new(selection.trim(), written.path.clone());
            let wrapped = highlight(document, root, &record);
            debug!(path = %written.path, wrapped, "Highlighted new excerpt");
        }
        if self.config.excerpt_success_notification {
            self.notice = Some(written.notice);
        }
        Ok(written)
    }

    /// The excerpt file behind an activated highlight, when it still exists.
    pub fn highlight_target(&mut self, node: NodeId) -> Option<String> {
        let source = self.viewport.document().and_then(|doc| highlight_source(doc, node))?;
        if self.excerpts.vault().exists(&source) {
            Some(source)
        } else {
            self.notice = Some(Notice::ExcerptFileNotFound);
            None
        }
    }

    /// Unwrap every highlight from `source`, then trash the file when it
    /// holds this excerpt alone.
    pub fn delete_highlight(&mut self, source: &str) -> Result<DeleteOutcome> {
        if let Some(document) = self.viewport.document_mut() {
            let root = document.root();
            let removed = remove_highlights(document, root, Some(source));
            debug!(%source, removed, "Removed highlights");
        }
        let outcome = self.excerpts.delete_source(source)?;
        self.notice = Some(outcome.notice());
        Ok(outcome)
    }

    pub fn snapshot(&mut self) -> Result<String> {
        let title = self.excerpts.book().title.clone();
        self.viewport.snapshot(&title).inspect_err(|_| {
            self.notice = Some(Notice::ExportFailed);
        })
    }

    fn render_current(&mut self) -> RenderOutcome {
        let ticket = self.generation.issue();
        let outcome = self.renderer.render(
            self.book.as_ref(),
            self.current,
            &ticket,
            &mut self.viewport,
            &self.excerpts,
        );
        if let RenderOutcome::Failed { notice, .. } = &outcome {
            self.notice = Some(*notice);
        }
        outcome
    }

    fn notify_toc(&mut self) {
        let Some(observer) = self.toc_observer.as_mut() else {
            return;
        };
        let Some(chapter) = self.book.section(self.current) else {
            return;
        };
        let path = find_toc_path(self.book.toc(), &chapter.href);
        observer.chapter_changed(self.current, chapter, path.as_deref());
    }
}

impl Screen for Reader {
    fn title(&self) -> String {
        self.excerpts.book().title.clone()
    }

    fn render(&mut self) -> RenderOutcome {
        self.refresh()
    }

    fn on_teardown(&mut self) {
        self.generation.invalidate();
        if self.config.auto_save_progress {
            if let Err(err) = self.save_progress() {
                warn!("Failed to save reading progress on close: {err:#}");
            }
        }
        self.viewport.clear();
        debug!(path = %self.book_path, "Reader torn down");
    }
}

/// Child indices leading to the first toc entry for `href`, ignoring
/// fragments.
pub fn find_toc_path(entries: &[TocEntry], href: &str) -> Option<Vec<usize>> {
    let target = strip_fragment(href);
    for (i, entry) in entries.iter().enumerate() {
        if strip_fragment(&entry.href) == target {
            return Some(vec![i]);
        }
        if let Some(mut rest) = find_toc_path(&entry.children, href) {
            rest.insert(0, i);
            return Some(rest);
        }
    }
    None
}

fn strip_fragment(href: &str) -> &str {
    href.split_once('#').map(|(path, _)| path).unwrap_or(href)
}
