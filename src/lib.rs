//! EPUB chapter rendering for an embedded reader view.
//!
//! A chapter is parsed out of the archive, its stylesheets are sanitized and
//! scoped under a single container class, its images are swapped for
//! resource handles, and previously saved excerpts are highlighted in place.
//! `navigation::Reader` ties the pieces together for one open book.

pub mod book;
pub mod config;
pub mod dom;
pub mod epub_loader;
pub mod error;
pub mod excerpts;
pub mod highlight;
pub mod navigation;
pub mod object_urls;
pub mod pipeline;
pub mod progress;
pub mod render_token;
pub mod resolver;
pub mod stylesheet;
pub mod vault;
pub mod viewport;

pub use book::{Book, BookMetadata, Chapter, MemoryBook, TocEntry};
pub use config::{LogLevel, ReaderConfig, load_config};
pub use epub_loader::{EpubBook, open_book};
pub use error::{BookError, NavigationError, Notice, RenderError};
pub use excerpts::{ExcerptRecord, ExcerptStore, StorageMode};
pub use navigation::{Reader, Screen, TocObserver};
pub use pipeline::{ChapterRenderer, RenderOptions, RenderOutcome};
pub use progress::{ProgressStore, ReadingProgress};
pub use vault::{FsVault, Vault};
pub use viewport::Viewport;
