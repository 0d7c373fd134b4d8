//! Excerpt notes kept next to the book in the user's vault.
//!
//! Four layouts are supported; the reader only reads back three of them
//! since daily notes are owned by another tool.

mod markdown;
mod store;
mod writer;

pub use markdown::strip_front_matter;
pub use store::ExcerptStore;
pub use writer::{DeleteOutcome, ExcerptWrite, is_single_excerpt_note};

use crate::vault;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const EXCERPT_TAG: &str = "excerpt";
pub const DEFAULT_SINGLE_NOTE: &str = "_chapterlight_excerpts.md";

/// One stored excerpt, as relocated into the chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExcerptRecord {
    pub excerpt_text: String,
    pub source_file: Option<String>,
    pub cfi: Option<String>,
}

impl ExcerptRecord {
    pub fn new(excerpt_text: impl Into<String>, source_file: impl Into<String>) -> Self {
        ExcerptRecord {
            excerpt_text: excerpt_text.into(),
            source_file: Some(source_file.into()),
            cfi: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    DailyNote,
    #[default]
    PerNote,
    PerBook,
    SingleNote,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::DailyNote => "daily-note",
            StorageMode::PerNote => "per-note",
            StorageMode::PerBook => "per-book",
            StorageMode::SingleNote => "single-note",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How excerpt notes name the book being read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookContext {
    /// Vault-relative path of the EPUB file.
    pub path: String,
    /// Metadata title, or the file's basename when the book has none.
    pub title: String,
}

impl BookContext {
    pub fn new(path: &str, title: Option<&str>) -> Self {
        let title = title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| vault::basename(path));
        BookContext {
            path: path.to_string(),
            title: title.to_string(),
        }
    }

    pub fn basename(&self) -> &str {
        vault::basename(&self.path)
    }

    pub fn dir(&self) -> &str {
        vault::parent_dir(&self.path)
    }
}

/// Anything that can list the stored excerpts of one chapter.
pub trait ExcerptSource {
    fn excerpts_for_chapter(&self, chapter_index: usize) -> anyhow::Result<Vec<ExcerptRecord>>;
}

impl ExcerptSource for ExcerptStore {
    fn excerpts_for_chapter(&self, chapter_index: usize) -> anyhow::Result<Vec<ExcerptRecord>> {
        self.collect_for_chapter(chapter_index)
    }
}
