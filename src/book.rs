//! The book handle the renderer reads from.
//!
//! `Book` is the seam to the EPUB-parsing library: it exposes spine
//! sections, metadata, the table of contents and raw archive entries. The
//! renderer never touches the zip container directly. `MemoryBook` holds
//! pre-extracted entries and is what hosts use when the archive has already
//! been unpacked.

use crate::dom::ParsedChapter;
use crate::error::BookError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One spine entry. `href` is archive-relative and doubles as the base for
/// resolving the chapter's own resource references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    pub href: String,
    pub children: Vec<TocEntry>,
}

/// Descriptive metadata, also snapshotted into reading progress records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Cover reference: an archive path while the book is open, a `data:`
    /// URL once snapshotted into progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

impl BookMetadata {
    /// Additive merge: a field from `incoming` replaces ours only when it
    /// carries a value. Blank strings and empty lists never erase data.
    pub fn merge(&mut self, incoming: &BookMetadata) {
        merge_text(&mut self.title, &incoming.title);
        merge_list(&mut self.authors, &incoming.authors);
        merge_text(&mut self.language, &incoming.language);
        merge_text(&mut self.publisher, &incoming.publisher);
        merge_text(&mut self.description, &incoming.description);
        merge_list(&mut self.subjects, &incoming.subjects);
        merge_text(&mut self.identifier, &incoming.identifier);
        merge_text(&mut self.date, &incoming.date);
        merge_text(&mut self.cover, &incoming.cover);
    }

    pub fn is_empty(&self) -> bool {
        *self == BookMetadata::default()
    }
}

fn merge_text(target: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming {
        if !value.trim().is_empty() {
            *target = Some(value.clone());
        }
    }
}

fn merge_list(target: &mut Vec<String>, incoming: &[String]) {
    let values: Vec<String> = incoming
        .iter()
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .collect();
    if !values.is_empty() {
        *target = values;
    }
}

pub trait Book: Send + Sync {
    fn metadata(&self) -> &BookMetadata;

    fn sections(&self) -> &[Chapter];

    fn toc(&self) -> &[TocEntry];

    /// Raw bytes of an archive entry. `Ok(None)` means the entry does not
    /// exist, which callers treat as a recoverable miss.
    fn load_blob(&self, path: &str) -> Result<Option<Vec<u8>>, BookError>;

    fn cover(&self) -> Result<Option<Vec<u8>>, BookError>;

    fn load_text(&self, path: &str) -> Result<Option<String>, BookError> {
        match self.load_blob(path)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| BookError::Encoding(format!("{path}: {err}"))),
            None => Ok(None),
        }
    }

    fn section(&self, index: usize) -> Option<&Chapter> {
        self.sections().get(index)
    }

    fn section_count(&self) -> usize {
        self.sections().len()
    }

    /// Parse the chapter markup. `Ok(None)` when the entry is missing or
    /// has no renderable body.
    fn create_document(&self, index: usize) -> Result<Option<ParsedChapter>, BookError> {
        let Some(chapter) = self.section(index) else {
            return Ok(None);
        };
        let Some(markup) = self.load_text(&chapter.href)? else {
            return Ok(None);
        };
        Ok(ParsedChapter::parse(&markup))
    }
}

/// A book whose archive entries are already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBook {
    metadata: BookMetadata,
    sections: Vec<Chapter>,
    toc: Vec<TocEntry>,
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryBook {
    pub fn new(title: &str) -> Self {
        MemoryBook {
            metadata: BookMetadata {
                title: Some(title.to_string()),
                ..BookMetadata::default()
            },
            ..MemoryBook::default()
        }
    }

    pub fn with_metadata(mut self, metadata: BookMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_entry(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(path.to_string(), bytes.into());
        self
    }

    /// Append a spine section backed by `markup` and list it in the toc.
    pub fn with_chapter(mut self, id: &str, href: &str, markup: &str) -> Self {
        self.sections.push(Chapter {
            id: id.to_string(),
            href: href.to_string(),
        });
        self.toc.push(TocEntry {
            label: id.to_string(),
            href: href.to_string(),
            children: Vec::new(),
        });
        self.entries
            .insert(href.to_string(), markup.as_bytes().to_vec());
        self
    }
}

impl Book for MemoryBook {
    fn metadata(&self) -> &BookMetadata {
        &self.metadata
    }

    fn sections(&self) -> &[Chapter] {
        &self.sections
    }

    fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    fn load_blob(&self, path: &str) -> Result<Option<Vec<u8>>, BookError> {
        Ok(self.entries.get(path).cloned())
    }

    fn cover(&self) -> Result<Option<Vec<u8>>, BookError> {
        match &self.metadata.cover {
            Some(path) => self.load_blob(path),
            None => Ok(None),
        }
    }
}
