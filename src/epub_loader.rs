//! EPUB loading through the `epub` crate.
//!
//! The archive handle is opened once and kept behind a mutex: `EpubDoc`
//! needs `&mut self` for every read, while the renderer only holds a shared
//! `&dyn Book`. Spine, metadata and toc are snapshotted at open time.

use crate::book::{Book, BookMetadata, Chapter, TocEntry};
use crate::error::BookError;
use crate::object_urls::{data_url, guess_mime};
use epub::doc::{EpubDoc, NavPoint};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub struct EpubBook {
    doc: Mutex<EpubDoc<BufReader<File>>>,
    source: PathBuf,
    metadata: BookMetadata,
    sections: Vec<Chapter>,
    toc: Vec<TocEntry>,
}

/// Open the EPUB at `path`. Failure leaves no partially loaded book.
pub fn open_book(path: &Path) -> Result<EpubBook, BookError> {
    if !is_epub(path) {
        warn!(path = %path.display(), "File does not carry an .epub extension");
    }
    info!(path = %path.display(), "Opening EPUB");
    let mut doc = EpubDoc::new(path).map_err(|err| BookError::Open {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;

    let sections = read_spine(&mut doc);
    if sections.is_empty() {
        return Err(BookError::Open {
            path: path.display().to_string(),
            reason: "spine is empty".to_string(),
        });
    }
    let metadata = read_metadata(&doc);
    let toc = doc.toc.iter().map(toc_entry).collect::<Vec<_>>();

    info!(
        path = %path.display(),
        sections = sections.len(),
        toc_entries = toc.len(),
        title = metadata.title.as_deref().unwrap_or(""),
        "Opened EPUB"
    );
    Ok(EpubBook {
        doc: Mutex::new(doc),
        source: path.to_path_buf(),
        metadata,
        sections,
        toc,
    })
}

impl EpubBook {
    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl std::fmt::Debug for EpubBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpubBook")
            .field("source", &self.source)
            .field("sections", &self.sections.len())
            .finish()
    }
}

impl Book for EpubBook {
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
        let mut doc = self.doc.lock().map_err(|_| BookError::Poisoned)?;
        let bytes = doc.get_resource_by_path(path);
        if bytes.is_none() {
            debug!(%path, "Archive entry not found");
        }
        Ok(bytes)
    }

    fn cover(&self) -> Result<Option<Vec<u8>>, BookError> {
        let mut doc = self.doc.lock().map_err(|_| BookError::Poisoned)?;
        Ok(doc.get_cover().map(|(bytes, _mime)| bytes))
    }
}

/// The cover as a `data:` URL, for progress records and history lists.
pub fn cover_data_url<B: Book + ?Sized>(book: &B) -> Option<String> {
    match book.cover() {
        Ok(Some(bytes)) => {
            let hint = book.metadata().cover.as_deref().unwrap_or("");
            Some(data_url(&guess_mime(hint, &bytes), &bytes))
        }
        Ok(None) => None,
        Err(err) => {
            warn!("Failed to read cover image: {err}");
            None
        }
    }
}

fn read_spine(doc: &mut EpubDoc<BufReader<File>>) -> Vec<Chapter> {
    let mut sections = Vec::new();
    loop {
        if let (Some(path), Some(id)) = (doc.get_current_path(), doc.get_current_id()) {
            sections.push(Chapter {
                id,
                href: archive_path(&path),
            });
        }
        if !doc.go_next() {
            break;
        }
    }
    debug!(sections = sections.len(), "Read spine");
    sections
}

fn read_metadata(doc: &EpubDoc<BufReader<File>>) -> BookMetadata {
    let single = |name: &str| {
        doc.mdata(name)
            .map(|item| item.value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let all = |name: &str| {
        doc.metadata
            .iter()
            .filter(|item| item.property == name)
            .map(|item| item.value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
    };
    let cover = doc
        .get_cover_id()
        .and_then(|id| doc.resources.get(&id).map(|item| archive_path(&item.path)));

    BookMetadata {
        title: single("title"),
        authors: all("creator"),
        language: single("language"),
        publisher: single("publisher"),
        description: single("description"),
        subjects: all("subject"),
        identifier: single("identifier"),
        date: single("date"),
        cover,
    }
}

fn toc_entry(point: &NavPoint) -> TocEntry {
    TocEntry {
        label: point.label.trim().to_string(),
        href: archive_path(&point.content),
        children: point.children.iter().map(toc_entry).collect(),
    }
}

/// Archive entries are always `/`-separated, whatever the host platform.
fn archive_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_epub(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase()),
        Some(ext) if ext == "epub"
    )
}
