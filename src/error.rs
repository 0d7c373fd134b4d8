//! Error taxonomy for book loading, rendering and excerpt handling.
//!
//! Only archive-open failures are fatal to a book. Everything else is
//! recovered at the narrowest scope that still leaves the reader usable;
//! these types exist so callers can tell those scopes apart in logs.

use thiserror::Error;

/// Failures while opening or reading an EPUB archive.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("failed to open EPUB at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("archive entry is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("archive handle is poisoned")]
    Poisoned,
}

/// Failures inside one chapter render pass.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("chapter {0} does not exist")]
    MissingChapter(usize),

    #[error("chapter {0} has no parseable body")]
    Unparseable(usize),

    #[error("render superseded at stage={stage}")]
    Superseded { stage: &'static str },

    #[error(transparent)]
    Book(#[from] BookError),
}

impl RenderError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, RenderError::Superseded { .. })
    }
}

/// Requests the navigation state machine refuses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("chapter {requested} is out of range for a book with {total} chapters")]
    OutOfRange { requested: usize, total: usize },
}

/// Failures when mutating the chapter document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0} is not a text node")]
    NotText(usize),

    #[error("node {0} is detached from the document")]
    Detached(usize),

    #[error("range {start}..{end} is out of bounds for a text of length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("range {start}..{end} does not fall on character boundaries")]
    NotCharBoundary { start: usize, end: usize },
}

/// Short, user-facing notices. Diagnostics stay in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Loading,
    CannotParseChapter,
    FailedToLoad,
    ExcerptCreated,
    ExcerptAppended,
    FailedToWriteExcerpt,
    ExcerptFileNotFound,
    HighlightRemovedOnly,
    ExcerptFileDeleted,
    ExportFailed,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Notice::Loading => "Loading...",
            Notice::CannotParseChapter => "Cannot parse chapter content",
            Notice::FailedToLoad => "Failed to load chapter",
            Notice::ExcerptCreated => "Created excerpt",
            Notice::ExcerptAppended => "Appended excerpt",
            Notice::FailedToWriteExcerpt => "Failed to write excerpt",
            Notice::ExcerptFileNotFound => "Excerpt file not found",
            Notice::HighlightRemovedOnly => "Highlight removed; excerpt file kept",
            Notice::ExcerptFileDeleted => "Deleted excerpt file",
            Notice::ExportFailed => "Export failed",
        };
        write!(f, "{}", label)
    }
}
