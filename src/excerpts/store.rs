use super::markdown::{is_citation_footer, parse_callouts, split_front_matter};
use super::{BookContext, ExcerptRecord, StorageMode};
use crate::vault::{self, Vault};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads and writes the excerpt notes of one open book.
#[derive(Clone)]
pub struct ExcerptStore {
    pub(super) vault: Arc<dyn Vault>,
    pub(super) mode: StorageMode,
    pub(super) single_note_path: String,
    pub(super) book: BookContext,
}

impl ExcerptStore {
    pub fn new(vault: Arc<dyn Vault>, mode: StorageMode, single_note_path: &str, book: BookContext) -> Self {
        let single_note_path = if single_note_path.trim().is_empty() {
            super::DEFAULT_SINGLE_NOTE.to_string()
        } else {
            single_note_path.trim().to_string()
        };
        ExcerptStore {
            vault,
            mode,
            single_note_path,
            book,
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn book(&self) -> &BookContext {
        &self.book
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    /// Folder holding one file per excerpt.
    pub fn per_note_folder(&self) -> String {
        vault::join(self.book.dir(), self.book.basename())
    }

    /// The markdown file collecting every excerpt of this book.
    pub fn per_book_path(&self) -> String {
        vault::join(self.book.dir(), &format!("{}.md", self.book.basename()))
    }

    pub fn single_note_path(&self) -> &str {
        &self.single_note_path
    }

    /// Stored excerpts for the zero-based `chapter_index`.
    pub fn collect_for_chapter(&self, chapter_index: usize) -> Result<Vec<ExcerptRecord>> {
        let section = chapter_index + 1;
        let records = match self.mode {
            StorageMode::PerNote => self.from_note_files(section)?,
            StorageMode::PerBook => self.from_callouts(&self.per_book_path(), section, false)?,
            StorageMode::SingleNote => self.from_callouts(&self.single_note_path, section, true)?,
            StorageMode::DailyNote => Vec::new(),
        };
        debug!(
            mode = %self.mode,
            chapter = chapter_index,
            count = records.len(),
            "Collected excerpts for chapter"
        );
        Ok(records)
    }

    fn from_note_files(&self, section: usize) -> Result<Vec<ExcerptRecord>> {
        let mut folders = vec![vault::join(self.book.dir(), &self.book.title)];
        let by_basename = self.per_note_folder();
        if !folders.contains(&by_basename) {
            folders.push(by_basename);
        }

        let mut records = Vec::new();
        for folder in folders {
            for path in self.vault.list_files(&folder)? {
                if !path.ends_with(".md") {
                    continue;
                }
                let content = match self.vault.read(&path) {
                    Ok(Some(content)) => content,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%path, "Skipping unreadable excerpt note: {err:#}");
                        continue;
                    }
                };
                let (Some(front), body) = split_front_matter(&content) else {
                    continue;
                };
                let same_book = front.get("book") == Some(self.book.title.as_str());
                let same_section = front
                    .get("section")
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    == Some(section);
                if !same_book || !same_section {
                    continue;
                }
                records.extend(
                    body.lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty() && !is_citation_footer(line))
                        .map(|line| ExcerptRecord::new(line, path.clone())),
                );
            }
        }
        Ok(records)
    }

    fn from_callouts(&self, path: &str, section: usize, match_title: bool) -> Result<Vec<ExcerptRecord>> {
        let Some(content) = self.vault.read(path)? else {
            return Ok(Vec::new());
        };
        let records = parse_callouts(&content)
            .into_iter()
            .filter(|callout| callout.section == section)
            .filter(|callout| !match_title || callout.title == self.book.title)
            .flat_map(|callout| callout.lines)
            .map(|line| ExcerptRecord::new(line.trim(), path))
            .collect();
        Ok(records)
    }
}

impl std::fmt::Debug for ExcerptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExcerptStore")
            .field("mode", &self.mode)
            .field("single_note_path", &self.single_note_path)
            .field("book", &self.book)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excerpts::markdown::{callout_entry, note_document};
    use crate::vault::tests::temp_vault;

    fn store(vault: Arc<dyn Vault>, mode: StorageMode) -> ExcerptStore {
        ExcerptStore::new(
            vault,
            mode,
            "",
            BookContext::new("Books/walden-1854.epub", Some("Walden")),
        )
    }

    #[test]
    fn per_note_reads_matching_front_matter() {
        let fs_vault = temp_vault("per-note");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        vault
            .create(
                "Books/walden-1854/walden-1854 excerpt 20260102-093000.md",
                &note_document("Walden", 2, "2026-01-02 09:30", "walden-1854", "Simplify, simplify.\nTwice."),
            )
            .expect("write note");
        vault
            .create(
                "Books/walden-1854/walden-1854 excerpt 20260102-093100.md",
                &note_document("Walden", 3, "2026-01-02 09:31", "walden-1854", "Wrong section."),
            )
            .expect("write note");
        vault
            .create("Books/Walden/stray.md", "no front matter")
            .expect("write stray");

        let records = store(vault, StorageMode::PerNote)
            .collect_for_chapter(1)
            .expect("collect");
        let texts: Vec<&str> = records.iter().map(|r| r.excerpt_text.as_str()).collect();
        assert_eq!(texts, vec!["Simplify, simplify.", "Twice."]);
        assert_eq!(
            records[0].source_file.as_deref(),
            Some("Books/walden-1854/walden-1854 excerpt 20260102-093000.md")
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn per_note_keeps_excerpts_that_start_with_a_quote_mark() {
        let fs_vault = temp_vault("per-note-quote");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        vault
            .create(
                "Books/walden-1854/walden-1854 excerpt 20260102-093000.md",
                &note_document("Walden", 2, "2026-01-02 09:30", "walden-1854", "> I went to the woods"),
            )
            .expect("write note");

        let records = store(vault, StorageMode::PerNote)
            .collect_for_chapter(1)
            .expect("collect");
        let texts: Vec<&str> = records.iter().map(|r| r.excerpt_text.as_str()).collect();
        assert_eq!(texts, vec!["> I went to the woods"]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn per_book_reads_callouts_for_the_section() {
        let fs_vault = temp_vault("per-book");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        let mut content = callout_entry("Walden", 1, "2026-01-02 09:30", "first chapter");
        content.push_str(&callout_entry("Walden", 2, "2026-01-02 09:31", "second chapter"));
        vault.create("Books/walden-1854.md", &content).expect("write per-book note");

        let records = store(vault, StorageMode::PerBook)
            .collect_for_chapter(0)
            .expect("collect");
        assert_eq!(records, vec![ExcerptRecord::new("first chapter", "Books/walden-1854.md")]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn single_note_filters_by_title() {
        let fs_vault = temp_vault("single");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        let mut content = callout_entry("Walden", 1, "2026-01-02 09:30", "ours");
        content.push_str(&callout_entry("Emma", 1, "2026-01-02 09:31", "theirs"));
        vault
            .create(crate::excerpts::DEFAULT_SINGLE_NOTE, &content)
            .expect("write unified note");

        let records = store(vault, StorageMode::SingleNote)
            .collect_for_chapter(0)
            .expect("collect");
        let texts: Vec<&str> = records.iter().map(|r| r.excerpt_text.as_str()).collect();
        assert_eq!(texts, vec!["ours"]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn daily_notes_and_missing_files_yield_nothing() {
        let fs_vault = temp_vault("empty");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        for mode in [
            StorageMode::DailyNote,
            StorageMode::PerNote,
            StorageMode::PerBook,
            StorageMode::SingleNote,
        ] {
            let records = store(Arc::clone(&vault), mode)
                .collect_for_chapter(0)
                .expect("collect");
            assert!(records.is_empty(), "{mode} should be empty");
        }
        let _ = std::fs::remove_dir_all(root);
    }
}
