use super::markdown::{callout_entry, daily_entry, note_document};
use super::{ExcerptStore, StorageMode};
use crate::error::Notice;
use crate::vault;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

static SINGLE_EXCERPT_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\sexcerpt\s\d{8}-\d{6}\.md$").unwrap());

/// Where a new excerpt landed and what to tell the user about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcerptWrite {
    pub path: String,
    pub notice: Notice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The file also holds other excerpts and was left alone.
    HighlightOnly,
    Deleted,
    NotFound,
}

impl DeleteOutcome {
    pub fn notice(&self) -> Notice {
        match self {
            DeleteOutcome::HighlightOnly => Notice::HighlightRemovedOnly,
            DeleteOutcome::Deleted => Notice::ExcerptFileDeleted,
            DeleteOutcome::NotFound => Notice::ExcerptFileNotFound,
        }
    }
}

/// Files written by the per-note layout, one excerpt each.
pub fn is_single_excerpt_note(path: &str) -> bool {
    SINGLE_EXCERPT_NOTE.is_match(path)
}

impl ExcerptStore {
    /// Write `text` as an excerpt of the zero-based `chapter_index`.
    pub fn create<Tz>(&self, text: &str, chapter_index: usize, now: &DateTime<Tz>) -> Result<ExcerptWrite>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let text = text.trim();
        if text.is_empty() {
            bail!("Refusing to write an empty excerpt");
        }
        let section = chapter_index + 1;
        let title = self.book.title.as_str();
        let stamp = now.format("%Y-%m-%d %H:%M").to_string();

        let written = match self.mode {
            StorageMode::PerNote => {
                let name = format!(
                    "{} excerpt {}.md",
                    self.book.basename(),
                    now.format("%Y%m%d-%H%M%S")
                );
                let path = vault::join(&self.per_note_folder(), &name);
                let body = note_document(title, section, &stamp, self.book.basename(), text);
                self.vault
                    .create(&path, &body)
                    .with_context(|| format!("Failed to create excerpt note {path}"))?;
                ExcerptWrite {
                    path,
                    notice: Notice::ExcerptCreated,
                }
            }
            StorageMode::PerBook => self.append_callout(self.per_book_path(), title, section, &stamp, text)?,
            StorageMode::SingleNote => {
                self.append_callout(self.single_note_path.clone(), title, section, &stamp, text)?
            }
            StorageMode::DailyNote => {
                let path = format!("{}.md", now.format("%Y-%m-%d"));
                let existed = self.vault.exists(&path);
                let entry = daily_entry(&now.format("%H:%M").to_string(), title, section, text);
                self.vault
                    .append(&path, &entry)
                    .with_context(|| format!("Failed to append to daily note {path}"))?;
                ExcerptWrite {
                    path,
                    notice: if existed {
                        Notice::ExcerptAppended
                    } else {
                        Notice::ExcerptCreated
                    },
                }
            }
        };
        info!(mode = %self.mode, path = %written.path, section, "Wrote excerpt");
        Ok(written)
    }

    fn append_callout(&self, path: String, title: &str, section: usize, stamp: &str, text: &str) -> Result<ExcerptWrite> {
        let existed = self.vault.exists(&path);
        let entry = callout_entry(title, section, stamp, text);
        let entry = if existed { entry } else { format!("{}\n", entry.trim_start()) };
        self.vault
            .append(&path, &entry)
            .with_context(|| format!("Failed to append excerpt to {path}"))?;
        Ok(ExcerptWrite {
            path,
            notice: if existed {
                Notice::ExcerptAppended
            } else {
                Notice::ExcerptCreated
            },
        })
    }

    /// Trash the note behind a highlight when it holds nothing else.
    pub fn delete_source(&self, path: &str) -> Result<DeleteOutcome> {
        if !is_single_excerpt_note(path) {
            return Ok(DeleteOutcome::HighlightOnly);
        }
        if !self.vault.exists(path) {
            return Ok(DeleteOutcome::NotFound);
        }
        self.vault
            .trash(path)
            .with_context(|| format!("Failed to delete excerpt note {path}"))?;
        info!(%path, "Deleted excerpt note");
        Ok(DeleteOutcome::Deleted)
    }

    /// Note text without front matter, for copying out of the reader.
    pub fn read_body(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .vault
            .read(path)?
            .map(|content| super::strip_front_matter(&content).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excerpts::BookContext;
    use crate::vault::Vault;
    use crate::vault::tests::temp_vault;
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .expect("valid timestamp")
            .and_utc()
    }

    fn store(vault: Arc<dyn Vault>, mode: StorageMode) -> ExcerptStore {
        ExcerptStore::new(vault, mode, "", BookContext::new("Books/emma.epub", Some("Emma")))
    }

    #[test]
    fn single_excerpt_notes_are_recognized_by_name() {
        assert!(is_single_excerpt_note("Books/emma/emma excerpt 20260314-101500.md"));
        assert!(is_single_excerpt_note("emma EXCERPT 20260314-101500.md"));
        assert!(!is_single_excerpt_note("Books/emma.md"));
        assert!(!is_single_excerpt_note("_chapterlight_excerpts.md"));
    }

    #[test]
    fn per_note_writes_a_file_that_reads_back() {
        let fs_vault = temp_vault("write-note");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        let store = store(vault, StorageMode::PerNote);

        let written = store
            .create("  Badly done, Emma!  ", 4, &at(10, 15, 0))
            .expect("create note");
        assert_eq!(written.path, "Books/emma/emma excerpt 20260314-101500.md");
        assert_eq!(written.notice, Notice::ExcerptCreated);

        let records = store.collect_for_chapter(4).expect("collect");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].excerpt_text, "Badly done, Emma!");
        assert_eq!(records[0].source_file.as_deref(), Some(written.path.as_str()));
        assert_eq!(
            store.read_body(&written.path).expect("read body").as_deref(),
            Some("Badly done, Emma!\n\n> Emma · section 5 #excerpt/Emma\n")
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn callout_layouts_create_then_append() {
        let fs_vault = temp_vault("write-callout");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        for mode in [StorageMode::PerBook, StorageMode::SingleNote] {
            let store = store(Arc::clone(&vault), mode);
            let first = store.create("first", 0, &at(9, 0, 0)).expect("first write");
            let second = store.create("second\nline", 0, &at(9, 5, 0)).expect("second write");
            assert_eq!(first.path, second.path);
            assert_eq!(first.notice, Notice::ExcerptCreated);
            assert_eq!(second.notice, Notice::ExcerptAppended);

            let texts: Vec<String> = store
                .collect_for_chapter(0)
                .expect("collect")
                .into_iter()
                .map(|record| record.excerpt_text)
                .collect();
            assert_eq!(texts, vec!["first", "second", "line"], "{mode}");
        }
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn daily_notes_are_appended_but_not_read_back() {
        let fs_vault = temp_vault("write-daily");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        let store = store(Arc::clone(&vault), StorageMode::DailyNote);

        let written = store.create("a thought", 2, &at(21, 30, 0)).expect("daily write");
        assert_eq!(written.path, "2026-03-14.md");
        let content = vault.read(&written.path).expect("read").expect("daily note exists");
        assert!(content.contains("- 21:30 a thought"));
        assert!(store.collect_for_chapter(2).expect("collect").is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn delete_only_trashes_single_excerpt_notes() {
        let fs_vault = temp_vault("delete");
        let root = fs_vault.root().to_path_buf();
        let vault: Arc<dyn Vault> = Arc::new(fs_vault);
        let per_note = store(Arc::clone(&vault), StorageMode::PerNote);
        let written = per_note.create("gone soon", 0, &at(8, 0, 0)).expect("create");

        assert_eq!(per_note.delete_source(&written.path).expect("delete"), DeleteOutcome::Deleted);
        assert!(!vault.exists(&written.path));
        assert_eq!(
            per_note.delete_source(&written.path).expect("delete again"),
            DeleteOutcome::NotFound
        );

        let per_book = store(Arc::clone(&vault), StorageMode::PerBook);
        let shared = per_book.create("kept", 0, &at(8, 1, 0)).expect("create");
        assert_eq!(
            per_book.delete_source(&shared.path).expect("delete"),
            DeleteOutcome::HighlightOnly
        );
        assert!(vault.exists(&shared.path));
        let _ = std::fs::remove_dir_all(root);
    }
}
