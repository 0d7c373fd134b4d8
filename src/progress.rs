//! Reading progress per book, persisted as a small JSON list.
//!
//! Records are keyed by the book's path and kept most-recent-first. The
//! list is capped at `max_recent_books`; the least recently read book is
//! dropped first.

use crate::book::BookMetadata;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const PROGRESS_FILE: &str = "recent_books.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub file_path: String,
    pub file_name: String,
    pub section_index: usize,
    #[serde(default)]
    pub scroll_position: f64,
    /// Milliseconds since the Unix epoch.
    pub last_read: u64,
    #[serde(default)]
    pub total_sections: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BookMetadata>,
}

impl ReadingProgress {
    pub fn new(file_path: &str, section_index: usize, total_sections: usize) -> Self {
        let file_name = file_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(file_path)
            .to_string();
        ReadingProgress {
            file_path: file_path.to_string(),
            file_name,
            section_index,
            scroll_position: 0.0,
            last_read: now_millis(),
            total_sections,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: BookMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Share of the book reached, counting the current section as read.
    pub fn percent(&self) -> f32 {
        if self.total_sections == 0 {
            return 0.0;
        }
        let reached = (self.section_index + 1).min(self.total_sections);
        reached as f32 * 100.0 / self.total_sections as f32
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    records: Vec<ReadingProgress>,
    max_recent: usize,
    path: Option<PathBuf>,
}

impl ProgressStore {
    /// Load `<data_dir>/recent_books.json`. A missing or corrupt file
    /// starts an empty list rather than failing the reader.
    pub fn load(data_dir: &Path, max_recent: usize) -> Self {
        let path = data_dir.join(PROGRESS_FILE);
        let records = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Vec<ReadingProgress>>(&data) {
                Ok(records) => {
                    info!(path = %path.display(), count = records.len(), "Loaded reading progress");
                    records
                }
                Err(err) => {
                    warn!(path = %path.display(), "Ignoring corrupt progress file: {err}");
                    Vec::new()
                }
            },
            Err(err) => {
                debug!(path = %path.display(), "No progress file yet: {err}");
                Vec::new()
            }
        };
        let mut store = ProgressStore {
            records,
            max_recent: max_recent.max(1),
            path: Some(path),
        };
        store.sort_and_cap();
        store
    }

    /// A store that never touches the disk.
    pub fn in_memory(max_recent: usize) -> Self {
        ProgressStore {
            records: Vec::new(),
            max_recent: max_recent.max(1),
            path: None,
        }
    }

    /// Insert or replace the record for `progress.file_path`. Metadata the
    /// new record lacks is kept from the stored one.
    pub fn upsert(&mut self, mut progress: ReadingProgress) {
        if let Some(pos) = self
            .records
            .iter()
            .position(|record| record.file_path == progress.file_path)
        {
            let previous = self.records.remove(pos);
            progress.metadata = match (previous.metadata, progress.metadata.take()) {
                (Some(mut stored), Some(incoming)) => {
                    stored.merge(&incoming);
                    Some(stored)
                }
                (stored, incoming) => incoming.or(stored),
            };
        }
        debug!(
            path = %progress.file_path,
            section = progress.section_index,
            "Recorded reading progress"
        );
        // Ahead of equal timestamps, so the stable sort keeps it on a tie.
        self.records.insert(0, progress);
        self.sort_and_cap();
    }

    pub fn get(&self, file_path: &str) -> Option<&ReadingProgress> {
        self.records.iter().find(|record| record.file_path == file_path)
    }

    /// Most recently read first.
    pub fn recent(&self) -> &[ReadingProgress] {
        &self.records
    }

    /// Follow a book that moved within the vault. A stale record already
    /// at `new_path` is replaced by the moved one.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> bool {
        if self.get(old_path).is_none() {
            return false;
        }
        if old_path != new_path {
            self.records.retain(|record| record.file_path != new_path);
        }
        if let Some(record) = self.records.iter_mut().find(|r| r.file_path == old_path) {
            record.file_path = new_path.to_string();
            record.file_name = new_path
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(new_path)
                .to_string();
        }
        true
    }

    /// Drop records last read before `cutoff_millis`. Returns how many.
    pub fn cleanup_older_than(&mut self, cutoff_millis: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|record| record.last_read >= cutoff_millis);
        before - self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn set_max_recent(&mut self, max_recent: usize) {
        self.max_recent = max_recent.max(1);
        self.sort_and_cap();
    }

    /// Write the list atomically next to its final location.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents =
            serde_json::to_string_pretty(&self.records).context("Failed to serialize progress")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!(path = %path.display(), count = self.records.len(), "Saved reading progress");
        Ok(())
    }

    fn sort_and_cap(&mut self) {
        self.records.sort_by(|a, b| b.last_read.cmp(&a.last_read));
        if self.records.len() > self.max_recent {
            for evicted in &self.records[self.max_recent..] {
                debug!(path = %evicted.file_path, "Evicting least recent book");
            }
            self.records.truncate(self.max_recent);
        }
    }
}
