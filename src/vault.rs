//! Host file I/O for excerpt notes.
//!
//! Paths are vault-relative and `/`-separated, the way notes link to one
//! another. `FsVault` maps them onto a directory on disk.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const TRASH_DIR: &str = ".trash";

pub trait Vault: Send + Sync {
    fn read(&self, path: &str) -> Result<Option<String>>;

    fn exists(&self, path: &str) -> bool;

    /// Create a new file, creating parent folders as needed. Fails if the
    /// file already exists.
    fn create(&self, path: &str, contents: &str) -> Result<()>;

    /// Append to a file, creating it when missing.
    fn append(&self, path: &str, contents: &str) -> Result<()>;

    /// Files directly inside `dir`, sorted by path.
    fn list_files(&self, dir: &str) -> Result<Vec<String>>;

    /// Move a file out of the way without destroying it.
    fn trash(&self, path: &str) -> Result<()>;
}

/// Directory of `path`, or `""` at the vault root.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// File name without its final extension.
pub fn basename(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Join a folder and a name, skipping the separator at the root.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsVault { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Vault path escapes the vault: {path}");
        }
        Ok(self.root.join(relative))
    }

    fn ensure_parent(full: &Path) -> Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create folder {}", parent.display()))?;
        }
        Ok(())
    }
}

impl Vault for FsVault {
    fn read(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Ok(None);
        }
        let data = fs::read_to_string(&full)
            .with_context(|| format!("Failed to read {}", full.display()))?;
        Ok(Some(data))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|full| full.exists()).unwrap_or(false)
    }

    fn create(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .with_context(|| format!("Failed to create {}", full.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to write {}", full.display()))?;
        debug!(path = %full.display(), "Created vault file");
        Ok(())
    }

    fn append(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&full)
            .with_context(|| format!("Failed to open {} for append", full.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to append to {}", full.display()))?;
        Ok(())
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let full = self.resolve(dir)?;
        if !full.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&full).with_context(|| format!("Failed to list {}", full.display()))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(join(dir, name));
            }
        }
        files.sort();
        Ok(files)
    }

    fn trash(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        let name = full
            .file_name()
            .with_context(|| format!("Not a file path: {path}"))?;
        let target = self.root.join(TRASH_DIR).join(name);
        Self::ensure_parent(&target)?;
        fs::rename(&full, &target)
            .with_context(|| format!("Failed to move {} to trash", full.display()))?;
        debug!(from = %full.display(), to = %target.display(), "Trashed vault file");
        Ok(())
    }
}
