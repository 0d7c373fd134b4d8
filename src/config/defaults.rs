use crate::excerpts::{DEFAULT_SINGLE_NOTE, StorageMode};

/// Bumped whenever a field is added, renamed or changes meaning.
pub const CONFIG_VERSION: u32 = 1;

pub(crate) fn default_version() -> u32 {
    CONFIG_VERSION
}

pub(crate) fn default_font_size() -> u32 {
    16
}

pub(crate) fn default_line_height() -> f32 {
    1.6
}

pub(crate) fn default_page_width() -> u32 {
    800
}

pub(crate) fn default_prefer_book_font() -> bool {
    false
}

pub(crate) fn default_max_recent_books() -> usize {
    10
}

pub(crate) fn default_auto_save_progress() -> bool {
    true
}

pub(crate) fn default_storage_mode() -> StorageMode {
    StorageMode::PerNote
}

pub(crate) fn default_success_notification() -> bool {
    true
}

pub(crate) fn default_single_excerpt_path() -> String {
    DEFAULT_SINGLE_NOTE.to_string()
}

pub(crate) fn default_log_level() -> crate::config::LogLevel {
    crate::config::LogLevel::Info
}

pub(crate) fn default_data_dir() -> String {
    ".chapterlight".to_string()
}
