use crate::excerpts::StorageMode;
use serde::Deserialize;
use tracing::warn;

/// Reader settings, flattened out of the config tables.
/// Only `ConfigTables` is read from or written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    pub version: u32,
    pub font_size: u32,
    pub line_height: f32,
    pub page_width: u32,
    /// Embed the book's own fonts and let them win over the reader font.
    pub prefer_book_font: bool,
    pub max_recent_books: usize,
    pub auto_save_progress: bool,
    pub excerpt_storage_mode: StorageMode,
    pub excerpt_success_notification: bool,
    pub single_excerpt_path: String,
    pub log_level: LogLevel,
    pub data_dir: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            version: crate::config::defaults::default_version(),
            font_size: crate::config::defaults::default_font_size(),
            line_height: crate::config::defaults::default_line_height(),
            page_width: crate::config::defaults::default_page_width(),
            prefer_book_font: crate::config::defaults::default_prefer_book_font(),
            max_recent_books: crate::config::defaults::default_max_recent_books(),
            auto_save_progress: crate::config::defaults::default_auto_save_progress(),
            excerpt_storage_mode: crate::config::defaults::default_storage_mode(),
            excerpt_success_notification: crate::config::defaults::default_success_notification(),
            single_excerpt_path: crate::config::defaults::default_single_excerpt_path(),
            log_level: crate::config::defaults::default_log_level(),
            data_dir: crate::config::defaults::default_data_dir(),
        }
    }
}

impl ReaderConfig {
    /// Clamp values a hand-edited file may have pushed out of range.
    pub fn normalized(mut self) -> Self {
        let clamped_font = self.font_size.clamp(8, 72);
        if clamped_font != self.font_size {
            warn!(font_size = self.font_size, "Clamping font size");
            self.font_size = clamped_font;
        }
        if !self.line_height.is_finite() || !(1.0..=3.0).contains(&self.line_height) {
            warn!(line_height = self.line_height, "Resetting line height");
            self.line_height = crate::config::defaults::default_line_height();
        }
        let clamped_width = self.page_width.clamp(320, 2400);
        if clamped_width != self.page_width {
            warn!(page_width = self.page_width, "Clamping page width");
            self.page_width = clamped_width;
        }
        if self.max_recent_books == 0 {
            warn!("max_recent_books must be at least 1");
            self.max_recent_books = 1;
        }
        self
    }

    /// Reader-side rules applied around the scoped book styles.
    pub fn reader_css(&self) -> String {
        format!(
            "{scope} {{ font-size: {size}px; line-height: {height}; max-width: {width}px; margin: 0 auto; }}\n\
             {scope} .{highlight} {{ background-color: rgba(255, 213, 79, 0.45); cursor: pointer; }}",
            scope = crate::stylesheet::SCOPE_SELECTOR,
            size = self.font_size,
            height = self.line_height,
            width = self.page_width,
            highlight = crate::highlight::HIGHLIGHT_CLASS,
        )
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
