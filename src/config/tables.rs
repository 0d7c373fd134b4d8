use super::defaults::CONFIG_VERSION;
use super::models::{LogLevel, ReaderConfig};
use crate::excerpts::StorageMode;
use serde::Deserialize;
use tracing::{debug, warn};

/// The on-disk shape of `config.toml`. Every field is optional so a
/// partial or older file can be merged over the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
pub struct ConfigTables {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    appearance: AppearanceConfig,
    #[serde(default)]
    reading: ReadingConfig,
    #[serde(default)]
    excerpts: ExcerptConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    storage: StorageConfig,
}

/// Fill every field `stored` leaves unset from `defaults`.
pub fn merge_defaults(stored: &ConfigTables, defaults: &ReaderConfig) -> ReaderConfig {
    match stored.version {
        Some(version) if version > CONFIG_VERSION => warn!(
            version,
            supported = CONFIG_VERSION,
            "Config was written by a newer release; unknown fields are ignored"
        ),
        Some(version) if version < CONFIG_VERSION => {
            debug!(version, current = CONFIG_VERSION, "Upgrading config to current version")
        }
        None => debug!("Config has no version; assuming current"),
        Some(_) => {}
    }

    let appearance = &stored.appearance;
    let reading = &stored.reading;
    let excerpts = &stored.excerpts;
    ReaderConfig {
        version: CONFIG_VERSION,
        font_size: appearance.font_size.unwrap_or(defaults.font_size),
        line_height: appearance.line_height.unwrap_or(defaults.line_height),
        page_width: appearance.page_width.unwrap_or(defaults.page_width),
        prefer_book_font: appearance.prefer_book_font.unwrap_or(defaults.prefer_book_font),
        max_recent_books: reading.max_recent_books.unwrap_or(defaults.max_recent_books),
        auto_save_progress: reading.auto_save_progress.unwrap_or(defaults.auto_save_progress),
        excerpt_storage_mode: excerpts.storage_mode.unwrap_or(defaults.excerpt_storage_mode),
        excerpt_success_notification: excerpts
            .success_notification
            .unwrap_or(defaults.excerpt_success_notification),
        single_excerpt_path: excerpts
            .single_excerpt_path
            .clone()
            .unwrap_or_else(|| defaults.single_excerpt_path.clone()),
        log_level: stored.logging.log_level.unwrap_or(defaults.log_level),
        data_dir: stored
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(|| defaults.data_dir.clone()),
    }
}

impl From<&ReaderConfig> for ConfigTables {
    fn from(config: &ReaderConfig) -> Self {
        ConfigTables {
            version: Some(CONFIG_VERSION),
            appearance: AppearanceConfig {
                font_size: Some(config.font_size),
                line_height: Some(config.line_height),
                page_width: Some(config.page_width),
                prefer_book_font: Some(config.prefer_book_font),
            },
            reading: ReadingConfig {
                max_recent_books: Some(config.max_recent_books),
                auto_save_progress: Some(config.auto_save_progress),
            },
            excerpts: ExcerptConfig {
                storage_mode: Some(config.excerpt_storage_mode),
                success_notification: Some(config.excerpt_success_notification),
                single_excerpt_path: Some(config.single_excerpt_path.clone()),
            },
            logging: LoggingConfig {
                log_level: Some(config.log_level),
            },
            storage: StorageConfig {
                data_dir: Some(config.data_dir.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
struct AppearanceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line_height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefer_book_font: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
struct ReadingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_recent_books: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auto_save_progress: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
struct ExcerptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_mode: Option<StorageMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    success_notification: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    single_excerpt_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_dir: Option<String>,
}
