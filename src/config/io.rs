use super::models::ReaderConfig;
use super::tables::{ConfigTables, merge_defaults};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load the config at `path`, falling back to defaults on any problem.
pub fn load_config(path: &Path) -> ReaderConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return ReaderConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err:#}");
            ReaderConfig::default()
        }
    }
}

pub fn parse_config(contents: &str) -> Result<ReaderConfig> {
    let stored: ConfigTables = toml::from_str(contents).context("Failed to parse config tables")?;
    Ok(merge_defaults(&stored, &ReaderConfig::default()).normalized())
}

pub fn serialize_config(config: &ReaderConfig) -> Result<String> {
    toml::to_string_pretty(&ConfigTables::from(config)).context("Failed to serialize config")
}

pub fn save_config(path: &Path, config: &ReaderConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let contents = serialize_config(config)?;
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Saved config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONFIG_VERSION, LogLevel};
    use crate::excerpts::StorageMode;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn partial_tables_merge_over_defaults() {
        let cfg = parse_config(
            r#"
            version = 0

            [appearance]
            font_size = 20
            prefer_book_font = true

            [excerpts]
            storage_mode = "per-book"

            [logging]
            log_level = "debug"
            "#,
        )
        .expect("parse config");

        let defaults = ReaderConfig::default();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.font_size, 20);
        assert!(cfg.prefer_book_font);
        assert_eq!(cfg.excerpt_storage_mode, StorageMode::PerBook);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.line_height, defaults.line_height);
        assert_eq!(cfg.max_recent_books, defaults.max_recent_books);
        assert_eq!(cfg.single_excerpt_path, defaults.single_excerpt_path);
    }

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_config("").expect("parse empty"), ReaderConfig::default());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = parse_config(
            "[appearance]\nfont_size = 400\nline_height = 0.2\n[reading]\nmax_recent_books = 0\n",
        )
        .expect("parse config");
        assert_eq!(cfg.font_size, 72);
        assert_eq!(cfg.line_height, ReaderConfig::default().line_height);
        assert_eq!(cfg.max_recent_books, 1);
    }

    #[test]
    fn only_tabled_keys_are_read() {
        let cfg = parse_config("font_size = 30\n[appearance]\nline_height = 2.0\n").expect("parse config");
        assert_eq!(cfg.font_size, ReaderConfig::default().font_size);
        assert_eq!(cfg.line_height, 2.0);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(parse_config("[excerpts]\nstorage_mode = \"carrier-pigeon\"\n").is_err());
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("chapterlight-config-{nonce}/config.toml"));
        let cfg = ReaderConfig {
            font_size: 18,
            excerpt_storage_mode: StorageMode::SingleNote,
            single_excerpt_path: "Notes/all.md".to_string(),
            data_dir: "state".to_string(),
            ..ReaderConfig::default()
        };

        save_config(&path, &cfg).expect("save config");
        assert_eq!(load_config(&path), cfg);
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Path::new("/definitely/not/here/config.toml"));
        assert_eq!(cfg, ReaderConfig::default());
    }
}
