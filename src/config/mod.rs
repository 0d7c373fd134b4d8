//! Configuration loading for the chapter renderer.
//!
//! Settings live in `conf/config.toml`, grouped into tables. Anything
//! missing or invalid falls back to the defaults so a book can always be
//! opened.

mod defaults;
mod io;
mod models;
mod tables;

pub use defaults::CONFIG_VERSION;
pub use io::{load_config, parse_config, save_config, serialize_config};
pub use models::{LogLevel, ReaderConfig};
pub use tables::{ConfigTables, merge_defaults};
