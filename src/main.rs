//! Command-line front end: render one chapter of an EPUB to a standalone
//! HTML file.
//!
//! The current directory acts as the vault, so excerpt notes next to the
//! book are highlighted and reading progress is remembered between runs.

use anyhow::{Context, Result, anyhow};
use chapterlight::config::load_config;
use chapterlight::epub_loader::open_book;
use chapterlight::navigation::{Reader, Screen};
use chapterlight::pipeline::RenderOutcome;
use chapterlight::progress::ProgressStore;
use chapterlight::vault::FsVault;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const USAGE: &str = "Usage: chapterlight <book.epub> [chapter] [--out <file.html>]";

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

#[derive(Debug)]
struct Args {
    epub_path: PathBuf,
    chapter: Option<usize>,
    out: Option<PathBuf>,
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = load_config(Path::new("conf/config.toml"));
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %args.epub_path.display(),
        level = %config.log_level,
        mode = %config.excerpt_storage_mode,
        "Starting chapter render"
    );

    let book = open_book(&args.epub_path)
        .with_context(|| format!("Failed to open {}", args.epub_path.display()))?;
    let progress = ProgressStore::load(Path::new(&config.data_dir), config.max_recent_books);
    let vault = Arc::new(FsVault::new(env::current_dir().context("No working directory")?));
    let book_path = vault_path(&args.epub_path);

    let mut reader = Reader::open(Box::new(book), &book_path, config, progress, vault);
    let outcome = match args.chapter {
        Some(chapter) => reader.go_to(chapter)?,
        None => reader.resume()?,
    };
    if let Some(notice) = reader.take_notice() {
        warn!(%notice, "Reader notice");
    }

    match outcome {
        RenderOutcome::Rendered {
            index,
            highlights,
            hidden_images,
        } => info!(chapter = index, highlights, hidden_images, "Chapter ready"),
        RenderOutcome::Failed { index, notice } => {
            reader.on_teardown();
            return Err(anyhow!("Chapter {index} could not be rendered: {notice}"));
        }
        RenderOutcome::Superseded { index } => {
            warn!(chapter = index, "Render was superseded");
        }
    }

    let html = reader.snapshot().context("Failed to export chapter")?;
    let out = args.out.unwrap_or_else(|| {
        PathBuf::from(format!("{}-{}.html", chapterlight::vault::basename(&book_path), reader.current() + 1))
    });
    fs::write(&out, html).with_context(|| format!("Failed to write {}", out.display()))?;
    info!(path = %out.display(), title = %reader.title(), "Wrote chapter snapshot");
    reader.on_teardown();
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let epub_path = args.next().map(PathBuf::from).ok_or_else(|| anyhow!(USAGE))?;
    if !epub_path.exists() {
        return Err(anyhow!("File not found: {}", epub_path.display()));
    }
    let mut chapter = None;
    let mut out = None;
    while let Some(arg) = args.next() {
        if arg == "--out" {
            let path = args.next().ok_or_else(|| anyhow!(USAGE))?;
            out = Some(PathBuf::from(path));
        } else {
            let number: usize = arg
                .parse()
                .map_err(|_| anyhow!("Chapter must be a number starting at 1\n{USAGE}"))?;
            chapter = Some(number.checked_sub(1).ok_or_else(|| anyhow!(USAGE))?);
        }
    }
    Ok(Args {
        epub_path,
        chapter,
        out,
    })
}

/// The book's path as the vault sees it: relative to the working directory
/// when possible, `/`-separated.
fn vault_path(epub_path: &Path) -> String {
    let relative = env::current_dir()
        .ok()
        .and_then(|cwd| epub_path.strip_prefix(&cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| epub_path.to_path_buf());
    relative
        .to_string_lossy()
        .trim_start_matches("./")
        .replace('\\', "/")
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!("RUST_LOG is set; keeping its filter");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
