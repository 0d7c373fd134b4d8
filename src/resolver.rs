//! Archive-relative resource resolution.
//!
//! Chapters reference images, stylesheets and fonts relative to their own
//! location inside the archive. Books in the wild are sloppy about this, so
//! a miss on the computed path falls back to the folders where EPUB
//! authoring tools usually put images.

use crate::book::Book;
use percent_encoding::percent_decode_str;
use tracing::{debug, trace};

/// Folders probed, in order, when the computed path misses.
pub const FALLBACK_FOLDERS: [&str; 4] = ["Images/", "images/", "OEBPS/Images/", "OEBPS/images/"];

/// A reference that resolved to an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// References the host can load without an archive lookup.
pub fn is_direct_reference(reference: &str) -> bool {
    let reference = reference.trim();
    reference.starts_with("http") || reference.starts_with("blob:") || reference.starts_with("data:")
}

/// Directory portion of a chapter path: everything before the last `/`.
pub fn chapter_dir(chapter_base_path: &str) -> &str {
    chapter_base_path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("")
}

/// Strip fragment and query suffixes and decode percent escapes.
fn clean_reference(reference: &str) -> String {
    let reference = reference.trim();
    let reference = reference.split('#').next().unwrap_or(reference);
    let reference = reference.split('?').next().unwrap_or(reference);
    percent_decode_str(reference).decode_utf8_lossy().into_owned()
}

/// The path a reference points at when taken literally.
pub fn resolve_primary(reference: &str, chapter_base_path: &str) -> String {
    let reference = clean_reference(reference);
    if let Some(rooted) = reference.strip_prefix('/') {
        return rooted.to_string();
    }

    let dir = chapter_dir(chapter_base_path);
    if reference.starts_with("../") {
        let parts: Vec<&str> = reference.split('/').collect();
        let up_levels = parts.iter().take_while(|part| **part == "..").count();
        let dir_parts: Vec<&str> = if dir.is_empty() {
            Vec::new()
        } else {
            dir.split('/').collect()
        };
        let keep = dir_parts.len().saturating_sub(up_levels);
        dir_parts[..keep]
            .iter()
            .chain(parts[up_levels..].iter())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    } else if let Some(rest) = reference.strip_prefix("./") {
        if dir.is_empty() {
            rest.to_string()
        } else {
            format!("{dir}/{rest}")
        }
    } else if dir.is_empty() {
        reference
    } else {
        format!("{dir}/{reference}")
    }
}

/// Filename-only guesses under the usual image folders.
pub fn fallback_candidates(reference: &str) -> Vec<String> {
    let cleaned = clean_reference(reference);
    let file_name = cleaned.rsplit('/').next().unwrap_or(&cleaned);
    if file_name.is_empty() {
        return Vec::new();
    }
    let mut candidates: Vec<String> = FALLBACK_FOLDERS
        .iter()
        .map(|folder| format!("{folder}{file_name}"))
        .collect();
    candidates.push(file_name.to_string());
    candidates
}

/// Every path worth trying for `reference`, primary first.
pub fn resolve(reference: &str, chapter_base_path: &str) -> Vec<String> {
    if is_direct_reference(reference) {
        return vec![reference.trim().to_string()];
    }
    let mut candidates = vec![resolve_primary(reference, chapter_base_path)];
    for fallback in fallback_candidates(reference) {
        if !candidates.contains(&fallback) {
            candidates.push(fallback);
        }
    }
    candidates
}

/// Load the first candidate the archive actually holds.
///
/// Direct references are never looked up. Read errors on one candidate are
/// logged and the search moves on; a total miss is `None`, never an error.
pub fn locate<B: Book + ?Sized>(book: &B, reference: &str, chapter_base_path: &str) -> Option<Located> {
    if is_direct_reference(reference) {
        return None;
    }
    for path in resolve(reference, chapter_base_path) {
        match book.load_blob(&path) {
            Ok(Some(bytes)) => {
                trace!(%reference, %path, "Resolved archive resource");
                return Some(Located { path, bytes });
            }
            Ok(None) => {}
            Err(err) => debug!(%reference, %path, "Archive read failed: {err}"),
        }
    }
    debug!(%reference, base = %chapter_base_path, "No archive entry for resource");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::MemoryBook;

    #[test]
    fn parent_references_climb_out_of_the_chapter_dir() {
        assert_eq!(
            resolve_primary("../images/cover.png", "OEBPS/text/ch1.xhtml"),
            "OEBPS/images/cover.png"
        );
        assert_eq!(
            resolve_primary("../../cover.png", "OEBPS/text/ch1.xhtml"),
            "cover.png"
        );
        assert_eq!(resolve_primary("../../../x.png", "a/b.xhtml"), "x.png");
    }

    #[test]
    fn dot_and_bare_references_stay_in_the_chapter_dir() {
        assert_eq!(
            resolve_primary("./fig1.png", "OEBPS/text/ch1.xhtml"),
            "OEBPS/text/fig1.png"
        );
        assert_eq!(
            resolve_primary("fig1.png", "OEBPS/text/ch1.xhtml"),
            "OEBPS/text/fig1.png"
        );
        assert_eq!(resolve_primary("fig1.png", "ch1.xhtml"), "fig1.png");
        assert_eq!(resolve_primary("./fig1.png", "ch1.xhtml"), "fig1.png");
    }

    #[test]
    fn rooted_and_encoded_references_are_normalized() {
        assert_eq!(resolve_primary("/OEBPS/a.png", "OEBPS/text/c.xhtml"), "OEBPS/a.png");
        assert_eq!(
            resolve_primary("my%20pic.png#frag", "OEBPS/c.xhtml"),
            "OEBPS/my pic.png"
        );
    }

    #[test]
    fn direct_references_are_the_only_candidate() {
        for reference in ["https://example.com/a.png", "blob:abc", "data:image/png;base64,AAAA"] {
            assert_eq!(resolve(reference, "OEBPS/c.xhtml"), vec![reference.to_string()]);
        }
    }

    #[test]
    fn fallback_order_follows_common_image_folders() {
        assert_eq!(
            fallback_candidates("illustrations/p1.jpg"),
            vec![
                "Images/p1.jpg",
                "images/p1.jpg",
                "OEBPS/Images/p1.jpg",
                "OEBPS/images/p1.jpg",
                "p1.jpg",
            ]
        );
    }

    #[test]
    fn locate_takes_the_first_archive_hit() {
        let book = MemoryBook::new("Fallbacks")
            .with_entry("OEBPS/Images/p1.jpg", b"second".to_vec())
            .with_entry("p1.jpg", b"last".to_vec());

        let found = locate(&book, "illustrations/p1.jpg", "OEBPS/text/c1.xhtml")
            .expect("fallback should hit");
        assert_eq!(found.path, "OEBPS/Images/p1.jpg");
        assert_eq!(found.bytes, b"second".to_vec());
    }

    #[test]
    fn locate_prefers_the_primary_candidate() {
        let book = MemoryBook::new("Primary")
            .with_entry("OEBPS/images/cover.png", b"primary".to_vec())
            .with_entry("Images/cover.png", b"fallback".to_vec());

        let found = locate(&book, "../images/cover.png", "OEBPS/text/ch1.xhtml")
            .expect("primary should hit");
        assert_eq!(found.path, "OEBPS/images/cover.png");
    }

    #[test]
    fn locate_misses_quietly() {
        let book = MemoryBook::new("Nothing");
        assert!(locate(&book, "gone.png", "OEBPS/c.xhtml").is_none());
        assert!(locate(&book, "https://example.com/x.png", "OEBPS/c.xhtml").is_none());
    }
}
