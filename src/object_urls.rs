//! Handles for archive bytes handed to the view.
//!
//! Rendering never inlines binary data into chapter markup. Each resource
//! gets an opaque `blob:` handle minted into the render's `ResourceBag`, and
//! the bag revokes all of its handles when the next render starts or when it
//! is dropped.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

pub const URL_PREFIX: &str = "blob:chapterlight/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Arc<Vec<u8>>,
    pub mime: String,
}

/// Registry of live handles, shared by every bag of one viewport.
#[derive(Clone, Debug, Default)]
pub struct ObjectUrlStore {
    live: Arc<Mutex<HashMap<String, Blob>>>,
    minted: Arc<AtomicU64>,
}

impl ObjectUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Blob>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, bytes: Vec<u8>, mime: &str) -> String {
        let serial = self.minted.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(serial.to_le_bytes());
        hasher.update(&bytes);
        let digest = format!("{:x}", hasher.finalize());
        let url = format!("{URL_PREFIX}{}", &digest[..32]);
        self.lock().insert(
            url.clone(),
            Blob {
                bytes: Arc::new(bytes),
                mime: mime.to_string(),
            },
        );
        trace!(%url, %mime, "Minted object URL");
        url
    }

    pub fn revoke(&self, url: &str) -> bool {
        self.lock().remove(url).is_some()
    }

    pub fn get(&self, url: &str) -> Option<Blob> {
        self.lock().get(url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Inline a live handle as a `data:` URL, for standalone snapshots.
    pub fn to_data_url(&self, url: &str) -> Option<String> {
        let blob = self.get(url)?;
        Some(data_url(&blob.mime, &blob.bytes))
    }
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Best-effort MIME type from the entry name, then from the bytes.
pub fn guess_mime(path: &str, bytes: &[u8]) -> String {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let by_name = match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "ttf" => Some("font/ttf"),
        "otf" => Some("font/otf"),
        "woff" => Some("font/woff"),
        "woff2" => Some("font/woff2"),
        "css" => Some("text/css"),
        _ => None,
    };
    if let Some(mime) = by_name {
        return mime.to_string();
    }
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| "application/octet-stream".to_string())
}

/// The handles minted during one render pass.
#[derive(Debug)]
pub struct ResourceBag {
    store: ObjectUrlStore,
    urls: Vec<String>,
}

impl ResourceBag {
    pub fn new(store: ObjectUrlStore) -> Self {
        ResourceBag {
            store,
            urls: Vec::new(),
        }
    }

    pub fn mint(&mut self, bytes: Vec<u8>, path: &str) -> String {
        let mime = guess_mime(path, &bytes);
        let url = self.store.create(bytes, &mime);
        self.urls.push(url.clone());
        url
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Revoke everything this bag minted. Returns how many were live.
    pub fn release(&mut self) -> usize {
        let store = &self.store;
        let released = self.urls.drain(..).filter(|url| store.revoke(url)).count();
        if released > 0 {
            trace!(released, "Released render resources");
        }
        released
    }
}

impl Drop for ResourceBag {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_get_distinct_handles() {
        let store = ObjectUrlStore::new();
        let a = store.create(vec![1, 2, 3], "image/png");
        let b = store.create(vec![1, 2, 3], "image/png");
        assert_ne!(a, b);
        assert!(a.starts_with(URL_PREFIX));
        assert_eq!(store.live_count(), 2);
    }

    #[test]
    fn release_revokes_only_the_bags_own_handles() {
        let store = ObjectUrlStore::new();
        let keep = store.create(vec![9], "image/png");
        let mut bag = ResourceBag::new(store.clone());
        bag.mint(vec![1], "a.png");
        bag.mint(vec![2], "b.png");
        assert_eq!(store.live_count(), 3);

        assert_eq!(bag.release(), 2);
        assert!(bag.is_empty());
        assert_eq!(store.live_count(), 1);
        assert!(store.get(&keep).is_some());
    }

    #[test]
    fn dropping_a_bag_releases_it() {
        let store = ObjectUrlStore::new();
        {
            let mut bag = ResourceBag::new(store.clone());
            bag.mint(vec![1], "a.woff2");
        }
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn data_url_carries_mime_and_payload() {
        let store = ObjectUrlStore::new();
        let url = store.create(b"hi".to_vec(), "text/plain");
        assert_eq!(
            store.to_data_url(&url).as_deref(),
            Some("data:text/plain;base64,aGk=")
        );
        assert!(store.to_data_url("blob:chapterlight/missing").is_none());
    }

    #[test]
    fn mime_falls_back_to_magic_bytes() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];
        assert_eq!(guess_mime("cover", &png_header), "image/png");
        assert_eq!(guess_mime("font.WOFF2", &[]), "font/woff2");
        assert_eq!(guess_mime("blob", b"??"), "application/octet-stream");
    }
}
