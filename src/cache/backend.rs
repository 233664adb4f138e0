// src/cache/backend.rs

//! Cache storage backends.
//!
//! A backend maps keys to opaque archive bytes. Writes are create-once: a
//! second save under an existing key leaves the first entry untouched.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{debug, info};

use super::key::CacheKey;
use crate::errors::{CidagError, Result};
use crate::types::CacheBackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    AlreadyExists,
}

pub trait CacheBackend: Send + Sync + Debug {
    /// Exact-key lookup.
    fn restore(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Newest entry whose key starts with `prefix`.
    fn restore_prefix(&self, prefix: &str) -> Result<Option<(CacheKey, Vec<u8>)>>;

    fn save(&self, key: &CacheKey, bytes: &[u8]) -> Result<SaveOutcome>;
}

/// Build the backend selected in `[cache]`.
pub fn backend_from_config(kind: CacheBackendKind, dir: &Path) -> Arc<dyn CacheBackend> {
    match kind {
        CacheBackendKind::File => Arc::new(FileCacheBackend::new(dir.to_path_buf())),
        CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new()),
    }
}

fn backend_err(context: &str, err: impl std::fmt::Display) -> CidagError {
    CidagError::CacheBackend(format!("{context}: {err}"))
}

/// One file per key under a cache directory.
#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    dir: PathBuf,
}

const ENTRY_SUFFIX: &str = ".cache";

impl FileCacheBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}{ENTRY_SUFFIX}", encode_key(key.as_str())))
    }
}

impl CacheBackend for FileCacheBackend {
    fn restore(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(backend_err(&format!("reading {:?}", path), e)),
        }
    }

    fn restore_prefix(&self, prefix: &str) -> Result<Option<(CacheKey, Vec<u8>)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(backend_err(&format!("listing {:?}", self.dir), e)),
        };

        let mut best: Option<(SystemTime, CacheKey, PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|e| backend_err("listing cache dir", e))?;
            let file_name = entry.file_name();
            let Some(encoded) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(ENTRY_SUFFIX))
            else {
                continue;
            };
            let Some(key) = decode_key(encoded) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| backend_err("reading entry metadata", e))?;
            let newer = match &best {
                Some((t, k, _)) => (modified, key.as_str()) > (*t, k.as_str()),
                None => true,
            };
            if newer {
                best = Some((modified, CacheKey::new(key), entry.path()));
            }
        }

        match best {
            Some((_, key, path)) => {
                let bytes = fs::read(&path).map_err(|e| backend_err("reading entry", e))?;
                Ok(Some((key, bytes)))
            }
            None => Ok(None),
        }
    }

    fn save(&self, key: &CacheKey, bytes: &[u8]) -> Result<SaveOutcome> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| backend_err(&format!("creating {:?}", self.dir), e))?;

        let final_path = self.entry_path(key);
        if final_path.exists() {
            return Ok(SaveOutcome::AlreadyExists);
        }

        // Write aside, then hard-link into place: the link fails if another
        // writer got there first, so the first complete entry wins.
        let tmp_path = self.dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let write_result = fs::File::create(&tmp_path)
            .and_then(|mut f| f.write_all(bytes).and_then(|_| f.sync_all()));
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(backend_err("writing cache entry", e));
        }

        let linked = fs::hard_link(&tmp_path, &final_path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => {
                info!(key = %key, bytes = bytes.len(), "saved cache entry (file)");
                Ok(SaveOutcome::Saved)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(key = %key, "cache entry appeared concurrently");
                Ok(SaveOutcome::AlreadyExists)
            }
            Err(e) => Err(backend_err("publishing cache entry", e)),
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Percent-encode everything outside `[A-Za-z0-9._-]`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<CacheKey, (u64, Vec<u8>)>>,
    seq: AtomicU64,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, (u64, Vec<u8>)>>> {
        self.entries
            .lock()
            .map_err(|_| CidagError::CacheBackend("memory cache lock poisoned".into()))
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn restore(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).map(|(_, bytes)| bytes.clone()))
    }

    fn restore_prefix(&self, prefix: &str) -> Result<Option<(CacheKey, Vec<u8>)>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(k, _)| k.as_str().starts_with(prefix))
            .max_by_key(|(_, (seq, _))| *seq)
            .map(|(k, (_, bytes))| (k.clone(), bytes.clone())))
    }

    fn save(&self, key: &CacheKey, bytes: &[u8]) -> Result<SaveOutcome> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(SaveOutcome::AlreadyExists);
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        entries.insert(key.clone(), (seq, bytes.to_vec()));
        info!(key = %key, bytes = bytes.len(), "saved cache entry (memory)");
        Ok(SaveOutcome::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[test]
    fn key_encoding_is_reversible() {
        let raw = "Linux-rust-ab/c d%";
        let encoded = encode_key(raw);
        assert!(!encoded.contains('/'));
        assert_eq!(decode_key(&encoded).as_deref(), Some(raw));
    }

    #[test]
    fn memory_backend_is_create_once() {
        let backend = MemoryCacheBackend::new();
        assert_eq!(backend.save(&key("k"), b"first").unwrap(), SaveOutcome::Saved);
        assert_eq!(
            backend.save(&key("k"), b"second").unwrap(),
            SaveOutcome::AlreadyExists
        );
        assert_eq!(backend.restore(&key("k")).unwrap().unwrap(), b"first");
        assert!(backend.restore(&key("missing")).unwrap().is_none());
    }

    #[test]
    fn memory_prefix_picks_newest() {
        let backend = MemoryCacheBackend::new();
        backend.save(&key("Linux-rust-aaa"), b"old").unwrap();
        backend.save(&key("Linux-rust-bbb"), b"new").unwrap();
        backend.save(&key("Windows-rust-ccc"), b"other").unwrap();
        let (k, bytes) = backend.restore_prefix("Linux-rust-").unwrap().unwrap();
        assert_eq!(k, key("Linux-rust-bbb"));
        assert_eq!(bytes, b"new");
    }

    #[test]
    fn file_backend_roundtrip_and_create_once() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileCacheBackend::new(tmp.path().join("cache"));

        assert!(backend.restore(&key("a/b")).unwrap().is_none());
        assert!(backend.restore_prefix("a").unwrap().is_none());

        assert_eq!(backend.save(&key("a/b"), b"one").unwrap(), SaveOutcome::Saved);
        assert_eq!(
            backend.save(&key("a/b"), b"two").unwrap(),
            SaveOutcome::AlreadyExists
        );
        assert_eq!(backend.restore(&key("a/b")).unwrap().unwrap(), b"one");

        let (k, bytes) = backend.restore_prefix("a/").unwrap().unwrap();
        assert_eq!(k, key("a/b"));
        assert_eq!(bytes, b"one");
    }
}
