// src/cache/mod.rs

//! Keyed cache scopes shared across job instances.
//!
//! [`CacheStore`] is the only path from the step executor to the backend. It
//! never fails a job: backend and archive errors are logged and turned into a
//! miss (restore) or a skipped save.

pub mod archive;
pub mod backend;
pub mod key;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use backend::{
    backend_from_config, CacheBackend, FileCacheBackend, MemoryCacheBackend, SaveOutcome,
};
pub use key::{CacheAction, CacheDeclaration, CacheKey, ResolvedCache, WorkspaceFunctions};

use crate::errors::CidagError;
use crate::fs::FileSystem;

/// Result of restoring a cache scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Exact key found.
    Hit(CacheKey),
    /// Restored from a fallback prefix.
    PartialHit(CacheKey),
    /// Nothing restored; the job continues cold.
    Miss,
}

impl RestoreOutcome {
    pub fn is_exact_hit(&self) -> bool {
        matches!(self, RestoreOutcome::Hit(_))
    }
}

/// Result of saving a cache scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    AlreadyExists,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    fs: Arc<dyn FileSystem>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, fs: Arc<dyn FileSystem>) -> Self {
        Self { backend, fs }
    }

    /// Restore into `workspace`: exact key first, then each prefix in order.
    pub async fn restore(&self, cache: &ResolvedCache, workspace: &Path) -> RestoreOutcome {
        let backend = Arc::clone(&self.backend);
        let fs = Arc::clone(&self.fs);
        let cache = cache.clone();
        let workspace = workspace.to_path_buf();

        let joined =
            tokio::task::spawn_blocking(move || restore_blocking(&*backend, &*fs, &cache, &workspace))
                .await;
        match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(error = %e, "cache restore failed; continuing without cache");
                RestoreOutcome::Miss
            }
            Err(e) => {
                warn!(error = %e, "cache restore task panicked; continuing without cache");
                RestoreOutcome::Miss
            }
        }
    }

    /// Pack the scope's paths from `workspace` and save them under the key.
    pub async fn save(&self, cache: &ResolvedCache, workspace: &Path) -> SaveStatus {
        let backend = Arc::clone(&self.backend);
        let fs = Arc::clone(&self.fs);
        let cache = cache.clone();
        let workspace = workspace.to_path_buf();

        let joined =
            tokio::task::spawn_blocking(move || save_blocking(&*backend, &*fs, &cache, &workspace))
                .await;
        match joined {
            Ok(Ok(SaveOutcome::Saved)) => SaveStatus::Saved,
            Ok(Ok(SaveOutcome::AlreadyExists)) => SaveStatus::AlreadyExists,
            Ok(Err(e)) => {
                warn!(error = %e, "cache save failed");
                SaveStatus::Failed
            }
            Err(e) => {
                warn!(error = %e, "cache save task panicked");
                SaveStatus::Failed
            }
        }
    }
}

fn restore_blocking(
    backend: &dyn CacheBackend,
    fs: &dyn FileSystem,
    cache: &ResolvedCache,
    workspace: &Path,
) -> Result<RestoreOutcome, CidagError> {
    if let Some(bytes) = backend.restore(&cache.key)? {
        let files = archive::unpack(fs, workspace, &bytes)?;
        info!(key = %cache.key, files, "cache hit");
        return Ok(RestoreOutcome::Hit(cache.key.clone()));
    }

    for prefix in &cache.restore_prefixes {
        if let Some((key, bytes)) = backend.restore_prefix(prefix)? {
            let files = archive::unpack(fs, workspace, &bytes)?;
            info!(key = %key, prefix = %prefix, files, "cache restored from prefix");
            return Ok(RestoreOutcome::PartialHit(key));
        }
    }

    debug!(key = %cache.key, "cache miss");
    Ok(RestoreOutcome::Miss)
}

fn save_blocking(
    backend: &dyn CacheBackend,
    fs: &dyn FileSystem,
    cache: &ResolvedCache,
    workspace: &Path,
) -> Result<SaveOutcome, CidagError> {
    let bytes = archive::pack(fs, workspace, &cache.paths)?;
    let outcome = backend.save(&cache.key, &bytes)?;
    if outcome == SaveOutcome::AlreadyExists {
        debug!(key = %cache.key, "cache key already saved; keeping the existing entry");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn resolved(key: &str, prefixes: &[&str]) -> ResolvedCache {
        ResolvedCache {
            key: CacheKey::new(key),
            paths: vec!["target".to_string()],
            restore_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn exact_match_is_preferred_over_prefix() {
        let fs = MockFileSystem::with_files([("/w1/target/out", "exact")]);
        let backend = Arc::new(MemoryCacheBackend::new());
        let store = CacheStore::new(backend.clone(), Arc::new(fs.clone()));

        assert_eq!(store.save(&resolved("Linux-1", &[]), Path::new("/w1")).await, SaveStatus::Saved);
        fs.add_file("/w1/target/out", "newer");
        assert_eq!(store.save(&resolved("Linux-2", &[]), Path::new("/w1")).await, SaveStatus::Saved);

        // Linux-2 is the newest prefix match, but the exact key wins.
        let outcome = store.restore(&resolved("Linux-1", &["Linux-"]), Path::new("/w2")).await;
        assert_eq!(outcome, RestoreOutcome::Hit(CacheKey::new("Linux-1")));
        assert_eq!(fs.read_to_string(Path::new("/w2/target/out")).unwrap(), "exact");

        let outcome = store.restore(&resolved("Linux-3", &["Linux-"]), Path::new("/w3")).await;
        assert_eq!(outcome, RestoreOutcome::PartialHit(CacheKey::new("Linux-2")));
        assert_eq!(fs.read_to_string(Path::new("/w3/target/out")).unwrap(), "newer");
    }

    #[tokio::test]
    async fn miss_without_prefixes() {
        let fs = MockFileSystem::new();
        let store = CacheStore::new(Arc::new(MemoryCacheBackend::new()), Arc::new(fs));
        let outcome = store.restore(&resolved("k", &[]), Path::new("/w")).await;
        assert_eq!(outcome, RestoreOutcome::Miss);
    }
}
