use cidag::cache::{CacheBackend, CacheKey, SaveOutcome};
use cidag::errors::{CidagError, Result};

/// A cache backend whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingCacheBackend;

impl CacheBackend for FailingCacheBackend {
    fn restore(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Err(CidagError::CacheBackend(format!("restore {key}: backend offline")))
    }

    fn restore_prefix(&self, prefix: &str) -> Result<Option<(CacheKey, Vec<u8>)>> {
        Err(CidagError::CacheBackend(format!("restore prefix {prefix}: backend offline")))
    }

    fn save(&self, key: &CacheKey, _bytes: &[u8]) -> Result<SaveOutcome> {
        Err(CidagError::CacheBackend(format!("save {key}: backend offline")))
    }
}
