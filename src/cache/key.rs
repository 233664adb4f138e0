// src/cache/key.rs

//! Cache declarations, key resolution and `hashFiles`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use blake3::Hasher;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::expr::{interpolate, ExprContext, ExprError, FunctionHost};
use crate::fs::FileSystem;

/// Key template used by `Swatinem/rust-cache`.
pub const RUST_CACHE_KEY_TEMPLATE: &str =
    "${{ runner.os }}-rust-${{ hashFiles('**/Cargo.lock', '**/Cargo.toml') }}";

/// Directories `hashFiles` never descends into.
const HASH_SKIP_DIRS: &[&str] = &[".git", ".cidag"];

/// Cache actions handled by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// `actions/cache@*`
    Generic,
    /// `Swatinem/rust-cache@*`
    Rust,
}

impl CacheAction {
    pub fn from_reference(reference: &str) -> Option<Self> {
        let name = reference.split('@').next().unwrap_or(reference);
        if name.eq_ignore_ascii_case("actions/cache") {
            Some(CacheAction::Generic)
        } else if name.eq_ignore_ascii_case("Swatinem/rust-cache") {
            Some(CacheAction::Rust)
        } else {
            None
        }
    }
}

/// A cache scope as declared in the workflow, before substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDeclaration {
    pub key_template: String,
    pub paths: Vec<String>,
    /// Fallback prefixes, tried in order after the exact key.
    pub restore_prefixes: Vec<String>,
}

impl CacheDeclaration {
    /// Build a declaration from a cache step's `with:` map.
    pub fn from_action(action: CacheAction, with: &BTreeMap<String, String>) -> Result<Self> {
        match action {
            CacheAction::Generic => {
                let key_template = with
                    .get("key")
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| anyhow!("actions/cache requires a `key` input"))?
                    .clone();
                let paths = split_lines(with.get("path").map(String::as_str).unwrap_or_default());
                if paths.is_empty() {
                    bail!("actions/cache requires a `path` input");
                }
                Ok(Self {
                    key_template,
                    paths,
                    restore_prefixes: split_lines(
                        with.get("restore-keys").map(String::as_str).unwrap_or_default(),
                    ),
                })
            }
            CacheAction::Rust => {
                // `prefix-key` and `key` extend the built-in template.
                let mut key_template = RUST_CACHE_KEY_TEMPLATE.to_string();
                if let Some(extra) = with.get("key").filter(|k| !k.trim().is_empty()) {
                    key_template = format!("{key_template}-{}", extra.trim());
                }
                if let Some(prefix) = with.get("prefix-key").filter(|k| !k.trim().is_empty()) {
                    key_template = format!("{}-{key_template}", prefix.trim());
                }
                let restore_prefix = format!(
                    "{}-rust-",
                    key_template.split("-rust-").next().unwrap_or_default()
                );
                Ok(Self {
                    key_template,
                    paths: vec!["target".to_string()],
                    restore_prefixes: vec![restore_prefix],
                })
            }
        }
    }

    /// Substitute variables and hashes into a concrete key.
    pub fn resolve(
        &self,
        ctx: &ExprContext,
        host: &dyn FunctionHost,
    ) -> Result<ResolvedCache, ExprError> {
        let key = interpolate(&self.key_template, ctx, host)?;
        let paths = self
            .paths
            .iter()
            .map(|p| interpolate(p, ctx, host))
            .collect::<Result<Vec<_>, _>>()?;
        let restore_prefixes = self
            .restore_prefixes
            .iter()
            .map(|p| interpolate(p, ctx, host))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedCache {
            key: CacheKey::new(key),
            paths,
            restore_prefixes,
        })
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// A resolved cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key plus the restore path set it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCache {
    pub key: CacheKey,
    pub paths: Vec<String>,
    pub restore_prefixes: Vec<String>,
}

/// Hash of a single file's bytes.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Aggregate hash from per-file hashes.
///
/// `hashes` must be sorted by the corresponding file path.
pub fn compute_aggregate_hash(hashes: &[String]) -> String {
    let mut hasher = Hasher::new();
    for h in hashes {
        hasher.update(h.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// `hashFiles` over a workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceFunctions {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl WorkspaceFunctions {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    /// Files under the root matching the patterns, sorted by relative path.
    ///
    /// Patterns starting with `!` exclude.
    pub fn matching_files(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let (include, exclude) = compile_patterns(patterns)?;
        let skip = |dir: &Path| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| HASH_SKIP_DIRS.contains(&n))
        };

        let mut matched: Vec<PathBuf> = self
            .fs
            .walk_files(&self.root, &skip)?
            .into_iter()
            .filter_map(|p| p.strip_prefix(&self.root).ok().map(Path::to_path_buf))
            .filter(|rel| include.is_match(rel) && !exclude.is_match(rel))
            .collect();
        matched.sort();
        Ok(matched)
    }
}

impl FunctionHost for WorkspaceFunctions {
    fn hash_files(&self, patterns: &[String]) -> Result<String> {
        let files = self.matching_files(patterns)?;
        if files.is_empty() {
            debug!(?patterns, "hashFiles matched no files");
            return Ok(String::new());
        }

        let mut hashes = Vec::with_capacity(files.len());
        for rel in &files {
            hashes.push(compute_file_hash(self.fs.as_ref(), &self.root.join(rel))?);
        }
        let hash = compute_aggregate_hash(&hashes);
        debug!(files = files.len(), hash = %hash, "computed hashFiles digest");
        Ok(hash)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut include = GlobSetBuilder::new();
    let mut exclude = GlobSetBuilder::new();
    for raw in patterns {
        let (builder, pat) = match raw.strip_prefix('!') {
            Some(rest) => (&mut exclude, rest),
            None => (&mut include, raw.as_str()),
        };
        let glob = GlobBuilder::new(pat.trim_start_matches("./"))
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid hashFiles pattern `{raw}`"))?;
        builder.add(glob);
    }
    Ok((include.build()?, exclude.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn ctx() -> ExprContext {
        ExprContext {
            runner_os: "Linux".into(),
            ..Default::default()
        }
    }

    fn workspace(fs: MockFileSystem) -> WorkspaceFunctions {
        WorkspaceFunctions::new(Arc::new(fs), "/ws")
    }

    #[test]
    fn recognizes_cache_actions() {
        assert_eq!(CacheAction::from_reference("actions/cache@v4"), Some(CacheAction::Generic));
        assert_eq!(CacheAction::from_reference("Swatinem/rust-cache@v2"), Some(CacheAction::Rust));
        assert_eq!(CacheAction::from_reference("actions/checkout@v4"), None);
    }

    #[test]
    fn generic_cache_requires_key_and_path() {
        let mut with = BTreeMap::new();
        assert!(CacheDeclaration::from_action(CacheAction::Generic, &with).is_err());
        with.insert("key".to_string(), "k".to_string());
        assert!(CacheDeclaration::from_action(CacheAction::Generic, &with).is_err());
        with.insert("path".to_string(), "a\n\n b \n".to_string());
        with.insert("restore-keys".to_string(), "k-\n".to_string());
        let decl = CacheDeclaration::from_action(CacheAction::Generic, &with).unwrap();
        assert_eq!(decl.paths, vec!["a", "b"]);
        assert_eq!(decl.restore_prefixes, vec!["k-"]);
    }

    #[test]
    fn rust_cache_key_depends_on_manifests() {
        let decl = CacheDeclaration::from_action(CacheAction::Rust, &BTreeMap::new()).unwrap();
        assert_eq!(decl.paths, vec!["target"]);

        let host = workspace(MockFileSystem::with_files([
            ("/ws/Cargo.toml", "[package]"),
            ("/ws/Cargo.lock", "v1"),
        ]));
        let a = decl.resolve(&ctx(), &host).unwrap();
        assert!(a.key.as_str().starts_with("Linux-rust-"));
        assert_eq!(a.restore_prefixes, vec!["Linux-rust-"]);

        let changed = workspace(MockFileSystem::with_files([
            ("/ws/Cargo.toml", "[package]"),
            ("/ws/Cargo.lock", "v2"),
        ]));
        let b = decl.resolve(&ctx(), &changed).unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn hash_is_independent_of_listing_order() {
        let files = [
            ("/ws/Cargo.toml", "root"),
            ("/ws/crates/a/Cargo.toml", "a"),
            ("/ws/crates/b/Cargo.toml", "b"),
        ];
        let forward = workspace(MockFileSystem::with_files(files));
        let reversed = workspace(MockFileSystem::with_files(files).reversed_listing());
        let pattern = vec!["**/Cargo.toml".to_string()];
        assert_eq!(
            forward.hash_files(&pattern).unwrap(),
            reversed.hash_files(&pattern).unwrap()
        );
    }

    #[test]
    fn hash_files_respects_exclusions_and_empty_matches() {
        let host = workspace(MockFileSystem::with_files([
            ("/ws/Cargo.lock", "x"),
            ("/ws/.git/Cargo.lock", "ignored"),
            ("/ws/vendor/Cargo.lock", "y"),
        ]));
        let all = host.matching_files(&["**/Cargo.lock".to_string()]).unwrap();
        assert_eq!(all, vec![PathBuf::from("Cargo.lock"), PathBuf::from("vendor/Cargo.lock")]);

        let some = host
            .matching_files(&["**/Cargo.lock".to_string(), "!vendor/**".to_string()])
            .unwrap();
        assert_eq!(some, vec![PathBuf::from("Cargo.lock")]);

        assert_eq!(host.hash_files(&["*.nothing".to_string()]).unwrap(), "");
    }
}
