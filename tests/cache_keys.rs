// tests/cache_keys.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use cidag::cache::{
    CacheAction, CacheBackend, CacheDeclaration, CacheKey, FileCacheBackend, SaveOutcome,
    WorkspaceFunctions,
};
use cidag::expr::ExprContext;
use cidag::fs::RealFileSystem;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn rust_cache_key(root: &Path) -> CacheKey {
    let decl = CacheDeclaration::from_action(CacheAction::Rust, &BTreeMap::new()).unwrap();
    let ctx = ExprContext {
        runner_os: "Linux".to_string(),
        ..ExprContext::default()
    };
    let host = WorkspaceFunctions::new(Arc::new(RealFileSystem), root);
    decl.resolve(&ctx, &host).unwrap().key
}

#[test]
fn key_is_independent_of_file_creation_order() {
    let a = tempfile::tempdir().unwrap();
    write(a.path(), "Cargo.toml", "[workspace]\n");
    write(a.path(), "Cargo.lock", "version = 4\n");
    write(a.path(), "crates/core/Cargo.toml", "[package]\nname = \"core\"\n");

    let b = tempfile::tempdir().unwrap();
    write(b.path(), "crates/core/Cargo.toml", "[package]\nname = \"core\"\n");
    write(b.path(), "Cargo.lock", "version = 4\n");
    write(b.path(), "Cargo.toml", "[workspace]\n");

    let key_a = rust_cache_key(a.path());
    assert_eq!(key_a, rust_cache_key(a.path()));
    assert_eq!(key_a, rust_cache_key(b.path()));
    assert!(key_a.as_str().starts_with("Linux-rust-"));
}

#[test]
fn key_changes_with_manifest_contents() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Cargo.lock", "version = 4\n");
    let before = rust_cache_key(dir.path());

    write(dir.path(), "Cargo.lock", "version = 4\n# bumped\n");
    assert_ne!(before, rust_cache_key(dir.path()));
}

#[test]
fn git_dir_is_not_hashed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Cargo.toml", "[package]\n");
    let before = rust_cache_key(dir.path());

    write(dir.path(), ".git/Cargo.toml", "not a manifest");
    assert_eq!(before, rust_cache_key(dir.path()));
}

#[test]
fn file_backend_saves_each_key_once() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileCacheBackend::new(dir.path().join("cache"));
    let key = CacheKey::new("Linux-rust-abc/def");

    assert_eq!(backend.save(&key, b"first").unwrap(), SaveOutcome::Saved);
    assert_eq!(
        backend.save(&key, b"second").unwrap(),
        SaveOutcome::AlreadyExists
    );
    assert_eq!(backend.restore(&key).unwrap(), Some(b"first".to_vec()));
    assert_eq!(backend.restore(&CacheKey::new("other")).unwrap(), None);

    let (found, bytes) = backend.restore_prefix("Linux-rust-").unwrap().unwrap();
    assert_eq!(found, key);
    assert_eq!(bytes, b"first".to_vec());
}
