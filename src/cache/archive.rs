// src/cache/archive.rs

//! Flat archive of a cache scope's files.
//!
//! Layout: the magic line, then per file a `u32` path length, the UTF-8
//! relative path, a `u64` content length and the content (big endian).

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::fs::FileSystem;

const MAGIC: &[u8] = b"CIDAGC1\n";

/// Whether `path` stays inside the directory it is joined onto.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Collect the files covered by `paths` (relative to `root`), sorted.
fn collect(fs: &dyn FileSystem, root: &Path, paths: &[String]) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    for raw in paths {
        let rel = Path::new(raw);
        if raw.starts_with('~') || !is_contained(rel) {
            warn!(path = %raw, "cache path outside the workspace ignored");
            continue;
        }
        let abs = root.join(rel);
        if fs.is_file(&abs) {
            files.insert(rel.to_path_buf());
        } else if fs.is_dir(&abs) {
            for file in fs.walk_files(&abs, &|_| false)? {
                if let Ok(inner) = file.strip_prefix(root) {
                    files.insert(inner.to_path_buf());
                }
            }
        } else {
            debug!(path = %raw, "cache path does not exist; nothing to save");
        }
    }
    Ok(files)
}

/// Pack the files under `paths` into archive bytes.
pub fn pack(fs: &dyn FileSystem, root: &Path, paths: &[String]) -> Result<Vec<u8>> {
    let mut out = MAGIC.to_vec();
    for rel in collect(fs, root, paths)? {
        let name = rel
            .to_str()
            .with_context(|| format!("non UTF-8 path in cache scope: {:?}", rel))?
            .replace('\\', "/");
        let content = fs.read(&root.join(&rel))?;
        let name_len = u32::try_from(name.len()).context("cache path too long")?;
        out.extend_from_slice(&name_len.to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(content.len() as u64).to_be_bytes());
        out.extend_from_slice(&content);
    }
    Ok(out)
}

/// Unpack archive bytes under `root`. Returns the number of files written.
pub fn unpack(fs: &dyn FileSystem, root: &Path, bytes: &[u8]) -> Result<usize> {
    let mut rest = bytes
        .strip_prefix(MAGIC)
        .context("not a cidag cache archive")?;
    let mut count = 0;

    while !rest.is_empty() {
        let name_len = u32::from_be_bytes(take::<4>(&mut rest)?) as usize;
        let name = std::str::from_utf8(take_slice(&mut rest, name_len)?)
            .context("cache archive path is not UTF-8")?;
        let rel = Path::new(name);
        if !is_contained(rel) {
            bail!("cache archive entry escapes the workspace: {name}");
        }
        let content_len = usize::try_from(u64::from_be_bytes(take::<8>(&mut rest)?))
            .context("cache archive entry too large")?;
        let content = take_slice(&mut rest, content_len)?;
        fs.write(&root.join(rel), content)?;
        count += 1;
    }
    Ok(count)
}

fn take<const N: usize>(rest: &mut &[u8]) -> Result<[u8; N]> {
    let slice = take_slice(rest, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(slice);
    Ok(arr)
}

fn take_slice<'a>(rest: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if rest.len() < n {
        bail!("truncated cache archive");
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head)
}
