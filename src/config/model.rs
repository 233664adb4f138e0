// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::GatingPolicy;
use crate::types::{CacheBackendKind, UnknownActionPolicy};

/// Variables copied from the host into every runner context by default.
pub const DEFAULT_PASSTHROUGH_ENV: &[&str] = &[
    "CARGO_TERM_COLOR",
    "RUSTFLAGS",
    "RUSTDOCFLAGS",
    "NO_COLOR",
    "CLICOLOR",
    "CLICOLOR_FORCE",
    "TERM",
];

pub const DEFAULT_WORK_DIR: &str = ".cidag/work";
pub const DEFAULT_CACHE_DIR: &str = ".cidag/cache";
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 2000;

/// Raw configuration as deserialized from `Cidag.toml`.
///
/// ```toml
/// [engine]
/// concurrency = 4
/// unknown_actions = "fail"
///
/// [cache]
/// backend = "memory"
///
/// [gating]
/// required = ["build", "test"]
///
/// [env]
/// CARGO_TERM_COLOR = "always"
///
/// [actions]
/// "dtolnay/rust-toolchain" = "rustup show"
/// ```
///
/// Every section is optional. Use `ConfigFile::try_from` to validate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: RawEngineSection,

    #[serde(default)]
    pub cache: RawCacheSection,

    #[serde(default)]
    pub gating: RawGatingSection,

    /// Extra process-wide variables, merged under the workflow `env`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Action reference prefix -> local shell command.
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineSection {
    /// Runner slots (K). Defaults to the available parallelism.
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    #[serde(default)]
    pub unknown_actions: UnknownActionPolicy,

    #[serde(default)]
    pub cancel_grace_ms: Option<u64>,

    /// Host variables copied verbatim into runner contexts.
    #[serde(default)]
    pub passthrough_env: Option<Vec<String>>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCacheSection {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub backend: CacheBackendKind,
}

/// `[gating]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawGatingSection {
    /// Jobs that must succeed; empty means every job.
    #[serde(default)]
    pub required: Vec<String>,
}

/// Validated engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub gating: GatingPolicy,
    pub env: BTreeMap<String, String>,
    pub actions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub strict: bool,
    pub work_dir: PathBuf,
    pub unknown_actions: UnknownActionPolicy,
    pub cancel_grace: Duration,
    pub passthrough_env: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub backend: CacheBackendKind,
}

impl ConfigFile {
    /// Build from raw sections without validation. Prefer `TryFrom`.
    pub fn new_unchecked(raw: RawConfigFile) -> Self {
        let RawConfigFile {
            engine,
            cache,
            gating,
            env,
            actions,
        } = raw;

        Self {
            engine: EngineConfig {
                concurrency: engine.concurrency.unwrap_or_else(default_concurrency),
                strict: engine.strict,
                work_dir: engine
                    .work_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
                unknown_actions: engine.unknown_actions,
                cancel_grace: Duration::from_millis(
                    engine.cancel_grace_ms.unwrap_or(DEFAULT_CANCEL_GRACE_MS),
                ),
                passthrough_env: engine.passthrough_env.unwrap_or_else(|| {
                    DEFAULT_PASSTHROUGH_ENV
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),
            },
            cache: CacheConfig {
                enabled: cache.enabled.unwrap_or(true),
                dir: cache.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
                backend: cache.backend,
            },
            gating: GatingPolicy {
                required: gating.required,
            },
            env,
            actions,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// Available parallelism, or 1 when it cannot be determined.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
