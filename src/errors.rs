// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only pre-run failures (document, config, graph) are errors. A failing step
//! or a cancelled instance is an outcome carried in the run report.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CidagError {
    #[error("Malformed workflow document: {0}")]
    MalformedDocument(String),

    #[error("Unknown field `{path}` in workflow document")]
    UnknownField { path: String },

    #[error("Cyclic dependency between jobs: {0}")]
    CyclicDependency(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CidagError>;
