// src/config/mod.rs

//! Engine configuration (`Cidag.toml`).
//!
//! - `model.rs`: raw TOML sections and the validated `ConfigFile`.
//! - `loader.rs`: reading from disk, with defaults when the file is absent.
//! - `validate.rs`: `TryFrom<RawConfigFile>` checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{CacheConfig, ConfigFile, EngineConfig, RawConfigFile};
