// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CidagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CidagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_env(cfg)?;
    validate_actions(cfg)?;
    validate_gating(cfg)?;
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.concurrency == Some(0) {
        return Err(CidagError::ConfigError(
            "[engine].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(vars) = &cfg.engine.passthrough_env {
        for name in vars {
            check_var_name(name, "[engine].passthrough_env")?;
        }
    }
    Ok(())
}

fn validate_env(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.env.keys() {
        check_var_name(name, "[env]")?;
    }
    Ok(())
}

fn validate_actions(cfg: &RawConfigFile) -> Result<()> {
    for (reference, command) in &cfg.actions {
        if reference.trim().is_empty() {
            return Err(CidagError::ConfigError(
                "[actions] contains an empty action reference".to_string(),
            ));
        }
        if command.trim().is_empty() {
            return Err(CidagError::ConfigError(format!(
                "[actions] entry '{reference}' has an empty command"
            )));
        }
    }
    Ok(())
}

fn validate_gating(cfg: &RawConfigFile) -> Result<()> {
    if cfg.gating.required.iter().any(|j| j.trim().is_empty()) {
        return Err(CidagError::ConfigError(
            "[gating].required contains an empty job name".to_string(),
        ));
    }
    Ok(())
}

fn check_var_name(name: &str, section: &str) -> Result<()> {
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(CidagError::ConfigError(format!(
            "{section} has invalid variable name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheBackendKind, UnknownActionPolicy};
    use std::time::Duration;

    fn parse(text: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(text)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("").unwrap();
        assert!(cfg.engine.concurrency >= 1);
        assert!(!cfg.engine.strict);
        assert_eq!(cfg.engine.unknown_actions, UnknownActionPolicy::Skip);
        assert_eq!(cfg.engine.cancel_grace, Duration::from_millis(2000));
        assert!(cfg.engine.passthrough_env.iter().any(|v| v == "CARGO_TERM_COLOR"));
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.backend, CacheBackendKind::File);
        assert!(cfg.gating.required.is_empty());
    }

    #[test]
    fn sections_are_read() {
        let cfg = parse(
            r#"
            [engine]
            concurrency = 3
            strict = true
            unknown_actions = "fail"
            cancel_grace_ms = 50
            passthrough_env = ["FOO"]

            [cache]
            enabled = false
            backend = "memory"

            [gating]
            required = ["build"]

            [env]
            RUSTFLAGS = "-Dwarnings"

            [actions]
            "dtolnay/rust-toolchain" = "rustc --version"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.concurrency, 3);
        assert!(cfg.engine.strict);
        assert_eq!(cfg.engine.unknown_actions, UnknownActionPolicy::Fail);
        assert_eq!(cfg.engine.cancel_grace, Duration::from_millis(50));
        assert_eq!(cfg.engine.passthrough_env, vec!["FOO".to_string()]);
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.cache.backend, CacheBackendKind::Memory);
        assert_eq!(cfg.gating.required, vec!["build".to_string()]);
        assert_eq!(cfg.env["RUSTFLAGS"], "-Dwarnings");
        assert_eq!(cfg.actions["dtolnay/rust-toolchain"], "rustc --version");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = parse("[engine]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, CidagError::ConfigError(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse("[engine]\nconcurency = 2\n").unwrap_err();
        assert!(matches!(err, CidagError::TomlError(_)));
    }

    #[test]
    fn empty_action_command_is_rejected() {
        let err = parse("[actions]\n\"foo/bar\" = \"  \"\n").unwrap_err();
        assert!(matches!(err, CidagError::ConfigError(_)));
    }

    #[test]
    fn bad_env_name_is_rejected() {
        let err = parse("[env]\n\"A=B\" = \"x\"\n").unwrap_err();
        assert!(matches!(err, CidagError::ConfigError(_)));
    }
}
