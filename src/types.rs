use std::str::FromStr;

use serde::Deserialize;

/// What to do with a `uses:` step that has no local emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownActionPolicy {
    /// Record the step as skipped and keep going (default).
    #[default]
    Skip,
    /// Fail the step with exit code 1.
    Fail,
}

impl FromStr for UnknownActionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(UnknownActionPolicy::Skip),
            "fail" => Ok(UnknownActionPolicy::Fail),
            other => Err(format!(
                "invalid unknown_actions: {other} (expected \"skip\" or \"fail\")"
            )),
        }
    }
}

/// Where cache entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// One file per key under `[cache].dir`.
    #[default]
    File,
    /// In-process only (lost when the run ends).
    Memory,
}

/// When the run summary uses ANSI colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorMode {
    /// Color if stdout is a terminal and `NO_COLOR` is unset or empty.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// Resolve the mode against the terminal check and the `NO_COLOR` value.
    pub fn use_color(self, is_terminal: bool, no_color: Option<&str>) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => is_terminal && no_color.is_none_or(|v| v.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_color_respects_no_color() {
        assert!(ColorMode::Auto.use_color(true, None));
        assert!(ColorMode::Auto.use_color(true, Some("")));
        assert!(!ColorMode::Auto.use_color(true, Some("1")));
        assert!(!ColorMode::Auto.use_color(false, None));
        assert!(ColorMode::Always.use_color(false, Some("1")));
        assert!(!ColorMode::Never.use_color(true, None));
    }

    #[test]
    fn unknown_action_policy_parses() {
        assert_eq!("Fail".parse::<UnknownActionPolicy>(), Ok(UnknownActionPolicy::Fail));
        assert!("maybe".parse::<UnknownActionPolicy>().is_err());
    }
}
