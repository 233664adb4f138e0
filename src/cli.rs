// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::ColorMode;
use crate::workflow::EventKind;

/// Command-line arguments for `cidag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cidag",
    version,
    about = "Run a CI workflow locally: matrix expansion, job DAG scheduling, keyed caching.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow document (YAML).
    #[arg(long, value_name = "PATH", default_value = ".github/workflows/ci.yml")]
    pub workflow: String,

    /// Path to the engine config (TOML). Missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "Cidag.toml")]
    pub config: String,

    /// Event kind to simulate.
    #[arg(long, value_enum, default_value = "push")]
    pub event: EventArg,

    /// Target branch of the simulated event.
    #[arg(long, value_name = "NAME", default_value = "main")]
    pub branch: String,

    /// Maximum number of job instances running at once.
    ///
    /// Overrides `[engine].concurrency`.
    #[arg(long, value_name = "K")]
    pub concurrency: Option<usize>,

    /// Reject unknown keys in the workflow instead of warning.
    #[arg(long)]
    pub strict: bool,

    /// Run only this job and the jobs it (transitively) needs.
    #[arg(long, value_name = "NAME")]
    pub job: Option<String>,

    /// Parse, expand and print the plan without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CIDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Colorize the run summary.
    #[arg(long, value_enum, default_value = "auto")]
    pub color: ColorMode,
}

/// Event kinds accepted on the command line.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum EventArg {
    Push,
    #[value(name = "pull_request", alias = "pull-request")]
    PullRequest,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_of(args: &[&str]) -> EventKind {
        let mut argv = vec!["cidag"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap().event.into()
    }

    #[test]
    fn event_names_match_workflow_keys() {
        assert_eq!(event_of(&[]), EventKind::Push);
        assert_eq!(event_of(&["--event", "push"]), EventKind::Push);
        assert_eq!(event_of(&["--event", "pull_request"]), EventKind::PullRequest);
        assert_eq!(event_of(&["--event", "pull-request"]), EventKind::PullRequest);
        assert!(CliArgs::try_parse_from(["cidag", "--event", "release"]).is_err());
    }

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["cidag"]).unwrap();
        assert_eq!(args.workflow, ".github/workflows/ci.yml");
        assert_eq!(args.config, "Cidag.toml");
        assert_eq!(args.branch, "main");
        assert_eq!(args.concurrency, None);
        assert!(!args.dry_run && !args.strict);
    }
}
