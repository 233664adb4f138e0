// src/logging.rs

//! Logging for `cidag`: `tracing` events on STDERR, so stdout stays free for
//! step output and the run summary.
//!
//! The filter comes from `--log-level`, else `CIDAG_LOG` (full `EnvFilter`
//! directives, e.g. `info,cidag::exec=debug`), else `info`. ANSI styling on
//! stderr follows `--color` the same way the summary does on stdout.
//!
//! Runs and job instances get their own spans ([`run_span`],
//! [`instance_span`]) so every nested event carries `run_id` and `instance`.

use std::io::IsTerminal;

use anyhow::{anyhow, Result};
use tracing::{info_span, warn, Span};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;
use crate::dag::ScheduledInstance;
use crate::trigger::EventDescriptor;
use crate::types::ColorMode;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "CIDAG_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, color: ColorMode) -> Result<()> {
    let env_value = std::env::var(LOG_ENV).ok();
    let (filter, rejected) = build_filter(cli_level, env_value.as_deref());

    let no_color = std::env::var("NO_COLOR").ok();
    let ansi = color.use_color(std::io::stderr().is_terminal(), no_color.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))?;

    if let Some(bad) = rejected {
        warn!(value = %bad, "ignoring invalid {LOG_ENV}; using `info`");
    }
    Ok(())
}

/// Filter plus the `CIDAG_LOG` value that was rejected, if any.
fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> (EnvFilter, Option<String>) {
    if let Some(level) = cli_level {
        return (EnvFilter::new(directive(level)), None);
    }
    match env_value.map(str::trim).filter(|s| !s.is_empty()) {
        None => (EnvFilter::new("info"), None),
        Some(raw) => match EnvFilter::try_new(raw) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new("info"), Some(raw.to_string())),
        },
    }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Span covering one run from registration to its last completion.
pub fn run_span(run_id: u64, event: &EventDescriptor) -> Span {
    info_span!("run", run_id, event = %event.kind, branch = %event.branch)
}

/// Span covering one job instance's task. Spawned tasks do not inherit the
/// run span, so the run id is repeated here.
pub fn instance_span(scheduled: &ScheduledInstance) -> Span {
    info_span!("instance", run_id = scheduled.run_id, instance = %scheduled.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    fn max_level(filter: &EnvFilter) -> Option<LevelFilter> {
        filter.max_level_hint()
    }

    #[test]
    fn cli_level_wins_over_env() {
        let (filter, rejected) = build_filter(Some(LogLevel::Warn), Some("trace"));
        assert_eq!(max_level(&filter), Some(LevelFilter::WARN));
        assert_eq!(rejected, None);
    }

    #[test]
    fn env_accepts_per_module_directives() {
        let (filter, rejected) = build_filter(None, Some(" info,cidag::exec=debug "));
        assert_eq!(max_level(&filter), Some(LevelFilter::DEBUG));
        assert_eq!(rejected, None);
    }

    #[test]
    fn invalid_env_falls_back_to_info() {
        let (filter, rejected) = build_filter(None, Some("cidag=loud"));
        assert_eq!(max_level(&filter), Some(LevelFilter::INFO));
        assert_eq!(rejected.as_deref(), Some("cidag=loud"));

        let (filter, rejected) = build_filter(None, Some("   "));
        assert_eq!(max_level(&filter), Some(LevelFilter::INFO));
        assert_eq!(rejected, None);
    }
}
