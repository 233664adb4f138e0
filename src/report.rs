// src/report.rs

//! Human-readable run summary written to stdout.
//!
//! Captured output under failed steps is word-wrapped to the terminal width,
//! or [`DEFAULT_LINE_WIDTH`] when stdout is not a terminal.

use std::fmt::{self, Write as _};
use std::io::IsTerminal;

use console::{measure_text_width, strip_ansi_codes, style, StyledObject, Term};

use crate::aggregate::{RunVerdict, Verdict};
use crate::dag::{InstanceState, SkipReason};
use crate::run_result::{RunResult, StepStatus};
use crate::types::ColorMode;

/// Lines of captured output shown under a failed step.
const FAILED_OUTPUT_TAIL: usize = 20;

/// Line width used when stdout is not a terminal.
pub const DEFAULT_LINE_WIDTH: usize = 80;

/// Narrowest column wrapped output is squeezed into.
const MIN_WRAP_WIDTH: usize = 20;

const OUTPUT_INDENT: &str = "        ";

/// How the summary is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub color: bool,
    pub line_width: usize,
}

impl RenderOptions {
    /// Options for this process's stdout.
    pub fn for_stdout(mode: ColorMode) -> Self {
        Self {
            color: stdout_uses_color(mode),
            line_width: stdout_line_width(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Painter {
    color: bool,
}

impl Painter {
    fn paint(&self, text: impl fmt::Display) -> StyledObject<String> {
        style(text.to_string()).force_styling(self.color)
    }

    fn green(&self, text: impl fmt::Display) -> StyledObject<String> {
        self.paint(text).bright().green()
    }

    fn red(&self, text: impl fmt::Display) -> StyledObject<String> {
        self.paint(text).bright().red()
    }

    fn yellow(&self, text: impl fmt::Display) -> StyledObject<String> {
        self.paint(text).yellow()
    }

    fn dim(&self, text: impl fmt::Display) -> StyledObject<String> {
        self.paint(text).dim()
    }

    fn bold(&self, text: impl fmt::Display) -> StyledObject<String> {
        self.paint(text).bold()
    }

    fn state(&self, state: InstanceState) -> StyledObject<String> {
        match state {
            InstanceState::Succeeded => self.green(state),
            InstanceState::Failed | InstanceState::Skipped(SkipReason::UpstreamFailed) => {
                self.red(state)
            }
            InstanceState::Cancelled => self.yellow(state),
            _ => self.dim(state),
        }
    }

    fn step(&self, status: &StepStatus) -> StyledObject<String> {
        match status {
            StepStatus::Succeeded => self.green(status),
            StepStatus::Failed { continued: true, .. } => self.yellow(status),
            StepStatus::Failed { .. } => self.red(status),
            StepStatus::Cancelled => self.yellow(status),
            StepStatus::Skipped => self.dim(status),
        }
    }
}

/// Whether the summary should carry ANSI styles on this process's stdout.
pub fn stdout_uses_color(mode: ColorMode) -> bool {
    let no_color = std::env::var("NO_COLOR").ok();
    mode.use_color(std::io::stdout().is_terminal(), no_color.as_deref())
}

/// Terminal width of stdout, or [`DEFAULT_LINE_WIDTH`].
pub fn stdout_line_width() -> usize {
    Term::stdout()
        .size_checked()
        .map(|(_, cols)| usize::from(cols))
        .filter(|&cols| cols > 0)
        .unwrap_or(DEFAULT_LINE_WIDTH)
}

/// Render the per-instance table, step statuses and the verdict.
pub fn render(result: &RunResult, verdict: &RunVerdict, opts: RenderOptions) -> String {
    let p = Painter { color: opts.color };
    let wrap_width = opts
        .line_width
        .saturating_sub(OUTPUT_INDENT.len())
        .max(MIN_WRAP_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{}", p.bold(format!("run {}", result.run_id)));
    for instance in &result.instances {
        let duration = instance
            .report
            .as_ref()
            .map(|r| format!(" {}", p.dim(format!("{:.1}s", r.duration.as_secs_f64()))))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<32} {}{}",
            instance.id.to_string(),
            p.state(instance.state),
            duration
        );

        let Some(report) = &instance.report else {
            continue;
        };
        for step in &report.steps {
            let _ = writeln!(out, "    - {:<28} {}", step.name, p.step(&step.status));
            if matches!(step.status, StepStatus::Failed { .. }) && !step.output.trim().is_empty() {
                for line in tail(&step.output, FAILED_OUTPUT_TAIL) {
                    for piece in wrap(&strip_ansi_codes(line), wrap_width) {
                        let _ = writeln!(out, "{OUTPUT_INDENT}{}", p.dim(piece));
                    }
                }
            }
        }
    }

    let summary = format!(
        "{} succeeded, {} failed, {} skipped, {} cancelled",
        result.count(|s| s == InstanceState::Succeeded),
        result.count(|s| s == InstanceState::Failed),
        result.count(|s| matches!(s, InstanceState::Skipped(_))),
        result.count(|s| s == InstanceState::Cancelled),
    );
    let _ = writeln!(out, "{}", p.dim(summary));

    let label = match verdict.outcome {
        Verdict::Success => p.green("verdict: success"),
        Verdict::Failure => p.red("verdict: failure"),
    };
    let _ = writeln!(out, "{}", p.bold(label));
    if !verdict.blocking.is_empty() {
        let names: Vec<String> = verdict.blocking.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "  blocking: {}", names.join(", "));
    }
    out
}

/// Print the summary to stdout.
pub fn print_summary(result: &RunResult, verdict: &RunVerdict, mode: ColorMode) {
    print!("{}", render(result, verdict, RenderOptions::for_stdout(mode)));
}

/// Greedy word wrap by display width. Words wider than `width` are split.
fn wrap(line: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0;

    for word in line.split_whitespace() {
        let word_width = measure_text_width(word);
        let needed = if current.is_empty() { word_width } else { current_width + 1 + word_width };
        if needed <= width {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            current_width = needed;
            continue;
        }

        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_width = 0;
        }
        if word_width <= width {
            current.push_str(word);
            current_width = word_width;
            continue;
        }
        for c in word.chars() {
            let w = measure_text_width(c.encode_utf8(&mut [0; 4]));
            if current_width + w > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_width = 0;
            }
            current.push(c);
            current_width += w;
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn tail(text: &str, n: usize) -> impl Iterator<Item = &str> {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines.into_iter().skip(skip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::InstanceOutcome;
    use crate::matrix::InstanceId;
    use crate::run_result::{InstanceResult, JobReport, StepReport};
    use std::time::Duration;

    fn plain(line_width: usize) -> RenderOptions {
        RenderOptions {
            color: false,
            line_width,
        }
    }

    fn sample() -> (RunResult, RunVerdict) {
        let copyright = InstanceId::plain("copyright");
        let result = RunResult {
            run_id: 3,
            instances: vec![
                InstanceResult {
                    id: InstanceId::with_combination(
                        "build",
                        vec![("os".into(), "linux".into())],
                    ),
                    state: InstanceState::Succeeded,
                    continue_on_error: false,
                    report: None,
                },
                InstanceResult {
                    id: copyright.clone(),
                    state: InstanceState::Failed,
                    continue_on_error: false,
                    report: Some(JobReport {
                        id: copyright.clone(),
                        outcome: InstanceOutcome::Failed,
                        steps: vec![StepReport::new(
                            "Check copyright",
                            StepStatus::Failed {
                                exit_code: Some(1),
                                continued: false,
                            },
                            "missing notice\n",
                        )],
                        duration: Duration::from_millis(1200),
                    }),
                },
            ],
        };
        let verdict = RunVerdict {
            outcome: Verdict::Failure,
            blocking: vec![copyright],
        };
        (result, verdict)
    }

    #[test]
    fn plain_render_lists_instances_steps_and_verdict() {
        let (result, verdict) = sample();
        let text = render(&result, &verdict, plain(DEFAULT_LINE_WIDTH));
        assert!(text.contains("build (linux)"));
        assert!(text.contains("Check copyright"));
        assert!(text.contains("failed (exit 1)"));
        assert!(text.contains("missing notice"));
        assert!(text.contains("1 succeeded, 1 failed, 0 skipped, 0 cancelled"));
        assert!(text.contains("verdict: failure"));
        assert!(text.contains("blocking: copyright"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn colored_render_has_escape_codes() {
        let (result, verdict) = sample();
        let opts = RenderOptions {
            color: true,
            line_width: DEFAULT_LINE_WIDTH,
        };
        assert!(render(&result, &verdict, opts).contains('\u{1b}'));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let got: Vec<&str> = tail("a\nb\nc\n", 2).collect();
        assert_eq!(got, vec!["b", "c"]);
    }

    #[test]
    fn wrap_breaks_on_words_and_splits_long_ones() {
        assert_eq!(wrap("error: could not compile cidag", 12), vec!["error: could", "not compile", "cidag"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("", 10), vec![String::new()]);
        assert_eq!(wrap("fits", 10), vec!["fits"]);
    }

    #[test]
    fn failed_output_wraps_to_line_width() {
        let (mut result, verdict) = sample();
        let long = "x".repeat(30) + " " + &"y".repeat(30);
        if let Some(report) = result.instances[1].report.as_mut() {
            report.steps[0].output = format!("\u{1b}[31m{long}\u{1b}[0m\n");
        }

        let text = render(&result, &verdict, plain(28));
        let wrapped: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with(OUTPUT_INDENT))
            .map(str::trim)
            .collect();
        assert_eq!(wrapped, vec!["x".repeat(20), "x".repeat(10), "y".repeat(20), "y".repeat(10)]);
        assert!(!text.contains('\u{1b}'), "captured escapes are stripped in plain mode");
    }
}
