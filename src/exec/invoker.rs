// src/exec/invoker.rs

//! Boundary to external commands and actions.
//!
//! The step executor hands an [`InvocationRequest`] to an [`ActionInvoker`]
//! and gets back an exit code and captured output. It never looks inside.
//! [`LocalInvoker`] runs `run:` scripts through a shell and emulates a few
//! actions on the local machine.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::exec::cancelled;
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::UnknownActionPolicy;

/// Host variables every process needs to function at all.
const HOST_ESSENTIALS: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "SHELL", "TMPDIR", "TMP", "TEMP", "LANG", "LC_ALL",
    "CARGO_HOME", "RUSTUP_HOME", "RUSTUP_TOOLCHAIN", "SYSTEMROOT", "SystemRoot", "COMSPEC",
    "PATHEXT", "USERPROFILE", "APPDATA", "LOCALAPPDATA", "WINDIR",
];

/// Directories checkout never copies.
const CHECKOUT_SKIP_DIRS: &[&str] = &[".git", "target", ".cidag"];

/// What to invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `uses:` reference with resolved `with:` parameters.
    Action {
        reference: String,
        with: BTreeMap<String, String>,
    },
    /// `run:` script with an optional explicit shell.
    Command {
        script: String,
        shell: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub invocation: Invocation,
    /// Complete environment for the process; nothing else is inherited
    /// besides the host essentials.
    pub env: Arc<BTreeMap<String, String>>,
    pub working_dir: PathBuf,
    /// Step label for logs.
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutput {
    pub exit_code: i32,
    pub output: String,
    /// The action was not emulated and counted as a no-op.
    pub skipped: bool,
    /// The process was signalled to stop.
    pub cancelled: bool,
}

impl InvocationOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            ..Default::default()
        }
    }
}

pub type InvocationFuture<'a> = Pin<Box<dyn Future<Output = Result<InvocationOutput>> + Send + 'a>>;

/// Opaque capability that runs one step's command or action.
///
/// `cancel` flips to `true` when the instance is cancelled; implementations
/// should stop their process and return promptly.
pub trait ActionInvoker: Send + Sync + Debug {
    fn invoke(&self, request: InvocationRequest, cancel: watch::Receiver<bool>) -> InvocationFuture<'_>;
}

/// Runs commands on the local machine.
#[derive(Debug, Clone)]
pub struct LocalInvoker {
    /// Repository root that `actions/checkout` copies from.
    source_dir: PathBuf,
    /// Action reference prefix -> emulating shell command.
    actions: BTreeMap<String, String>,
    unknown_actions: UnknownActionPolicy,
    cancel_grace: Duration,
}

impl LocalInvoker {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        actions: BTreeMap<String, String>,
        unknown_actions: UnknownActionPolicy,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            actions,
            unknown_actions,
            cancel_grace,
        }
    }

    /// Longest `[actions]` prefix matching `reference`.
    fn mapped_action(&self, reference: &str) -> Option<&str> {
        self.actions
            .iter()
            .filter(|(prefix, _)| reference.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, cmd)| cmd.as_str())
    }

    async fn invoke_action(
        &self,
        request: &InvocationRequest,
        reference: &str,
        with: &BTreeMap<String, String>,
        cancel: watch::Receiver<bool>,
    ) -> Result<InvocationOutput> {
        if let Some(command) = self.mapped_action(reference) {
            debug!(action = %reference, %command, "running mapped action");
            let mut env = (*request.env).clone();
            for (k, v) in with {
                env.insert(input_var_name(k), v.clone());
            }
            let cmd = shell_command(command, None)?;
            return run_process(cmd, &env, &request.working_dir, cancel, self.cancel_grace).await;
        }

        let name = reference.split('@').next().unwrap_or(reference);
        if name.eq_ignore_ascii_case("actions/checkout") {
            let source = self.source_dir.clone();
            let dest = request.working_dir.clone();
            let copied = tokio::task::spawn_blocking(move || copy_tree(&RealFileSystem, &source, &dest))
                .await
                .context("checkout task panicked")??;
            info!(files = copied, "checked out sources into workspace");
            return Ok(InvocationOutput::success(format!("copied {copied} files")));
        }

        match self.unknown_actions {
            UnknownActionPolicy::Skip => {
                warn!(action = %reference, "action not emulated; skipping");
                Ok(InvocationOutput {
                    skipped: true,
                    ..InvocationOutput::success(format!("action {reference} not emulated; skipped"))
                })
            }
            UnknownActionPolicy::Fail => Ok(InvocationOutput::failure(
                1,
                format!("action {reference} is not available locally"),
            )),
        }
    }
}

impl ActionInvoker for LocalInvoker {
    fn invoke(&self, request: InvocationRequest, cancel: watch::Receiver<bool>) -> InvocationFuture<'_> {
        Box::pin(async move {
            match &request.invocation {
                Invocation::Command { script, shell } => {
                    let cmd = shell_command(script, shell.as_deref())?;
                    run_process(cmd, &request.env, &request.working_dir, cancel, self.cancel_grace)
                        .await
                }
                Invocation::Action { reference, with } => {
                    self.invoke_action(&request, reference, with, cancel).await
                }
            }
        })
    }
}

/// `with: { rust-version: x }` is visible as `INPUT_RUST-VERSION`.
fn input_var_name(key: &str) -> String {
    format!("INPUT_{}", key.replace(' ', "_").to_uppercase())
}

/// Build the process for a script under the requested shell.
pub fn shell_command(script: &str, shell: Option<&str>) -> Result<Command> {
    let shell = shell.map(str::trim).filter(|s| !s.is_empty());
    let (program, args): (&str, &[&str]) = match shell {
        None if cfg!(windows) => ("cmd", &["/D", "/C"][..]),
        None | Some("sh") => ("sh", &["-e", "-c"][..]),
        Some("bash") => ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"][..]),
        Some("pwsh") => ("pwsh", &["-NoProfile", "-NonInteractive", "-Command"][..]),
        Some("powershell") => ("powershell", &["-NoProfile", "-NonInteractive", "-Command"][..]),
        Some("cmd") => ("cmd", &["/D", "/C"][..]),
        Some("python") => ("python", &["-c"][..]),
        Some(other) => bail!("unsupported shell `{other}`"),
    };
    let mut cmd = Command::new(program);
    cmd.args(args).arg(script);
    Ok(cmd)
}

/// Spawn `cmd` with a clean environment and capture its output.
///
/// On cancellation the child is killed and given `grace` to exit.
pub async fn run_process(
    mut cmd: Command,
    env: &BTreeMap<String, String>,
    working_dir: &Path,
    mut cancel: watch::Receiver<bool>,
    grace: Duration,
) -> Result<InvocationOutput> {
    cmd.env_clear();
    for key in HOST_ESSENTIALS {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.envs(env)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process in {:?}", working_dir))?;

    let stdout = child.stdout.take().map(|s| tokio::spawn(collect_lines(s, "stdout")));
    let stderr = child.stderr.take().map(|s| tokio::spawn(collect_lines(s, "stderr")));

    let (exit_code, was_cancelled) = tokio::select! {
        status = child.wait() => {
            let status = status.context("waiting for child process")?;
            (status.code().unwrap_or(-1), false)
        }
        _ = cancelled(&mut cancel) => {
            info!("cancellation requested; killing step process");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to signal child process");
            }
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                warn!(grace_ms = grace.as_millis() as u64, "process did not exit within grace period");
            }
            (-1, true)
        }
    };

    let mut output = String::new();
    for reader in [stdout, stderr].into_iter().flatten() {
        // Readers end when the pipes close; after a kill they may not.
        match tokio::time::timeout(grace.max(Duration::from_millis(100)), reader).await {
            Ok(Ok(text)) => output.push_str(&text),
            Ok(Err(e)) => warn!(error = %e, "output reader task failed"),
            Err(_) => debug!("output reader did not finish; output truncated"),
        }
    }

    Ok(InvocationOutput {
        exit_code,
        output,
        skipped: false,
        cancelled: was_cancelled,
    })
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R, stream: &'static str) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut out = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stream, "{}", line);
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Copy every file under `source` into `dest`, skipping VCS, build and
/// engine directories. Returns the number of files copied.
pub fn copy_tree(fs: &dyn FileSystem, source: &Path, dest: &Path) -> Result<usize> {
    let skip = |dir: &Path| {
        dir.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| CHECKOUT_SKIP_DIRS.contains(&n))
    };
    let files = fs.walk_files(source, &skip)?;
    for file in &files {
        let rel = file
            .strip_prefix(source)
            .with_context(|| format!("{:?} is outside {:?}", file, source))?;
        fs.write(&dest.join(rel), &fs.read(file)?)?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn mapped_action_prefers_longest_prefix() {
        let mut actions = BTreeMap::new();
        actions.insert("dtolnay/".to_string(), "echo generic".to_string());
        actions.insert("dtolnay/rust-toolchain".to_string(), "rustup show".to_string());
        let inv = LocalInvoker::new(".", actions, UnknownActionPolicy::Skip, Duration::ZERO);
        assert_eq!(inv.mapped_action("dtolnay/rust-toolchain@stable"), Some("rustup show"));
        assert_eq!(inv.mapped_action("dtolnay/other@v1"), Some("echo generic"));
        assert_eq!(inv.mapped_action("actions/setup-node@v4"), None);
    }

    #[test]
    fn input_names_follow_action_convention() {
        assert_eq!(input_var_name("rust-version"), "INPUT_RUST-VERSION");
        assert_eq!(input_var_name("components"), "INPUT_COMPONENTS");
    }

    #[test]
    fn unsupported_shell_is_an_error() {
        assert!(shell_command("echo", Some("fish")).is_err());
        assert!(shell_command("echo", Some("bash")).is_ok());
    }

    #[test]
    fn copy_tree_skips_build_and_vcs_dirs() {
        let fs = MockFileSystem::with_files([
            ("/src/Cargo.toml", "[package]"),
            ("/src/src/lib.rs", "pub fn f() {}"),
            ("/src/.git/HEAD", "ref"),
            ("/src/target/debug/x", "bin"),
        ]);
        let n = copy_tree(&fs, Path::new("/src"), Path::new("/ws")).unwrap();
        assert_eq!(n, 2);
        assert!(fs.is_file(Path::new("/ws/src/lib.rs")));
        assert!(!fs.exists(Path::new("/ws/.git/HEAD")));
    }

    #[tokio::test]
    async fn unknown_action_follows_policy() {
        let (_tx, rx) = watch::channel(false);
        let request = InvocationRequest {
            invocation: Invocation::Action {
                reference: "someone/thing@v1".into(),
                with: BTreeMap::new(),
            },
            env: Arc::new(BTreeMap::new()),
            working_dir: PathBuf::from("."),
            label: "thing".into(),
        };

        let skip = LocalInvoker::new(".", BTreeMap::new(), UnknownActionPolicy::Skip, Duration::ZERO);
        let out = skip.invoke(request.clone(), rx.clone()).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.skipped);

        let fail = LocalInvoker::new(".", BTreeMap::new(), UnknownActionPolicy::Fail, Duration::ZERO);
        let out = fail.invoke(request, rx).await.unwrap();
        assert_ne!(out.exit_code, 0);
    }
}
