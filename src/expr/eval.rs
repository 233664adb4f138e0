// src/expr/eval.rs

//! Expression evaluation against the run/job/step contexts.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::anyhow;

use super::parser::{Expr, ExprError};

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    /// Loose equality: booleans compare as booleans, everything else as
    /// case-insensitive text.
    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (a, b) => a.to_string().eq_ignore_ascii_case(&b.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Inputs of the status-check functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusContext {
    /// Everything before this point succeeded.
    pub success: bool,
    /// Something before this point failed.
    pub failure: bool,
    /// The run is being cancelled.
    pub cancelled: bool,
}

impl Default for StatusContext {
    fn default() -> Self {
        Self {
            success: true,
            failure: false,
            cancelled: false,
        }
    }
}

/// Named values visible to expressions.
#[derive(Debug, Clone, Default)]
pub struct ExprContext {
    pub matrix: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub runner_os: String,
    pub runner_arch: String,
    pub event_name: String,
    pub ref_name: String,
    pub status: StatusContext,
}

impl ExprContext {
    /// Context for the machine running the engine.
    pub fn for_host() -> Self {
        Self {
            runner_os: host_runner_os().to_string(),
            runner_arch: host_runner_arch().to_string(),
            ..Default::default()
        }
    }

    /// Resolve a dotted path such as `matrix.os`. Unknown paths are `Null`.
    pub fn lookup(&self, path: &[String]) -> Value {
        let opt = |v: Option<&String>| v.map(|s| Value::String(s.clone())).unwrap_or(Value::Null);
        match path {
            [root, key] if root == "matrix" => opt(self.matrix.get(key)),
            [root, key] if root == "env" => opt(self.env.get(key)),
            [root, key] if root == "runner" && key == "os" => Value::String(self.runner_os.clone()),
            [root, key] if root == "runner" && key == "arch" => {
                Value::String(self.runner_arch.clone())
            }
            [root, key] if root == "github" && key == "event_name" => {
                Value::String(self.event_name.clone())
            }
            [root, key] if root == "github" && key == "ref_name" => {
                Value::String(self.ref_name.clone())
            }
            [root, key] if root == "github" && key == "ref" => {
                Value::String(format!("refs/heads/{}", self.ref_name))
            }
            _ => Value::Null,
        }
    }
}

/// `runner.os` value for the current host.
pub fn host_runner_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "windows" => "Windows",
        "macos" => "macOS",
        other => other,
    }
}

/// `runner.arch` value for the current host.
pub fn host_runner_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "X64",
        "x86" => "X86",
        "aarch64" => "ARM64",
        "arm" => "ARM",
        other => other,
    }
}

/// Side-effecting functions an expression may call.
pub trait FunctionHost: Send + Sync {
    /// `hashFiles(...)`: digest of every file matching any pattern.
    fn hash_files(&self, patterns: &[String]) -> anyhow::Result<String>;
}

/// Host for contexts where no filesystem is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFunctions;

impl FunctionHost for NoFunctions {
    fn hash_files(&self, _patterns: &[String]) -> anyhow::Result<String> {
        Err(anyhow!("hashFiles is not available in this context"))
    }
}

/// Evaluate an expression tree.
pub fn evaluate(
    expr: &Expr,
    ctx: &ExprContext,
    host: &dyn FunctionHost,
) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Context(path) => Ok(ctx.lookup(path)),
        Expr::Not(inner) => Ok(Value::Bool(!evaluate(inner, ctx, host)?.is_truthy())),
        Expr::And(a, b) => {
            let left = evaluate(a, ctx, host)?;
            if !left.is_truthy() {
                return Ok(left);
            }
            evaluate(b, ctx, host)
        }
        Expr::Or(a, b) => {
            let left = evaluate(a, ctx, host)?;
            if left.is_truthy() {
                return Ok(left);
            }
            evaluate(b, ctx, host)
        }
        Expr::Eq(a, b) => Ok(Value::Bool(
            evaluate(a, ctx, host)?.loose_eq(&evaluate(b, ctx, host)?),
        )),
        Expr::Ne(a, b) => Ok(Value::Bool(
            !evaluate(a, ctx, host)?.loose_eq(&evaluate(b, ctx, host)?),
        )),
        Expr::Call { name, args } => call(name, args, ctx, host),
    }
}

fn call(
    name: &str,
    args: &[Expr],
    ctx: &ExprContext,
    host: &dyn FunctionHost,
) -> Result<Value, ExprError> {
    let values = args
        .iter()
        .map(|a| evaluate(a, ctx, host))
        .collect::<Result<Vec<_>, _>>()?;

    let two_strings = |values: &[Value]| -> Result<(String, String), ExprError> {
        match values {
            [a, b] => Ok((a.to_string().to_lowercase(), b.to_string().to_lowercase())),
            _ => Err(ExprError::Function {
                name: name.to_string(),
                message: format!("expected 2 arguments, got {}", values.len()),
            }),
        }
    };

    match name {
        "success" => Ok(Value::Bool(ctx.status.success && !ctx.status.cancelled)),
        "failure" => Ok(Value::Bool(ctx.status.failure)),
        "always" => Ok(Value::Bool(true)),
        "cancelled" => Ok(Value::Bool(ctx.status.cancelled)),
        "contains" => {
            let (hay, needle) = two_strings(&values)?;
            Ok(Value::Bool(hay.contains(&needle)))
        }
        "startswith" => {
            let (s, prefix) = two_strings(&values)?;
            Ok(Value::Bool(s.starts_with(&prefix)))
        }
        "endswith" => {
            let (s, suffix) = two_strings(&values)?;
            Ok(Value::Bool(s.ends_with(&suffix)))
        }
        "hashfiles" => {
            let patterns: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            host.hash_files(&patterns)
                .map(Value::String)
                .map_err(|e| ExprError::Function {
                    name: "hashFiles".to_string(),
                    message: format!("{e:#}"),
                })
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;

    fn ctx() -> ExprContext {
        let mut ctx = ExprContext::default();
        ctx.matrix.insert("os".into(), "Windows-Latest".into());
        ctx.env.insert("RUSTFLAGS".into(), "-D warnings".into());
        ctx.event_name = "push".into();
        ctx.ref_name = "main".into();
        ctx
    }

    fn eval(src: &str) -> Value {
        evaluate(&parse(src).unwrap(), &ctx(), &NoFunctions).unwrap()
    }

    #[test]
    fn string_comparison_ignores_case() {
        assert_eq!(eval("matrix.os == 'windows-latest'"), Value::Bool(true));
        assert_eq!(eval("github.event_name != 'push'"), Value::Bool(false));
    }

    #[test]
    fn missing_context_is_null_and_falsy() {
        assert!(!eval("matrix.toolchain").is_truthy());
        assert!(eval("!env.MISSING").is_truthy());
    }

    #[test]
    fn or_returns_first_truthy_operand() {
        assert_eq!(eval("env.MISSING || 'fallback'"), Value::String("fallback".into()));
    }

    #[test]
    fn string_helpers() {
        assert_eq!(eval("startsWith(github.ref, 'refs/heads/')"), Value::Bool(true));
        assert_eq!(eval("contains(env.RUSTFLAGS, 'WARNINGS')"), Value::Bool(true));
        assert_eq!(eval("endsWith(matrix.os, 'beta')"), Value::Bool(false));
    }

    #[test]
    fn hash_files_without_host_is_an_error() {
        let err = evaluate(&parse("hashFiles('**/Cargo.lock')").unwrap(), &ctx(), &NoFunctions)
            .unwrap_err();
        assert!(matches!(err, ExprError::Function { .. }));
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
    }
}
