// src/expr/mod.rs

//! `${{ ... }}` expressions: interpolation in strings and `if:` conditions.
//!
//! - [`parser`] turns expression text into an [`Expr`] tree.
//! - [`eval`] evaluates a tree against an [`ExprContext`].
//! - [`interpolate`] renders templates containing placeholders.

pub mod eval;
pub mod interpolate;
pub mod parser;

pub use eval::{
    evaluate, host_runner_arch, host_runner_os, ExprContext, FunctionHost, NoFunctions,
    StatusContext, Value,
};
pub use interpolate::{check_placeholders, interpolate};
pub use parser::{parse, Expr, ExprError};

/// A parsed `if:` condition.
///
/// Conditions without a status-check function are implicitly
/// `success() && (<expr>)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse condition text; an enclosing `${{ }}` is optional.
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let trimmed = src.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|s| s.strip_suffix("}}"))
            .unwrap_or(trimmed);
        Ok(Self {
            source: src.to_string(),
            expr: parse(inner.trim())?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the condition can hold after an upstream failure.
    pub fn uses_status_function(&self) -> bool {
        self.expr.uses_status_function()
    }

    pub fn evaluate(&self, ctx: &ExprContext, host: &dyn FunctionHost) -> Result<bool, ExprError> {
        let value = evaluate(&self.expr, ctx, host)?.is_truthy();
        if self.uses_status_function() {
            Ok(value)
        } else {
            Ok(value && ctx.status.success && !ctx.status.cancelled)
        }
    }
}
