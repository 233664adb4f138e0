// src/expr/interpolate.rs

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::eval::{evaluate, ExprContext, FunctionHost};
use super::parser::{parse, ExprError};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{(.*?)\}\}").expect("placeholder regex is valid")
});

/// Replace every `${{ expr }}` in `template` with the rendered value.
///
/// Text outside placeholders is copied verbatim. The first failing
/// placeholder aborts the whole substitution.
pub fn interpolate(
    template: &str,
    ctx: &ExprContext,
    host: &dyn FunctionHost,
) -> Result<String, ExprError> {
    if !template.contains("${{") {
        return Ok(template.to_string());
    }

    let mut first_error = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        if first_error.is_some() {
            return String::new();
        }
        match parse(caps[1].trim()).and_then(|expr| evaluate(&expr, ctx, host)) {
            Ok(value) => value.to_string(),
            Err(e) => {
                first_error = Some(e);
                String::new()
            }
        }
    });

    match first_error {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

/// Parse every placeholder in `template` without evaluating, so load-time
/// validation can reject broken expressions.
pub fn check_placeholders(template: &str) -> Result<(), ExprError> {
    for caps in PLACEHOLDER.captures_iter(template) {
        parse(caps[1].trim())?;
    }
    Ok(())
}
