// src/workflow/loader.rs

use std::fs;
use std::path::Path;

use tracing::info;

use crate::errors::{CidagError, Result};
use crate::workflow::model::WorkflowDocument;
use crate::workflow::raw::RawWorkflow;
use crate::workflow::schema::check_unknown_fields;

/// Options controlling how strictly a document is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Unknown keys are errors instead of warnings.
    pub strict: bool,
}

/// Parse and validate workflow text.
///
/// - YAML syntax errors and duplicate keys are `MalformedDocument`.
/// - Unknown keys are `UnknownField` in strict mode, warnings otherwise.
/// - Structural problems (missing steps, unknown `needs`) are
///   `MalformedDocument`; dependency cycles are `CyclicDependency`.
pub fn load_from_str(text: &str, options: LoadOptions) -> Result<WorkflowDocument> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|e| CidagError::MalformedDocument(e.to_string()))?;

    if !value.is_mapping() {
        return Err(CidagError::MalformedDocument(
            "workflow document must be a mapping".to_string(),
        ));
    }

    check_unknown_fields(&value, options.strict)?;

    let raw: RawWorkflow = serde_yaml::from_value(value)
        .map_err(|e| CidagError::MalformedDocument(e.to_string()))?;

    WorkflowDocument::try_from(raw)
}

/// Read a workflow file from disk and parse it with [`load_from_str`].
pub fn load_from_path(path: impl AsRef<Path>, options: LoadOptions) -> Result<WorkflowDocument> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let doc = load_from_str(&text, options)?;
    info!(
        path = %path.display(),
        jobs = doc.jobs().len(),
        "loaded workflow document"
    );
    Ok(doc)
}
