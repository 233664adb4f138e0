// src/workflow/mod.rs

//! Workflow documents.
//!
//! - [`model`] is the validated, immutable in-memory form.
//! - [`raw`] is the serde mapping of the YAML text.
//! - [`schema`] flags unknown keys (strict mode).
//! - [`validate`] converts raw into model and checks structure and cycles.
//! - [`loader`] ties the above together for text and files.

pub mod loader;
pub mod model;
pub mod raw;
pub mod schema;
pub mod validate;

pub use loader::{load_from_path, load_from_str, LoadOptions};
pub use model::{
    BranchFilter, EventKind, JobName, JobSpec, Matrix, MatrixEntry, StepKind, StepSpec,
    Triggers, WorkflowDocument,
};
