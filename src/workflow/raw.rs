// src/workflow/raw.rs

//! Serde mapping of the workflow YAML, before validation.
//!
//! Fields whose YAML shape varies (`env` values, `if`, `runs-on`, matrix
//! values) are kept as [`serde_yaml::Value`] and normalised in
//! [`super::validate`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflow {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub on: Option<RawTrigger>,

    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Kept as a mapping so declaration order survives.
    #[serde(default)]
    pub jobs: Option<Mapping>,
}

/// `on:` in any of its three shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTrigger {
    Single(String),
    List(Vec<String>),
    Detailed(BTreeMap<String, Option<RawEventFilter>>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawEventFilter {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub branches_ignore: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawJob {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub runs_on: Option<Value>,
    #[serde(default)]
    pub needs: Option<OneOrMany>,
    #[serde(default, rename = "if")]
    pub condition: Option<Value>,
    #[serde(default)]
    pub strategy: Option<RawStrategy>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default)]
    pub steps: Option<Vec<RawStep>>,
    #[serde(default)]
    pub continue_on_error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawStrategy {
    #[serde(default)]
    pub matrix: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: BTreeMap<String, Value>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default, rename = "if")]
    pub condition: Option<Value>,
    #[serde(default)]
    pub continue_on_error: Option<Value>,
    #[serde(default)]
    pub working_directory: Option<String>,
}
