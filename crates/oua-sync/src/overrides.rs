//! Manual `(program_norm, university_norm) -> code` corrections from `rules/overrides.yaml`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct OverridesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    overrides: Vec<OverrideRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct OverrideRule {
    program_norm: String,
    university_norm: String,
    code: String,
}

#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    codes: HashMap<(String, String), String>,
}

impl OverrideTable {
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("overrides.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: OverridesFile = serde_yaml::from_str(text)?;
        Ok(file
            .overrides
            .into_iter()
            .map(|rule| (rule.program_norm, rule.university_norm, rule.code))
            .collect())
    }

    pub fn code_for(&self, program_norm: &str, university_norm: &str) -> Option<&str> {
        self.codes
            .get(&(program_norm.to_string(), university_norm.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl FromIterator<(String, String, String)> for OverrideTable {
    fn from_iter<I: IntoIterator<Item = (String, String, String)>>(iter: I) -> Self {
        let codes = iter
            .into_iter()
            .map(|(program_norm, university_norm, code)| {
                ((program_norm, university_norm), code.trim().to_ascii_uppercase())
            })
            .collect();
        Self { codes }
    }
}
