//! University rule tables loaded from `rules/universities.yaml`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::normalize::collapse_alnum;

#[derive(Debug, Clone, Deserialize)]
struct UniversityRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    aliases: Vec<AliasRule>,
    #[serde(default)]
    abbreviations: Vec<AbbreviationRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct AliasRule {
    canonical: String,
    variants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AbbreviationRule {
    canonical: String,
    prefixes: Vec<String>,
}

/// Read-only lookup tables used by the university and program normalizers.
#[derive(Debug, Clone, Default)]
pub struct NormalizationRules {
    /// cleaned alias -> canonical university name
    aliases: HashMap<String, String>,
    /// canonical university name -> short forms seen at the start of program strings
    abbreviations: HashMap<String, Vec<String>>,
}

impl NormalizationRules {
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("universities.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: UniversityRulesFile = serde_yaml::from_str(text)?;
        let mut aliases = HashMap::new();
        for rule in file.aliases {
            let canonical = collapse_alnum(&rule.canonical);
            aliases.insert(canonical.clone(), canonical.clone());
            for variant in rule.variants {
                aliases.insert(collapse_alnum(&variant), canonical.clone());
            }
        }
        let abbreviations = file
            .abbreviations
            .into_iter()
            .map(|rule| (collapse_alnum(&rule.canonical), rule.prefixes))
            .collect();
        Ok(Self {
            aliases,
            abbreviations,
        })
    }

    pub fn canonical_university(&self, cleaned: &str) -> Option<&str> {
        self.aliases.get(cleaned).map(String::as_str)
    }

    pub fn abbreviations_for(&self, canonical: &str) -> &[String] {
        self.abbreviations
            .get(canonical)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
