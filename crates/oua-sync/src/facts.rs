//! Curated per-program facts keyed by OUAC code: supplemental-application
//! requirement and the published admission average.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct ProgramFactsFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    supplemental_codes: Vec<String>,
    #[serde(default)]
    published_averages: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProgramFacts {
    supplemental: HashSet<String>,
    averages: HashMap<String, String>,
}

impl ProgramFacts {
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("program_facts.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: ProgramFactsFile = serde_yaml::from_str(text)?;
        Ok(Self {
            supplemental: file
                .supplemental_codes
                .iter()
                .map(|code| code.trim().to_ascii_uppercase())
                .collect(),
            averages: file
                .published_averages
                .into_iter()
                .map(|(code, text)| (code.trim().to_ascii_uppercase(), text))
                .collect(),
        })
    }

    pub fn requires_supplemental(&self, code: &str) -> bool {
        self.supplemental.contains(&code.trim().to_ascii_uppercase())
    }

    pub fn published_average(&self, code: &str) -> Option<&str> {
        self.averages
            .get(&code.trim().to_ascii_uppercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_case() {
        let facts = ProgramFacts::from_yaml_str(
            "version: 1\nsupplemental_codes: [wcs]\npublished_averages:\n  WCS: Low to mid-90s\n",
        )
        .expect("facts");
        assert!(facts.requires_supplemental("WCS"));
        assert!(facts.requires_supplemental("wcs"));
        assert!(!facts.requires_supplemental("WLS"));
        assert_eq!(facts.published_average("wcs"), Some("Low to mid-90s"));
        assert_eq!(facts.published_average("WLS"), None);
    }

    #[test]
    fn workspace_facts_load() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let facts = ProgramFacts::from_workspace_root(&root).expect("facts");
        assert!(facts.requires_supplemental("MNS"));
        assert!(!facts.requires_supplemental("WLS"));
        assert_eq!(facts.published_average("WLS"), Some("Low 80s"));
    }
}
