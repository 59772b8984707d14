//! Authority catalog of official OUAC programs, indexed by code and by university.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use oua_adapters::{normalize_program, normalize_university, NormalizationRules};
use oua_core::{AuthorityEntry, RawAuthorityEntry};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalNames {
    pub program_name: String,
    pub university: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuthorityCatalog {
    entries: Vec<AuthorityEntry>,
    by_code: HashMap<String, Vec<usize>>,
    by_university: HashMap<String, Vec<usize>>,
    /// Distinct `university_norm` values in first-seen order.
    universities: Vec<String>,
}

fn code_key(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl AuthorityCatalog {
    /// Load the catalog JSON at `path`. A missing file yields an empty catalog.
    pub fn load(path: &Path, rules: &NormalizationRules) -> Result<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "authority catalog not found; every row will stay unmatched"
            );
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let raw: Vec<RawAuthorityEntry> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let catalog = Self::from_raw(raw, rules);
        info!(
            entries = catalog.len(),
            universities = catalog.universities.len(),
            "loaded authority catalog"
        );
        Ok(catalog)
    }

    pub fn from_raw(raw: Vec<RawAuthorityEntry>, rules: &NormalizationRules) -> Self {
        let entries = raw
            .into_iter()
            .map(|r| AuthorityEntry {
                code: code_key(&r.code),
                program_norm: normalize_program(&r.program_name, &r.university, rules),
                university_norm: normalize_university(&r.university, rules),
                program_name: r.program_name,
                university_slug: r.university_slug,
                university: r.university,
            })
            .collect();
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<AuthorityEntry>) -> Self {
        let mut by_code: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_university: HashMap<String, Vec<usize>> = HashMap::new();
        let mut universities = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_code.entry(entry.code.clone()).or_default().push(idx);
            let slot = by_university.entry(entry.university_norm.clone()).or_default();
            if slot.is_empty() {
                universities.push(entry.university_norm.clone());
            }
            slot.push(idx);
        }
        Self {
            entries,
            by_code,
            by_university,
            universities,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AuthorityEntry] {
        &self.entries
    }

    pub fn universities(&self) -> &[String] {
        &self.universities
    }

    pub fn is_valid_code(&self, code: &str) -> bool {
        !code.trim().is_empty() && self.by_code.contains_key(&code_key(code))
    }

    /// Entries sharing `code`, in catalog order. Case-insensitive.
    pub fn lookup_by_code(&self, code: &str) -> Vec<&AuthorityEntry> {
        self.resolve(self.by_code.get(&code_key(code)))
    }

    pub fn programs_at(&self, university_norm: &str) -> Vec<&AuthorityEntry> {
        self.resolve(self.by_university.get(university_norm))
    }

    /// The entry for `code` at `university_norm`, else the first entry for `code`.
    pub fn entry_for(&self, code: &str, university_norm: &str) -> Option<&AuthorityEntry> {
        let hits = self.lookup_by_code(code);
        hits.iter()
            .find(|e| e.university_norm == university_norm)
            .or_else(|| hits.first())
            .copied()
    }

    /// Official names for display.
    pub fn canonical_names(&self, code: &str, university_norm: &str) -> Option<CanonicalNames> {
        self.entry_for(code, university_norm).map(|e| CanonicalNames {
            program_name: e.program_name.clone(),
            university: e.university.clone(),
        })
    }

    /// `"{CODE}:{university_slug}"`, e.g. `WCS:waterloo`.
    pub fn group_key(entry: &AuthorityEntry) -> String {
        format!("{}:{}", entry.code, entry.university_slug)
    }

    fn resolve(&self, indexes: Option<&Vec<usize>>) -> Vec<&AuthorityEntry> {
        indexes
            .map(|idxs| idxs.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }
}
