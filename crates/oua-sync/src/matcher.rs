//! Tiered resolution of a row to an authority catalog entry.
//!
//! Tiers, first hit wins: manual override, direct code, fuzzy program match
//! within the best-matching university, fuzzy program match across the whole
//! catalog. A row that clears none of them stays uncoded.

use oua_core::AuthorityEntry;
use serde::Serialize;

use crate::catalog::AuthorityCatalog;
use crate::overrides::OverrideTable;
use crate::similarity::token_set_similarity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Lowest program score accepted within a university when the margin rule holds.
    pub min_score: f64,
    /// Lowest university similarity for a catalog university to be considered the row's.
    pub university_floor: f64,
    /// Required lead of the best candidate over the runner-up.
    pub clear_margin: f64,
    /// Score at which a within-university match skips the margin rule.
    /// The global tier requires it in addition to the margin.
    pub high_confidence: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_score: 0.80,
            university_floor: 0.6,
            clear_margin: 0.08,
            high_confidence: 0.92,
        }
    }
}

impl MatchConfig {
    pub fn within_university_accepts(&self, best: f64, second: f64) -> bool {
        (best >= self.min_score && best - second > self.clear_margin) || best >= self.high_confidence
    }

    pub fn global_accepts(&self, best: f64, second: f64) -> bool {
        best >= self.high_confidence && best - second > self.clear_margin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Override,
    Code,
    WithinUniversity,
    Global,
}

#[derive(Debug, Clone, Copy)]
pub struct OuacMatch<'a> {
    pub entry: &'a AuthorityEntry,
    pub tier: MatchTier,
    pub score: f64,
}

pub struct OuacMatcher {
    catalog: AuthorityCatalog,
    overrides: OverrideTable,
    config: MatchConfig,
}

impl OuacMatcher {
    pub fn new(catalog: AuthorityCatalog, overrides: OverrideTable) -> Self {
        Self {
            catalog,
            overrides,
            config: MatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(&self) -> &AuthorityCatalog {
        &self.catalog
    }

    pub fn match_row(
        &self,
        raw_code: Option<&str>,
        program_norm: &str,
        university_norm: &str,
    ) -> Option<OuacMatch<'_>> {
        self.match_override(program_norm, university_norm)
            .or_else(|| raw_code.and_then(|code| self.match_code(code, university_norm)))
            .or_else(|| self.match_within_university(program_norm, university_norm))
            .or_else(|| self.match_global(program_norm))
    }

    fn match_override(&self, program_norm: &str, university_norm: &str) -> Option<OuacMatch<'_>> {
        let code = self.overrides.code_for(program_norm, university_norm)?;
        let entry = self.catalog.entry_for(code, university_norm)?;
        Some(OuacMatch {
            entry,
            tier: MatchTier::Override,
            score: 1.0,
        })
    }

    /// A code missing from the catalog falls through to the fuzzy tiers.
    fn match_code(&self, raw_code: &str, university_norm: &str) -> Option<OuacMatch<'_>> {
        if raw_code.trim().is_empty() {
            return None;
        }
        let hits = self.catalog.lookup_by_code(raw_code);
        let first = *hits.first()?;
        if hits.len() == 1 {
            return Some(OuacMatch {
                entry: first,
                tier: MatchTier::Code,
                score: 1.0,
            });
        }
        let (best, score) = best_scored(
            hits.iter()
                .map(|h| (*h, token_set_similarity(university_norm, &h.university_norm))),
        )?;
        let entry = if score >= self.config.university_floor { best } else { first };
        Some(OuacMatch {
            entry,
            tier: MatchTier::Code,
            score,
        })
    }

    fn match_within_university(&self, program_norm: &str, university_norm: &str) -> Option<OuacMatch<'_>> {
        let mut best_university: Option<&str> = None;
        let mut best_university_score = 0.0;
        for candidate in self.catalog.universities() {
            let score = token_set_similarity(university_norm, candidate);
            if score > best_university_score {
                best_university_score = score;
                best_university = Some(candidate.as_str());
            }
        }
        let university = best_university.filter(|_| best_university_score >= self.config.university_floor)?;

        let ranked = rank_programs(program_norm, self.catalog.programs_at(university));
        let (entry, best) = *ranked.first()?;
        let second = ranked.get(1).map_or(0.0, |(_, s)| *s);
        self.config
            .within_university_accepts(best, second)
            .then_some(OuacMatch {
                entry,
                tier: MatchTier::WithinUniversity,
                score: best,
            })
    }

    fn match_global(&self, program_norm: &str) -> Option<OuacMatch<'_>> {
        let ranked = rank_programs(program_norm, self.catalog.entries().iter().collect());
        let (entry, best) = *ranked.first()?;
        let second = ranked.get(1).map_or(0.0, |(_, s)| *s);
        self.config.global_accepts(best, second).then_some(OuacMatch {
            entry,
            tier: MatchTier::Global,
            score: best,
        })
    }
}

/// Candidates scored against `program_norm`, best first. Ties keep catalog order.
fn rank_programs<'a>(program_norm: &str, candidates: Vec<&'a AuthorityEntry>) -> Vec<(&'a AuthorityEntry, f64)> {
    let mut ranked: Vec<_> = candidates
        .into_iter()
        .map(|c| (c, token_set_similarity(program_norm, &c.program_norm)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// Highest score, earliest candidate on ties.
fn best_scored<'a>(
    scored: impl Iterator<Item = (&'a AuthorityEntry, f64)>,
) -> Option<(&'a AuthorityEntry, f64)> {
    scored.fold(None, |best, (entry, score)| match best {
        Some((_, best_score)) if best_score >= score => best,
        _ => Some((entry, score)),
    })
}
