//! Second-pass code resolution for uncoded rows, using rows already coded
//! at the same university as the reference set.

use std::collections::{HashMap, HashSet};

use oua_core::AdmissionRecord;
use oua_storage::{row_hash, RowHashKey};
use serde::Serialize;

use crate::similarity::token_set_similarity;

/// How many scored candidates an unmatched row carries into the report.
const REPORTED_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackfillConfig {
    pub min_score: f64,
    /// Stricter than the matcher margin: the references are user rows, not the catalog.
    pub margin: f64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            min_score: 0.92,
            margin: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillCandidate {
    pub program_name_norm: String,
    pub ouac_code: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedRow {
    /// Grouping slug the row is stored under, usable with `lookup`.
    pub slug: String,
    pub academic_year: String,
    pub university: String,
    pub university_norm: String,
    pub program_name: String,
    pub program_name_norm: String,
    pub admission_grade: f64,
    pub source_file: String,
    pub candidates: Vec<BackfillCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillOutcome {
    pub backfilled: usize,
    pub unmatched: Vec<UnmatchedRow>,
}

/// Distinct `(program_name_norm, code)` pairs per university, first-seen order.
fn candidate_pool(records: &[AdmissionRecord]) -> HashMap<String, Vec<(String, String)>> {
    let mut seen = HashSet::new();
    let mut pool: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for record in records {
        let Some(code) = &record.ouac_code else {
            continue;
        };
        let key = (
            record.university_norm.clone(),
            record.program_name_norm.clone(),
            code.clone(),
        );
        if seen.insert(key) {
            pool.entry(record.university_norm.clone())
                .or_default()
                .push((record.program_name_norm.clone(), code.clone()));
        }
    }
    pool
}

/// Fill `ouac_code` on uncoded rows where one coded program at the same
/// university clearly matches. Backfilled rows get their hash recomputed.
pub fn backfill_codes(records: &mut [AdmissionRecord], config: BackfillConfig) -> BackfillOutcome {
    let pool = candidate_pool(records);
    let mut outcome = BackfillOutcome::default();

    for record in records.iter_mut().filter(|r| r.ouac_code.is_none()) {
        let mut scored: Vec<BackfillCandidate> = pool
            .get(&record.university_norm)
            .map(|candidates| {
                candidates
                    .iter()
                    .map(|(program_name_norm, code)| BackfillCandidate {
                        score: token_set_similarity(&record.program_name_norm, program_name_norm),
                        program_name_norm: program_name_norm.clone(),
                        ouac_code: code.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let best = scored.first().map_or(0.0, |c| c.score);
        let second = scored.get(1).map_or(0.0, |c| c.score);
        if !scored.is_empty() && best >= config.min_score && best - second > config.margin {
            record.ouac_code = Some(scored[0].ouac_code.clone());
            record.row_hash = row_hash(&RowHashKey::from_record(record));
            outcome.backfilled += 1;
            continue;
        }

        scored.truncate(REPORTED_CANDIDATES);
        outcome.unmatched.push(UnmatchedRow {
            slug: record.grouping_key().to_string(),
            academic_year: record.academic_year.clone(),
            university: record.university.clone(),
            university_norm: record.university_norm.clone(),
            program_name: record.program_name.clone(),
            program_name_norm: record.program_name_norm.clone(),
            admission_grade: record.admission_grade,
            source_file: record.source_file.clone(),
            candidates: scored,
        });
    }

    outcome
}
