//! Core domain model for the OUA admissions dataset.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "oua-core";

/// Lowest admission grade the canonical store accepts.
pub const MIN_ADMISSION_GRADE: f64 = 60.0;

/// Semantic fields a source CSV column can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    University,
    ProgramName,
    OuacCode,
    AdmissionGrade,
    AdmissionDate,
    Status,
    SupplementalRequired,
}

impl CanonicalField {
    /// Resolution order used by the header mapper. Earlier fields claim headers first.
    pub const ALL: [CanonicalField; 7] = [
        CanonicalField::University,
        CanonicalField::ProgramName,
        CanonicalField::OuacCode,
        CanonicalField::AdmissionGrade,
        CanonicalField::AdmissionDate,
        CanonicalField::Status,
        CanonicalField::SupplementalRequired,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::University => "university",
            Self::ProgramName => "program_name",
            Self::OuacCode => "ouac_code",
            Self::AdmissionGrade => "admission_grade",
            Self::AdmissionDate => "admission_date",
            Self::Status => "status",
            Self::SupplementalRequired => "supplemental_required",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-wide mapping from canonical field to the header that supplies it.
///
/// A field with no entry is unmapped: the file provides no values for it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    fields: BTreeMap<CanonicalField, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: CanonicalField, header: impl Into<String>) {
        self.fields.insert(field, header.into());
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    /// True when some field already claimed `header`.
    pub fn claims(&self, header: &str) -> bool {
        self.fields.values().any(|h| h == header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusNorm {
    Accepted,
    Rejected,
    Waitlisted,
    Unknown,
}

impl StatusNorm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Waitlisted => "waitlisted",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_stored(value: &str) -> Self {
        match value {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "waitlisted" => Self::Waitlisted,
            _ => Self::Unknown,
        }
    }
}

/// Normalized admission-date fields. Every field is optional; an all-`None`
/// value means the raw string carried no recognizable date information.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateFields {
    pub admission_date_iso: Option<String>,
    pub admission_month_iso: Option<String>,
    pub admission_month_label: Option<String>,
    pub admission_year: Option<i32>,
    pub round_label: Option<String>,
    pub round_order: Option<u32>,
}

impl DateFields {
    /// Rows with neither a resolved month nor an admission round are counted as unknown-date.
    pub fn is_unknown(&self) -> bool {
        self.admission_month_iso.is_none() && self.round_label.is_none()
    }
}

/// One catalog record as published in the authority dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuthorityEntry {
    pub code: String,
    pub program_name: String,
    pub university_slug: String,
    pub university: String,
}

/// Catalog record with its normalized matching keys precomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityEntry {
    /// Uppercase OUAC code, e.g. `WCS`.
    pub code: String,
    pub program_name: String,
    pub program_norm: String,
    pub university_slug: String,
    pub university: String,
    pub university_norm: String,
}

/// Canonical, deduplicated admission observation as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub row_hash: String,
    pub academic_year: String,
    pub university: String,
    pub university_norm: String,
    pub program_name: String,
    pub program_name_norm: String,
    pub ouac_code: Option<String>,
    pub admission_grade: f64,
    pub admission_date_raw: String,
    #[serde(flatten)]
    pub date: DateFields,
    pub supplemental_required: bool,
    pub status_normalized: StatusNorm,
    pub source_file: String,
    pub imported_at: DateTime<Utc>,
}

impl AdmissionRecord {
    /// Grouping key: the authority code at a university when known,
    /// otherwise the normalized program name at that university.
    pub fn grouping_key(&self) -> ProgramSlug {
        match &self.ouac_code {
            Some(code) => ProgramSlug::Authority {
                code: code.clone(),
                university_norm: self.university_norm.clone(),
            },
            None => ProgramSlug::Legacy {
                university_norm: self.university_norm.clone(),
                program_name_norm: self.program_name_norm.clone(),
            },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("empty program slug")]
    Empty,
    #[error("program slug `{0}` is missing its `--` separator")]
    MissingSeparator(String),
}

/// External identifier of one logical program.
///
/// `"{CODE}--{university_norm}"` for authority-coded programs,
/// `"{university_norm}--{program_name_norm}"` for the rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgramSlug {
    Authority {
        code: String,
        university_norm: String,
    },
    Legacy {
        university_norm: String,
        program_name_norm: String,
    },
}

fn looks_like_code(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {}
        _ => return false,
    }
    segment.len() <= 6
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

impl FromStr for ProgramSlug {
    type Err = SlugError;

    fn from_str(slug: &str) -> Result<Self, Self::Err> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(SlugError::Empty);
        }
        let Some((first, rest)) = slug.split_once("--") else {
            return Err(SlugError::MissingSeparator(slug.to_string()));
        };
        if looks_like_code(first) {
            Ok(Self::Authority {
                code: first.to_string(),
                university_norm: rest.to_string(),
            })
        } else {
            Ok(Self::Legacy {
                university_norm: first.to_string(),
                program_name_norm: rest.to_string(),
            })
        }
    }
}

impl fmt::Display for ProgramSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authority {
                code,
                university_norm,
            } => write!(f, "{code}--{university_norm}"),
            Self::Legacy {
                university_norm,
                program_name_norm,
            } => write!(f, "{university_norm}--{program_name_norm}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Clear the store, then import every file.
    Rebuild,
    /// Insert rows whose hash is not yet stored.
    Update,
}

impl ImportMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::Update => "update",
        }
    }
}

/// Operator-facing counts for one ingest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub mode: ImportMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<String>,
    pub total_rows: usize,
    pub accepted_rows: usize,
    /// Blank or unmapped university or program, or no grade column.
    pub dropped_rows: usize,
    /// Status column present but not `accepted`.
    pub status_rejected: usize,
    /// No status column and no accepted-only hint in the file.
    pub missing_status: usize,
    /// Blank, unparseable or below the admission floor.
    pub grade_dropped: usize,
    /// Kept, but neither a month nor a round could be derived.
    pub unknown_date: usize,
    pub matched_by_override: usize,
    pub matched_by_code: usize,
    pub matched_within_university: usize,
    pub matched_global: usize,
    /// Rows carrying a catalog code after matching and backfill.
    pub matched_rows: usize,
    pub backfilled_rows: usize,
    pub unmatched_rows: usize,
    pub inserted_rows: usize,
    pub skipped_existing: usize,
    pub reports_dir: Option<String>,
}

impl ImportSummary {
    pub fn new(run_id: Uuid, mode: ImportMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            mode,
            started_at,
            finished_at: started_at,
            files: Vec::new(),
            total_rows: 0,
            accepted_rows: 0,
            dropped_rows: 0,
            status_rejected: 0,
            missing_status: 0,
            grade_dropped: 0,
            unknown_date: 0,
            matched_by_override: 0,
            matched_by_code: 0,
            matched_within_university: 0,
            matched_global: 0,
            matched_rows: 0,
            backfilled_rows: 0,
            unmatched_rows: 0,
            inserted_rows: 0,
            skipped_existing: 0,
            reports_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_with_uppercase_code_is_authority() {
        let slug: ProgramSlug = "WCS--university of waterloo".parse().expect("slug");
        assert_eq!(
            slug,
            ProgramSlug::Authority {
                code: "WCS".into(),
                university_norm: "university of waterloo".into(),
            }
        );
        assert_eq!(slug.to_string(), "WCS--university of waterloo");
    }

    #[test]
    fn slug_with_lowercase_prefix_is_legacy() {
        let slug: ProgramSlug = "mcmaster university--life sci".parse().expect("slug");
        assert_eq!(
            slug,
            ProgramSlug::Legacy {
                university_norm: "mcmaster university".into(),
                program_name_norm: "life sci".into(),
            }
        );
    }

    #[test]
    fn slug_rejects_missing_separator() {
        assert_eq!(
            "WCS".parse::<ProgramSlug>(),
            Err(SlugError::MissingSeparator("WCS".into()))
        );
        assert_eq!("  ".parse::<ProgramSlug>(), Err(SlugError::Empty));
    }

    #[test]
    fn overlong_code_segment_falls_back_to_legacy() {
        let slug: ProgramSlug = "ABCDEFG--x".parse().expect("slug");
        assert!(matches!(slug, ProgramSlug::Legacy { .. }));
    }

    #[test]
    fn grouping_key_prefers_authority_code() {
        let mut record = AdmissionRecord {
            row_hash: String::new(),
            academic_year: "2022-2023".into(),
            university: "McMaster".into(),
            university_norm: "mcmaster university".into(),
            program_name: "Life Sci".into(),
            program_name_norm: "life sci".into(),
            ouac_code: None,
            admission_grade: 91.0,
            admission_date_raw: String::new(),
            date: DateFields::default(),
            supplemental_required: false,
            status_normalized: StatusNorm::Accepted,
            source_file: "2022-2023.csv".into(),
            imported_at: Utc::now(),
        };
        assert_eq!(record.grouping_key().to_string(), "mcmaster university--life sci");
        record.ouac_code = Some("MLS".into());
        assert_eq!(record.grouping_key().to_string(), "MLS--mcmaster university");
    }

    #[test]
    fn field_names_match_serde_form() {
        for field in CanonicalField::ALL {
            let json = serde_json::to_string(&field).expect("json");
            assert_eq!(json.trim_matches('"'), field.to_string());
        }
    }

    #[test]
    fn unknown_date_requires_both_month_and_round_missing() {
        let mut fields = DateFields::default();
        assert!(fields.is_unknown());
        fields.round_label = Some("Round 1".into());
        assert!(!fields.is_unknown());
    }

    #[test]
    fn authority_entry_json_uses_camel_case() {
        let raw: RawAuthorityEntry = serde_json::from_str(
            r#"{"code":"wcs","programName":"Computer Science","universitySlug":"waterloo","university":"University of Waterloo"}"#,
        )
        .expect("json");
        assert_eq!(raw.program_name, "Computer Science");
        assert_eq!(raw.university_slug, "waterloo");
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            StatusNorm::Accepted,
            StatusNorm::Rejected,
            StatusNorm::Waitlisted,
            StatusNorm::Unknown,
        ] {
            assert_eq!(StatusNorm::parse_stored(status.as_str()), status);
        }
    }
}
