//! Deduplicating ingest: CSV rows in, canonical admission records out.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use oua_adapters::{
    list_source_files, load_source_file, map_columns, normalize_date_fields, normalize_grade,
    normalize_program, normalize_status, normalize_university, parse_supplemental,
    NormalizationRules, RawRow, SourceFile,
};
use oua_core::{
    AdmissionRecord, CanonicalField, ColumnMapping, ImportMode, ImportSummary, StatusNorm,
    MIN_ADMISSION_GRADE,
};
use oua_storage::{row_hash, CanonicalStore, RowHashKey};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backfill::{backfill_codes, BackfillConfig};
use crate::catalog::AuthorityCatalog;
use crate::matcher::{MatchTier, OuacMatcher};
use crate::overrides::OverrideTable;
use crate::reports::write_reports;
use crate::IngestConfig;

/// Why a source row did not become a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// University or program unmapped or blank, or no grade column.
    MissingField,
    StatusRejected,
    MissingStatus,
    /// Blank, unparseable or below the admission floor.
    Grade,
}

impl DropReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::StatusRejected => "status_rejected",
            Self::MissingStatus => "missing_status",
            Self::Grade => "grade",
        }
    }

    fn count(self, summary: &mut ImportSummary) {
        match self {
            Self::MissingField => summary.dropped_rows += 1,
            Self::StatusRejected => summary.status_rejected += 1,
            Self::MissingStatus => summary.missing_status += 1,
            Self::Grade => summary.grade_dropped += 1,
        }
    }
}

fn count_tier(tier: MatchTier, summary: &mut ImportSummary) {
    match tier {
        MatchTier::Override => summary.matched_by_override += 1,
        MatchTier::Code => summary.matched_by_code += 1,
        MatchTier::WithinUniversity => summary.matched_within_university += 1,
        MatchTier::Global => summary.matched_global += 1,
    }
}

/// Column layout of one source file, resolved once.
pub struct FileContext<'a> {
    pub file: &'a SourceFile,
    pub mapping: ColumnMapping,
    pub accepted_only: bool,
    pub imported_at: DateTime<Utc>,
}

impl<'a> FileContext<'a> {
    pub fn new(file: &'a SourceFile, imported_at: DateTime<Utc>) -> Self {
        Self {
            mapping: map_columns(&file.headers),
            accepted_only: file.implies_accepted_only(),
            file,
            imported_at,
        }
    }

    /// The row's value for `field`, blank or not. `None` only when the field is unmapped.
    fn raw_cell<'r>(&self, row: &'r RawRow, field: CanonicalField) -> Option<&'r str> {
        self.mapping.get(field).and_then(|header| row.get(header))
    }

    fn cell<'r>(&self, row: &'r RawRow, field: CanonicalField) -> Option<&'r str> {
        self.raw_cell(row, field).filter(|value| !value.is_empty())
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
    rules: NormalizationRules,
    matcher: OuacMatcher,
    backfill: BackfillConfig,
}

impl IngestPipeline {
    /// Load rule tables from `workspace_root/rules` and the catalog from `catalog_path`.
    pub fn new(config: IngestConfig) -> Result<Self> {
        let rules = NormalizationRules::from_workspace_root(&config.workspace_root)?;
        let overrides = OverrideTable::from_workspace_root(&config.workspace_root)?;
        let catalog = AuthorityCatalog::load(&config.catalog_path, &rules)?;
        Ok(Self::from_parts(config, rules, OuacMatcher::new(catalog, overrides)))
    }

    pub fn from_parts(config: IngestConfig, rules: NormalizationRules, matcher: OuacMatcher) -> Self {
        Self {
            config,
            rules,
            matcher,
            backfill: BackfillConfig::default(),
        }
    }

    pub async fn run_once(&self, store: &CanonicalStore, mode: ImportMode) -> Result<ImportSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, mode = mode.as_str());
        self.run(store, mode, run_id).instrument(span).await
    }

    async fn run(&self, store: &CanonicalStore, mode: ImportMode, run_id: Uuid) -> Result<ImportSummary> {
        let started_at = Utc::now();
        let mut summary = ImportSummary::new(run_id, mode, started_at);

        let paths = list_source_files(&self.config.csv_dir)?;
        info!(files = paths.len(), csv_dir = %self.config.csv_dir.display(), "starting ingest");

        // every file is parsed before the store is touched
        let mut records = Vec::new();
        for path in &paths {
            let file = load_source_file(path)?;
            self.ingest_file(&file, started_at, &mut summary, &mut records);
            summary.files.push(file.file_name);
        }

        let outcome = backfill_codes(&mut records, self.backfill);
        summary.backfilled_rows = outcome.backfilled;
        summary.unmatched_rows = outcome.unmatched.len();
        summary.matched_rows = records.iter().filter(|r| r.ouac_code.is_some()).count();

        if mode == ImportMode::Rebuild {
            store.clear().await.context("clearing store for rebuild")?;
        }
        let inserted = store.insert_batch(&records).await?;
        summary.inserted_rows = inserted.inserted;
        summary.skipped_existing = inserted.skipped;

        // rows are committed at this point; a report failure must not fail the run
        let reports_dir = self.config.reports_dir.join(run_id.to_string());
        summary.reports_dir = Some(reports_dir.display().to_string());
        summary.finished_at = Utc::now();
        if let Err(err) = write_reports(&reports_dir, &summary, &outcome.unmatched).await {
            warn!(error = ?err, dir = %reports_dir.display(), "writing run reports failed");
            summary.reports_dir = None;
        }

        info!(
            total_rows = summary.total_rows,
            accepted_rows = summary.accepted_rows,
            matched_rows = summary.matched_rows,
            backfilled_rows = summary.backfilled_rows,
            inserted_rows = summary.inserted_rows,
            skipped_existing = summary.skipped_existing,
            "ingest run finished"
        );
        Ok(summary)
    }

    fn ingest_file(
        &self,
        file: &SourceFile,
        imported_at: DateTime<Utc>,
        summary: &mut ImportSummary,
        records: &mut Vec<AdmissionRecord>,
    ) {
        let _span = info_span!(
            "ingest_file",
            file = %file.file_name,
            academic_year = %file.academic_year
        )
        .entered();

        let ctx = FileContext::new(file, imported_at);
        let before = records.len();
        for (idx, row) in file.rows.iter().enumerate() {
            summary.total_rows += 1;
            match self.resolve_row(&ctx, row) {
                Ok((record, tier)) => {
                    summary.accepted_rows += 1;
                    if record.date.is_unknown() {
                        summary.unknown_date += 1;
                    }
                    if let Some(tier) = tier {
                        count_tier(tier, summary);
                    }
                    records.push(record);
                }
                Err(reason) => {
                    debug!(row = idx + 1, reason = reason.as_str(), "row dropped");
                    reason.count(summary);
                }
            }
        }
        info!(rows = file.rows.len(), kept = records.len() - before, "file ingested");
    }

    /// Normalize, filter and match one row. The record's hash covers its final canonical keys.
    pub fn resolve_row(
        &self,
        ctx: &FileContext<'_>,
        row: &RawRow,
    ) -> Result<(AdmissionRecord, Option<MatchTier>), DropReason> {
        let (Some(university), Some(program), Some(grade_raw)) = (
            ctx.cell(row, CanonicalField::University),
            ctx.cell(row, CanonicalField::ProgramName),
            ctx.raw_cell(row, CanonicalField::AdmissionGrade),
        ) else {
            return Err(DropReason::MissingField);
        };

        if ctx.mapping.is_mapped(CanonicalField::Status) {
            let status = normalize_status(ctx.cell(row, CanonicalField::Status).unwrap_or_default());
            if status != StatusNorm::Accepted {
                return Err(DropReason::StatusRejected);
            }
        } else if !ctx.accepted_only {
            return Err(DropReason::MissingStatus);
        }

        let admission_grade = normalize_grade(grade_raw)
            .filter(|grade| *grade >= MIN_ADMISSION_GRADE)
            .ok_or(DropReason::Grade)?;

        let admission_date_raw = ctx.cell(row, CanonicalField::AdmissionDate).unwrap_or_default();
        let date = normalize_date_fields(admission_date_raw, &ctx.file.academic_year);
        let supplemental_required = ctx
            .cell(row, CanonicalField::SupplementalRequired)
            .is_some_and(parse_supplemental);

        let mut university_norm = normalize_university(university, &self.rules);
        let mut program_name_norm = normalize_program(program, university, &self.rules);
        let mut ouac_code = None;
        let mut tier = None;
        if let Some(hit) = self.matcher.match_row(
            ctx.cell(row, CanonicalField::OuacCode),
            &program_name_norm,
            &university_norm,
        ) {
            debug!(code = %hit.entry.code, tier = ?hit.tier, score = hit.score, "matched authority entry");
            ouac_code = Some(hit.entry.code.clone());
            program_name_norm = hit.entry.program_norm.clone();
            university_norm = hit.entry.university_norm.clone();
            tier = Some(hit.tier);
        }

        let mut record = AdmissionRecord {
            row_hash: String::new(),
            academic_year: ctx.file.academic_year.clone(),
            university: university.to_string(),
            university_norm,
            program_name: program.to_string(),
            program_name_norm,
            ouac_code,
            admission_grade,
            admission_date_raw: admission_date_raw.to_string(),
            date,
            supplemental_required,
            status_normalized: StatusNorm::Accepted,
            source_file: ctx.file.file_name.clone(),
            imported_at: ctx.imported_at,
        };
        record.row_hash = row_hash(&RowHashKey::from_record(&record));
        Ok((record, tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use oua_core::AuthorityEntry;

    fn pipeline() -> IngestPipeline {
        let catalog = AuthorityCatalog::from_entries(vec![AuthorityEntry {
            code: "WCS".into(),
            program_name: "Computer Science".into(),
            program_norm: "computer science".into(),
            university_slug: "waterloo".into(),
            university: "University of Waterloo".into(),
            university_norm: "university of waterloo".into(),
        }]);
        let rules = NormalizationRules::from_yaml_str(
            "version: 1\naliases:\n  - canonical: university of waterloo\n    variants: [uw, waterloo]\n",
        )
        .expect("rules");
        let config = IngestConfig {
            database_url: "sqlite::memory:".into(),
            csv_dir: PathBuf::from("unused"),
            catalog_path: PathBuf::from("unused.json"),
            reports_dir: PathBuf::from("unused"),
            workspace_root: PathBuf::from("."),
        };
        IngestPipeline::from_parts(
            config,
            rules,
            OuacMatcher::new(catalog, OverrideTable::default()),
        )
    }

    fn source(file_name: &str, headers: &[&str], rows: &[&[&str]]) -> SourceFile {
        SourceFile {
            file_name: file_name.into(),
            academic_year: "2022-2023".into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|values| RawRow {
                    fields: headers
                        .iter()
                        .zip(values.iter())
                        .map(|(h, v)| (h.to_string(), v.to_string()))
                        .collect(),
                })
                .collect(),
        }
    }

    fn resolve(file: &SourceFile, idx: usize) -> Result<(AdmissionRecord, Option<MatchTier>), DropReason> {
        let pipeline = pipeline();
        let ctx = FileContext::new(file, Utc::now());
        pipeline.resolve_row(&ctx, &file.rows[idx])
    }

    const HEADERS: &[&str] = &["University", "Program", "Average", "Status", "Date", "Supplemental"];

    #[test]
    fn matched_row_adopts_catalog_keys() {
        let file = source(
            "2022-2023.csv",
            HEADERS,
            &[&["UW", "Computer Science Co-op", "95%", "Accepted", "Dec 12", "Yes"]],
        );
        let (record, tier) = resolve(&file, 0).expect("kept");
        assert_eq!(tier, Some(MatchTier::WithinUniversity));
        assert_eq!(record.ouac_code.as_deref(), Some("WCS"));
        assert_eq!(record.university_norm, "university of waterloo");
        assert_eq!(record.program_name_norm, "computer science");
        assert_eq!(record.university, "UW");
        assert_eq!(record.admission_grade, 95.0);
        assert_eq!(record.date.admission_month_iso.as_deref(), Some("2022-12"));
        assert!(record.supplemental_required);
        assert_eq!(record.row_hash, row_hash(&RowHashKey::from_record(&record)));
    }

    #[test]
    fn spelling_variants_converge_on_one_hash() {
        let file = source(
            "2022-2023.csv",
            HEADERS,
            &[
                &["UW", "Computer Science", "90", "accepted", "", ""],
                &["University of Waterloo", "B. Computer Science (Co-op)", "90", "Accepted", "", ""],
            ],
        );
        let (a, _) = resolve(&file, 0).expect("kept");
        let (b, _) = resolve(&file, 1).expect("kept");
        assert_eq!(a.row_hash, b.row_hash);
    }

    #[test]
    fn drop_reasons_are_distinguished() {
        let file = source(
            "2022-2023.csv",
            HEADERS,
            &[
                &["", "Computer Science", "90", "Accepted", "", ""],
                &["UW", "Computer Science", "90", "Rejected", "", ""],
                &["UW", "Computer Science", "59", "Accepted", "", ""],
                &["UW", "Computer Science", "n/a", "Accepted", "", ""],
                &["UW", "Computer Science", "", "Accepted", "", ""],
            ],
        );
        assert_eq!(resolve(&file, 0).err(), Some(DropReason::MissingField));
        assert_eq!(resolve(&file, 1).err(), Some(DropReason::StatusRejected));
        assert_eq!(resolve(&file, 2).err(), Some(DropReason::Grade));
        assert_eq!(resolve(&file, 3).err(), Some(DropReason::Grade));
        assert_eq!(resolve(&file, 4).err(), Some(DropReason::Grade));
    }

    #[test]
    fn blank_grade_is_a_grade_drop_but_missing_column_is_not() {
        let mapped = source(
            "2022-2023.csv",
            &["University", "Program", "Average", "Status"],
            &[&["Trent", "Nursing", "", "Accepted"]],
        );
        assert_eq!(resolve(&mapped, 0).err(), Some(DropReason::Grade));

        let unmapped = source(
            "2022-2023.csv",
            &["University", "Program", "Status"],
            &[&["Trent", "Nursing", "Accepted"]],
        );
        assert_eq!(resolve(&unmapped, 0).err(), Some(DropReason::MissingField));
    }

    #[test]
    fn missing_status_column_needs_accepted_hint() {
        let headers = &["University", "Program", "Average"];
        let plain = source("2022-2023.csv", headers, &[&["UW", "Computer Science", "90"]]);
        assert_eq!(resolve(&plain, 0).err(), Some(DropReason::MissingStatus));

        let hinted = source("2022-2023 accepted.csv", headers, &[&["UW", "Computer Science", "90"]]);
        let (record, _) = resolve(&hinted, 0).expect("kept");
        assert_eq!(record.status_normalized, StatusNorm::Accepted);
    }

    #[test]
    fn unmatched_row_keeps_own_normalization() {
        let file = source(
            "2022-2023.csv",
            HEADERS,
            &[&["Trent University", "Forensic Science", "84", "Accepted", "Round 2", "no"]],
        );
        let (record, tier) = resolve(&file, 0).expect("kept");
        assert_eq!(tier, None);
        assert_eq!(record.ouac_code, None);
        assert_eq!(record.university_norm, "trent university");
        assert_eq!(record.program_name_norm, "forensic science");
        assert_eq!(record.date.round_order, Some(2));
        assert!(!record.supplemental_required);
    }

    #[test]
    fn drop_reasons_feed_their_own_counters() {
        let mut summary = ImportSummary::new(Uuid::new_v4(), ImportMode::Update, Utc::now());
        for reason in [
            DropReason::MissingField,
            DropReason::StatusRejected,
            DropReason::MissingStatus,
            DropReason::Grade,
            DropReason::Grade,
        ] {
            reason.count(&mut summary);
        }
        assert_eq!(summary.dropped_rows, 1);
        assert_eq!(summary.status_rejected, 1);
        assert_eq!(summary.missing_status, 1);
        assert_eq!(summary.grade_dropped, 2);
    }
}
