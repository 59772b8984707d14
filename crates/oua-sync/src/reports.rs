//! Operator reports written once per ingest run.

use std::path::Path;

use anyhow::{Context, Result};
use oua_core::ImportSummary;
use tokio::fs;

use crate::backfill::UnmatchedRow;

pub const SUMMARY_FILE: &str = "import_summary.json";
pub const UNMATCHED_FILE: &str = "unmatched_ouac.json";
pub const BRIEF_FILE: &str = "import_brief.md";

/// Write the summary, the unmatched-row review list and a markdown brief into `dir`.
pub async fn write_reports(dir: &Path, summary: &ImportSummary, unmatched: &[UnmatchedRow]) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing import summary")?;
    fs::write(dir.join(SUMMARY_FILE), summary_json)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;

    let unmatched_json = serde_json::to_vec_pretty(unmatched).context("serializing unmatched rows")?;
    fs::write(dir.join(UNMATCHED_FILE), unmatched_json)
        .await
        .with_context(|| format!("writing {UNMATCHED_FILE}"))?;

    fs::write(dir.join(BRIEF_FILE), render_brief(summary, unmatched))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;
    Ok(())
}

pub fn render_brief(summary: &ImportSummary, unmatched: &[UnmatchedRow]) -> String {
    let files = if summary.files.is_empty() {
        "- (none)".to_string()
    } else {
        summary
            .files
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let review = unmatched
        .iter()
        .take(20)
        .map(|row| {
            let best = row
                .candidates
                .first()
                .map(|c| format!("{} ({:.2})", c.ouac_code, c.score))
                .unwrap_or_else(|| "no candidates".to_string());
            format!(
                "- {} | {} | {} | best: {}",
                row.academic_year, row.university, row.program_name, best
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# OUA Import Brief\n\n- Run ID: `{}`\n- Mode: {}\n- Started: {}\n- Finished: {}\n\n## Files\n{}\n\n\
         ## Rows\n- Seen: {}\n- Accepted: {}\n- Missing required field: {}\n- Status not accepted: {}\n\
         - Missing status: {}\n- Grade dropped: {}\n- Unknown date (kept): {}\n\n\
         ## Matching\n- Override: {}\n- Direct code: {}\n- Within university: {}\n- Global: {}\n\
         - Backfilled: {}\n- Coded total: {}\n- Unmatched: {}\n\n\
         ## Store\n- Inserted: {}\n- Already present: {}\n\n## Unmatched (first 20)\n{}\n",
        summary.run_id,
        summary.mode.as_str(),
        summary.started_at,
        summary.finished_at,
        files,
        summary.total_rows,
        summary.accepted_rows,
        summary.dropped_rows,
        summary.status_rejected,
        summary.missing_status,
        summary.grade_dropped,
        summary.unknown_date,
        summary.matched_by_override,
        summary.matched_by_code,
        summary.matched_within_university,
        summary.matched_global,
        summary.backfilled_rows,
        summary.matched_rows,
        summary.unmatched_rows,
        summary.inserted_rows,
        summary.skipped_existing,
        if review.is_empty() { "- (none)".to_string() } else { review },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oua_core::ImportMode;
    use uuid::Uuid;

    use crate::backfill::BackfillCandidate;

    fn unmatched_row() -> UnmatchedRow {
        UnmatchedRow {
            slug: "mcmaster university--life health sci".into(),
            academic_year: "2022-2023".into(),
            university: "McMaster".into(),
            university_norm: "mcmaster university".into(),
            program_name: "Life & Health Sci".into(),
            program_name_norm: "life health sci".into(),
            admission_grade: 91.0,
            source_file: "2022-2023.csv".into(),
            candidates: vec![BackfillCandidate {
                program_name_norm: "life sciences".into(),
                ouac_code: "MLS".into(),
                score: 0.25,
            }],
        }
    }

    #[test]
    fn brief_lists_counts_and_review_rows() {
        let mut summary = ImportSummary::new(Uuid::new_v4(), ImportMode::Rebuild, Utc::now());
        summary.files.push("2022-2023.csv".into());
        summary.total_rows = 12;
        summary.grade_dropped = 2;
        let brief = render_brief(&summary, &[unmatched_row()]);
        assert!(brief.contains("- Mode: rebuild"));
        assert!(brief.contains("- 2022-2023.csv"));
        assert!(brief.contains("- Seen: 12"));
        assert!(brief.contains("- Grade dropped: 2"));
        assert!(brief.contains("Life & Health Sci | best: MLS (0.25)"));
    }

    #[tokio::test]
    async fn reports_land_in_run_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let summary = ImportSummary::new(Uuid::new_v4(), ImportMode::Update, Utc::now());
        let run_dir = dir.path().join(summary.run_id.to_string());
        write_reports(&run_dir, &summary, &[unmatched_row()])
            .await
            .expect("reports");

        let unmatched: serde_json::Value = serde_json::from_slice(
            &std::fs::read(run_dir.join(UNMATCHED_FILE)).expect("unmatched file"),
        )
        .expect("json");
        assert_eq!(unmatched[0]["candidates"][0]["ouac_code"], "MLS");

        let written: ImportSummary = serde_json::from_slice(
            &std::fs::read(run_dir.join(SUMMARY_FILE)).expect("summary file"),
        )
        .expect("json");
        assert_eq!(written.run_id, summary.run_id);
        assert!(run_dir.join(BRIEF_FILE).exists());
    }
}
