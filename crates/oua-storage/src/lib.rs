//! Content hashing + the SQLite-backed canonical admissions store.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use oua_core::{AdmissionRecord, DateFields, ProgramSlug, StatusNorm};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

pub const CRATE_NAME: &str = "oua-storage";

const FIELD_SEPARATOR: char = '\u{1f}';

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The canonical fields that identify one admission observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowHashKey<'a> {
    pub academic_year: &'a str,
    pub university_norm: &'a str,
    pub program_name_norm: &'a str,
    pub ouac_code: Option<&'a str>,
    pub admission_month_iso: Option<&'a str>,
    pub round_label: Option<&'a str>,
    pub admission_grade: f64,
}

impl<'a> RowHashKey<'a> {
    pub fn from_record(record: &'a AdmissionRecord) -> Self {
        Self {
            academic_year: &record.academic_year,
            university_norm: &record.university_norm,
            program_name_norm: &record.program_name_norm,
            ouac_code: record.ouac_code.as_deref(),
            admission_month_iso: record.date.admission_month_iso.as_deref(),
            round_label: record.date.round_label.as_deref(),
            admission_grade: record.admission_grade,
        }
    }
}

/// Deterministic content hash of a canonical row. Raw display strings,
/// the source file and the import time never contribute.
pub fn row_hash(key: &RowHashKey<'_>) -> String {
    let grade = key.admission_grade.to_string();
    let parts = [
        key.academic_year,
        key.university_norm,
        key.program_name_norm,
        key.ouac_code.unwrap_or_default(),
        key.admission_month_iso.unwrap_or_default(),
        key.round_label.unwrap_or_default(),
        grade.as_str(),
    ];
    let joined = parts.join(&FIELD_SEPARATOR.to_string());
    sha256_hex(joined.as_bytes())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Filter for grouped grade scans.
#[derive(Debug, Clone, Default)]
pub struct AggregateFilter {
    pub academic_year: Option<String>,
    pub university_norm: Option<String>,
    pub coded_only: bool,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramAggregate {
    pub slug: ProgramSlug,
    pub program_name: String,
    pub university: String,
    pub records: i64,
    pub mean_grade: f64,
    pub min_grade: f64,
    pub max_grade: f64,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS admissions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        row_hash TEXT NOT NULL UNIQUE,
        academic_year TEXT NOT NULL,
        university TEXT NOT NULL,
        university_norm TEXT NOT NULL,
        program_name TEXT NOT NULL,
        program_name_norm TEXT NOT NULL,
        ouac_code TEXT,
        admission_grade REAL NOT NULL CHECK (admission_grade >= 60 AND admission_grade <= 100),
        admission_date_raw TEXT,
        admission_date_iso TEXT,
        admission_month_iso TEXT,
        admission_month_label TEXT,
        admission_year INTEGER,
        round_label TEXT,
        round_order INTEGER,
        supplemental_required INTEGER NOT NULL DEFAULT 0,
        status_normalized TEXT NOT NULL,
        source_file TEXT NOT NULL,
        imported_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_program_lookup ON admissions (university_norm, program_name_norm)",
    "CREATE INDEX IF NOT EXISTS idx_ouac_lookup ON admissions (university_norm, ouac_code)",
    "CREATE INDEX IF NOT EXISTS idx_academic_year ON admissions (academic_year)",
    "CREATE INDEX IF NOT EXISTS idx_admission_month_iso ON admissions (admission_month_iso)",
    "CREATE INDEX IF NOT EXISTS idx_program_name_norm ON admissions (program_name_norm)",
    "CREATE INDEX IF NOT EXISTS idx_university_norm ON admissions (university_norm)",
    "CREATE INDEX IF NOT EXISTS idx_ouac_code ON admissions (ouac_code)",
];

const INSERT_SQL: &str = r#"
    INSERT INTO admissions (
        row_hash, academic_year, university, university_norm, program_name,
        program_name_norm, ouac_code, admission_grade, admission_date_raw,
        admission_date_iso, admission_month_iso, admission_month_label,
        admission_year, round_label, round_order, supplemental_required,
        status_normalized, source_file, imported_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(row_hash) DO NOTHING
"#;

const RECORD_COLUMNS: &str = "row_hash, academic_year, university, university_norm, program_name, \
     program_name_norm, ouac_code, admission_grade, admission_date_raw, admission_date_iso, \
     admission_month_iso, admission_month_label, admission_year, round_label, round_order, \
     supplemental_required, status_normalized, source_file, imported_at";

/// Persisted table of resolved admission records. Rows are written once and never updated.
#[derive(Debug, Clone)]
pub struct CanonicalStore {
    pool: SqlitePool,
}

impl CanonicalStore {
    /// Open (creating if missing) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("parsing database url {database_url}"))?
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("opening {database_url}"))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, kept alive on a single pooled connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("opening in-memory sqlite")?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("creating admissions schema")?;
        }
        Ok(())
    }

    /// Remove every record. Runs outside the insert transaction.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM admissions")
            .execute(&self.pool)
            .await
            .context("clearing admissions")?;
        info!(removed = result.rows_affected(), "cleared canonical store");
        Ok(result.rows_affected())
    }

    /// Insert every record whose `row_hash` is not yet stored, atomically.
    /// Only a hash conflict is skipped; any other constraint failure rolls the batch back.
    pub async fn insert_batch(&self, records: &[AdmissionRecord]) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await.context("beginning insert transaction")?;
        let mut outcome = InsertOutcome::default();

        for record in records {
            let result = sqlx::query(INSERT_SQL)
                .bind(&record.row_hash)
                .bind(&record.academic_year)
                .bind(&record.university)
                .bind(&record.university_norm)
                .bind(&record.program_name)
                .bind(&record.program_name_norm)
                .bind(record.ouac_code.as_deref())
                .bind(record.admission_grade)
                .bind(&record.admission_date_raw)
                .bind(record.date.admission_date_iso.as_deref())
                .bind(record.date.admission_month_iso.as_deref())
                .bind(record.date.admission_month_label.as_deref())
                .bind(record.date.admission_year)
                .bind(record.date.round_label.as_deref())
                .bind(record.date.round_order.map(i64::from))
                .bind(i64::from(record.supplemental_required))
                .bind(record.status_normalized.as_str())
                .bind(&record.source_file)
                .bind(record.imported_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting row {}", record.row_hash))?;

            if result.rows_affected() == 0 {
                outcome.skipped += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await.context("committing insert transaction")?;
        debug!(inserted = outcome.inserted, skipped = outcome.skipped, "insert batch committed");
        Ok(outcome)
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admissions")
            .fetch_one(&self.pool)
            .await
            .context("counting admissions")?;
        Ok(count.max(0) as u64)
    }

    pub async fn contains(&self, row_hash: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM admissions WHERE row_hash = ?)")
                .bind(row_hash)
                .fetch_one(&self.pool)
                .await
                .context("checking row hash")?;
        Ok(exists)
    }

    /// Records for one authority code at one university, newest year and highest grade first.
    pub async fn find_by_code(
        &self,
        code: &str,
        university_norm: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<AdmissionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM admissions \
             WHERE ouac_code = ? AND university_norm = ? AND (? IS NULL OR academic_year = ?) \
             ORDER BY academic_year DESC, admission_grade DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(code)
            .bind(university_norm)
            .bind(academic_year)
            .bind(academic_year)
            .fetch_all(&self.pool)
            .await
            .context("querying admissions by code")?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn find_by_program(
        &self,
        university_norm: &str,
        program_name_norm: &str,
        academic_year: Option<&str>,
    ) -> Result<Vec<AdmissionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM admissions \
             WHERE university_norm = ? AND program_name_norm = ? AND (? IS NULL OR academic_year = ?) \
             ORDER BY academic_year DESC, admission_grade DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(university_norm)
            .bind(program_name_norm)
            .bind(academic_year)
            .bind(academic_year)
            .fetch_all(&self.pool)
            .await
            .context("querying admissions by program")?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn find_by_slug(
        &self,
        slug: &ProgramSlug,
        academic_year: Option<&str>,
    ) -> Result<Vec<AdmissionRecord>> {
        match slug {
            ProgramSlug::Authority {
                code,
                university_norm,
            } => self.find_by_code(code, university_norm, academic_year).await,
            ProgramSlug::Legacy {
                university_norm,
                program_name_norm,
            } => {
                self.find_by_program(university_norm, program_name_norm, academic_year)
                    .await
            }
        }
    }

    pub async fn distinct_years(&self) -> Result<Vec<String>> {
        let years: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT academic_year FROM admissions ORDER BY academic_year DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing academic years")?;
        Ok(years)
    }

    /// Grade statistics per grouping key, largest groups first.
    pub async fn program_aggregates(&self, filter: &AggregateFilter) -> Result<Vec<ProgramAggregate>> {
        let rows = sqlx::query(
            r#"
            SELECT ouac_code,
                   university_norm,
                   CASE WHEN ouac_code IS NULL THEN program_name_norm ELSE '' END AS program_key,
                   MIN(program_name) AS program_name,
                   MIN(university) AS university,
                   COUNT(*) AS records,
                   AVG(admission_grade) AS mean_grade,
                   MIN(admission_grade) AS min_grade,
                   MAX(admission_grade) AS max_grade
              FROM admissions
             WHERE (?1 IS NULL OR academic_year = ?1)
               AND (?2 IS NULL OR university_norm = ?2)
               AND (?3 = 0 OR ouac_code IS NOT NULL)
             GROUP BY ouac_code, university_norm, program_key
             ORDER BY records DESC, university_norm ASC, program_key ASC
             LIMIT ?4
            "#,
        )
        .bind(filter.academic_year.as_deref())
        .bind(filter.university_norm.as_deref())
        .bind(i64::from(filter.coded_only))
        .bind(filter.limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .context("aggregating admissions")?;

        rows.iter()
            .map(|row| -> Result<ProgramAggregate> {
                let code: Option<String> = row.try_get("ouac_code")?;
                let university_norm: String = row.try_get("university_norm")?;
                let slug = match code {
                    Some(code) => ProgramSlug::Authority {
                        code,
                        university_norm,
                    },
                    None => ProgramSlug::Legacy {
                        university_norm,
                        program_name_norm: row.try_get("program_key")?,
                    },
                };
                Ok(ProgramAggregate {
                    slug,
                    program_name: row.try_get("program_name")?,
                    university: row.try_get("university")?,
                    records: row.try_get("records")?,
                    mean_grade: row.try_get("mean_grade")?,
                    min_grade: row.try_get("min_grade")?,
                    max_grade: row.try_get("max_grade")?,
                })
            })
            .collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<AdmissionRecord> {
    let imported_at: String = row.try_get("imported_at")?;
    let imported_at = DateTime::parse_from_rfc3339(&imported_at)
        .with_context(|| format!("parsing imported_at {imported_at}"))?
        .with_timezone(&Utc);
    let admission_year: Option<i64> = row.try_get("admission_year")?;
    let round_order: Option<i64> = row.try_get("round_order")?;
    let supplemental: i64 = row.try_get("supplemental_required")?;
    let status: String = row.try_get("status_normalized")?;
    let admission_date_raw: Option<String> = row.try_get("admission_date_raw")?;

    Ok(AdmissionRecord {
        row_hash: row.try_get("row_hash")?,
        academic_year: row.try_get("academic_year")?,
        university: row.try_get("university")?,
        university_norm: row.try_get("university_norm")?,
        program_name: row.try_get("program_name")?,
        program_name_norm: row.try_get("program_name_norm")?,
        ouac_code: row.try_get("ouac_code")?,
        admission_grade: row.try_get("admission_grade")?,
        admission_date_raw: admission_date_raw.unwrap_or_default(),
        date: DateFields {
            admission_date_iso: row.try_get("admission_date_iso")?,
            admission_month_iso: row.try_get("admission_month_iso")?,
            admission_month_label: row.try_get("admission_month_label")?,
            admission_year: admission_year.and_then(|y| i32::try_from(y).ok()),
            round_label: row.try_get("round_label")?,
            round_order: round_order.and_then(|o| u32::try_from(o).ok()),
        },
        supplemental_required: supplemental != 0,
        status_normalized: StatusNorm::parse_stored(&status),
        source_file: row.try_get("source_file")?,
        imported_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn mk_record(year: &str, program: &str, code: Option<&str>, grade: f64) -> AdmissionRecord {
        let mut record = AdmissionRecord {
            row_hash: String::new(),
            academic_year: year.to_string(),
            university: "University of Waterloo".into(),
            university_norm: "university of waterloo".into(),
            program_name: program.to_string(),
            program_name_norm: program.to_ascii_lowercase(),
            ouac_code: code.map(ToString::to_string),
            admission_grade: grade,
            admission_date_raw: "Jan 15".into(),
            date: DateFields {
                admission_date_iso: None,
                admission_month_iso: Some("2023-01".into()),
                admission_month_label: Some("Jan".into()),
                admission_year: Some(2023),
                round_label: None,
                round_order: None,
            },
            supplemental_required: true,
            status_normalized: StatusNorm::Accepted,
            source_file: format!("{year}.csv"),
            imported_at: Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap(),
        };
        record.row_hash = row_hash(&RowHashKey::from_record(&record));
        record
    }

    #[test]
    fn sha256_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn row_hash_ignores_display_fields() {
        let a = mk_record("2022-2023", "Computer Science", Some("WCS"), 95.0);
        let mut b = a.clone();
        b.university = "UW".into();
        b.program_name = "CS (Co-op)".into();
        b.source_file = "other.csv".into();
        b.admission_date_raw = "mid jan".into();
        assert_eq!(
            row_hash(&RowHashKey::from_record(&a)),
            row_hash(&RowHashKey::from_record(&b))
        );
    }

    #[test]
    fn row_hash_depends_on_year_and_grade() {
        let a = mk_record("2022-2023", "Computer Science", Some("WCS"), 95.0);
        let b = mk_record("2023-2024", "Computer Science", Some("WCS"), 95.0);
        let c = mk_record("2022-2023", "Computer Science", Some("WCS"), 95.5);
        assert_ne!(a.row_hash, b.row_hash);
        assert_ne!(a.row_hash, c.row_hash);
    }

    #[test]
    fn row_hash_field_boundaries_do_not_alias() {
        let base = RowHashKey {
            academic_year: "2022-2023",
            university_norm: "ab",
            program_name_norm: "c",
            ouac_code: None,
            admission_month_iso: None,
            round_label: None,
            admission_grade: 90.0,
        };
        let shifted = RowHashKey {
            university_norm: "a",
            program_name_norm: "bc",
            ..base
        };
        assert_ne!(row_hash(&base), row_hash(&shifted));
    }

    #[tokio::test]
    async fn insert_batch_is_idempotent() {
        let store = CanonicalStore::in_memory().await.expect("store");
        let records = vec![
            mk_record("2022-2023", "Computer Science", Some("WCS"), 95.0),
            mk_record("2022-2023", "Mathematics", Some("WM"), 88.0),
        ];

        let first = store.insert_batch(&records).await.expect("first insert");
        let second = store.insert_batch(&records).await.expect("second insert");

        assert_eq!(first, InsertOutcome { inserted: 2, skipped: 0 });
        assert_eq!(second, InsertOutcome { inserted: 0, skipped: 2 });
        assert_eq!(store.count().await.expect("count"), 2);
        assert!(store.contains(&records[0].row_hash).await.expect("contains"));
    }

    #[tokio::test]
    async fn duplicate_hashes_within_one_batch_collapse() {
        let store = CanonicalStore::in_memory().await.expect("store");
        let record = mk_record("2022-2023", "Computer Science", Some("WCS"), 95.0);
        let outcome = store
            .insert_batch(&[record.clone(), record])
            .await
            .expect("insert");
        assert_eq!(outcome, InsertOutcome { inserted: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let store = CanonicalStore::in_memory().await.expect("store");
        let good = mk_record("2022-2023", "Computer Science", Some("WCS"), 95.0);
        let mut bad = mk_record("2022-2023", "Mathematics", Some("WM"), 40.0);
        bad.row_hash = "bad".into();

        let result = store.insert_batch(&[good, bad]).await;
        assert!(result.is_err());
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn below_floor_grade_is_rejected_not_skipped() {
        let store = CanonicalStore::in_memory().await.expect("store");
        let low = mk_record("2022-2023", "Mathematics", Some("WM"), 40.0);

        let err = store.insert_batch(&[low]).await.expect_err("check constraint");
        assert!(format!("{err:#}").contains("inserting row"));
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn lookups_round_trip_records_in_grade_order() {
        let store = CanonicalStore::in_memory().await.expect("store");
        let low = mk_record("2022-2023", "Computer Science", Some("WCS"), 91.0);
        let high = mk_record("2022-2023", "Computer Science", Some("WCS"), 97.5);
        let newer = mk_record("2023-2024", "Computer Science", Some("WCS"), 90.0);
        store
            .insert_batch(&[low.clone(), high.clone(), newer.clone()])
            .await
            .expect("insert");

        let all = store
            .find_by_code("WCS", "university of waterloo", None)
            .await
            .expect("query");
        let grades: Vec<f64> = all.iter().map(|r| r.admission_grade).collect();
        assert_eq!(grades, vec![90.0, 97.5, 91.0]);
        assert_eq!(all[1], high);

        let one_year = store
            .find_by_code("WCS", "university of waterloo", Some("2022-2023"))
            .await
            .expect("query");
        assert_eq!(one_year.len(), 2);

        let by_program = store
            .find_by_program("university of waterloo", "computer science", Some("2023-2024"))
            .await
            .expect("query");
        assert_eq!(by_program, vec![newer]);

        assert_eq!(
            store.distinct_years().await.expect("years"),
            vec!["2023-2024".to_string(), "2022-2023".to_string()]
        );
    }

    #[tokio::test]
    async fn aggregates_group_by_code_or_program_name() {
        let store = CanonicalStore::in_memory().await.expect("store");
        store
            .insert_batch(&[
                mk_record("2022-2023", "Computer Science", Some("WCS"), 90.0),
                mk_record("2022-2023", "Computer Science", Some("WCS"), 96.0),
                mk_record("2022-2023", "Life Sci", None, 84.0),
            ])
            .await
            .expect("insert");

        let all = store
            .program_aggregates(&AggregateFilter::default())
            .await
            .expect("aggregate");
        assert_eq!(all.len(), 2);
        assert_eq!(
            all[0].slug,
            ProgramSlug::Authority {
                code: "WCS".into(),
                university_norm: "university of waterloo".into(),
            }
        );
        assert_eq!(all[0].records, 2);
        assert!((all[0].mean_grade - 93.0).abs() < 1e-9);
        assert_eq!(all[0].min_grade, 90.0);
        assert_eq!(all[0].max_grade, 96.0);

        let coded = store
            .program_aggregates(&AggregateFilter {
                coded_only: true,
                ..AggregateFilter::default()
            })
            .await
            .expect("aggregate");
        assert_eq!(coded.len(), 1);

        let other_year = store
            .program_aggregates(&AggregateFilter {
                academic_year: Some("2030-2031".into()),
                ..AggregateFilter::default()
            })
            .await
            .expect("aggregate");
        assert!(other_year.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let store = CanonicalStore::in_memory().await.expect("store");
        store
            .insert_batch(&[mk_record("2022-2023", "Computer Science", Some("WCS"), 90.0)])
            .await
            .expect("insert");
        assert_eq!(store.clear().await.expect("clear"), 1);
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn file_database_persists_between_connections() {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("nested/admissions.db").display());
        let record = mk_record("2022-2023", "Computer Science", Some("WCS"), 90.0);

        {
            let store = CanonicalStore::connect(&url).await.expect("connect");
            store.insert_batch(&[record.clone()]).await.expect("insert");
        }

        let reopened = CanonicalStore::connect(&url).await.expect("reconnect");
        assert_eq!(reopened.count().await.expect("count"), 1);
        assert!(reopened.contains(&record.row_hash).await.expect("contains"));
    }
}
