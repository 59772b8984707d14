//! Source side of the pipeline: CSV loading, header mapping and field normalizers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub mod columns;
pub mod dates;
pub mod normalize;
pub mod rules;

pub use columns::{map_columns, normalize_header};
pub use dates::normalize_date_fields;
pub use normalize::{
    normalize_grade, normalize_grade_value, normalize_program, normalize_status,
    normalize_university, parse_supplemental,
};
pub use rules::NormalizationRules;

pub const CRATE_NAME: &str = "oua-adapters";

/// Label used when a file name carries no `YYYY-YYYY` token.
pub const UNKNOWN_ACADEMIC_YEAR: &str = "Unknown";

static ACADEMIC_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{4}").expect("valid academic year regex"));

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("reading source directory {path}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV in {file}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },
}

/// One CSV record as loaded: header/value pairs in file column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_name: String,
    pub academic_year: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl SourceFile {
    /// A file is treated as accepted-only when its name or any header mentions "accepted".
    pub fn implies_accepted_only(&self) -> bool {
        self.file_name.to_ascii_lowercase().contains("accepted")
            || self
                .headers
                .iter()
                .any(|h| h.to_ascii_lowercase().contains("accepted"))
    }
}

pub fn academic_year_from_file_name(file_name: &str) -> String {
    ACADEMIC_YEAR
        .find(file_name)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ACADEMIC_YEAR.to_string())
}

/// `*.csv` files directly under `dir`, sorted by file name.
pub fn list_source_files(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = fs::read_dir(dir).map_err(|source| SourceError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SourceError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub fn load_source_file(path: &Path) -> Result<SourceFile, SourceError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let csv_error = |source: csv::Error| SourceError::Csv {
        file: file_name.clone(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| (header.clone(), record.get(idx).unwrap_or("").to_string()))
            .collect();
        rows.push(RawRow { fields });
    }

    Ok(SourceFile {
        academic_year: academic_year_from_file_name(&file_name),
        file_name,
        headers,
        rows,
    })
}
