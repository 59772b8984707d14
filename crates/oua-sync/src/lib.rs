//! Matching, backfill and the deduplicating ingest run.

use std::path::PathBuf;

use anyhow::Result;
use oua_core::{ImportMode, ImportSummary};
use oua_storage::CanonicalStore;

pub mod backfill;
pub mod catalog;
pub mod facts;
pub mod matcher;
pub mod overrides;
pub mod pipeline;
pub mod reports;
pub mod similarity;

pub use backfill::{backfill_codes, BackfillCandidate, BackfillConfig, BackfillOutcome, UnmatchedRow};
pub use catalog::{AuthorityCatalog, CanonicalNames};
pub use facts::ProgramFacts;
pub use matcher::{MatchConfig, MatchTier, OuacMatch, OuacMatcher};
pub use overrides::OverrideTable;
pub use pipeline::{DropReason, IngestPipeline};
pub use similarity::{levenshtein_similarity, token_set_similarity};

pub const CRATE_NAME: &str = "oua-sync";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: String,
    pub csv_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub reports_dir: PathBuf,
    /// Directory holding `rules/`.
    pub workspace_root: PathBuf,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/admissions.db".to_string()),
            csv_dir: std::env::var("OUA_CSV_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/csv")),
            catalog_path: std::env::var("OUA_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/ouac_programs.json")),
            reports_dir: std::env::var("OUA_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/import_logs")),
            workspace_root: std::env::var("OUA_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Open the configured store and run one ingest.
pub async fn run_import(config: IngestConfig, mode: ImportMode) -> Result<ImportSummary> {
    let store = CanonicalStore::connect(&config.database_url).await?;
    let pipeline = IngestPipeline::new(config)?;
    pipeline.run_once(&store, mode).await
}

pub async fn run_import_from_env(mode: ImportMode) -> Result<ImportSummary> {
    run_import(IngestConfig::from_env(), mode).await
}
