use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use oua_adapters::{normalize_university, NormalizationRules};
use oua_core::{AdmissionRecord, ImportMode, ProgramSlug};
use oua_storage::{AggregateFilter, CanonicalStore};
use oua_sync::{AuthorityCatalog, CanonicalNames, IngestConfig, ProgramFacts};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "oua-cli")]
#[command(about = "Ontario university admissions dataset tools")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides for the environment-derived ingest configuration.
#[derive(Debug, Args)]
struct PathArgs {
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,
}

impl PathArgs {
    fn into_config(self) -> IngestConfig {
        let mut config = IngestConfig::from_env();
        if let Some(csv_dir) = self.csv_dir {
            config.csv_dir = csv_dir;
        }
        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        if let Some(catalog) = self.catalog {
            config.catalog_path = catalog;
        }
        if let Some(reports_dir) = self.reports_dir {
            config.reports_dir = reports_dir;
        }
        if let Some(workspace_root) = self.workspace_root {
            config.workspace_root = workspace_root;
        }
        config
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest every CSV in the source directory.
    Import {
        /// Clear the store before inserting.
        #[arg(long)]
        rebuild: bool,
    },
    /// Records for one program slug, e.g. `WCS--university of waterloo`.
    Lookup {
        slug: String,
        #[arg(long)]
        year: Option<String>,
    },
    /// Grade statistics per program.
    Stats {
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        university: Option<String>,
        #[arg(long)]
        coded_only: bool,
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    /// Academic years present in the store.
    Years,
}

#[derive(Debug, Serialize)]
struct LookupReport<'a> {
    slug: String,
    canonical: Option<CanonicalNames>,
    supplemental_required: bool,
    published_average: Option<&'a str>,
    records: Vec<AdmissionRecord>,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.paths.into_config();
    debug!(?config, "resolved configuration");

    match cli.command.unwrap_or(Commands::Import { rebuild: false }) {
        Commands::Import { rebuild } => {
            let mode = if rebuild { ImportMode::Rebuild } else { ImportMode::Update };
            let summary = oua_sync::run_import(config, mode).await?;
            println!(
                "import complete: run_id={} mode={} rows={} accepted={} coded={} inserted={} existing={} reports={}",
                summary.run_id,
                summary.mode.as_str(),
                summary.total_rows,
                summary.accepted_rows,
                summary.matched_rows,
                summary.inserted_rows,
                summary.skipped_existing,
                summary.reports_dir.as_deref().unwrap_or("-")
            );
            println!(
                "dropped: missing_field={} status_rejected={} missing_status={} grade={} unknown_date(kept)={} unmatched={}",
                summary.dropped_rows,
                summary.status_rejected,
                summary.missing_status,
                summary.grade_dropped,
                summary.unknown_date,
                summary.unmatched_rows
            );
        }
        Commands::Lookup { slug, year } => {
            let slug: ProgramSlug = slug.parse().context("parsing program slug")?;
            let store = CanonicalStore::connect(&config.database_url).await?;
            let records = store.find_by_slug(&slug, year.as_deref()).await?;

            let facts = ProgramFacts::from_workspace_root(&config.workspace_root)?;
            let rules = NormalizationRules::from_workspace_root(&config.workspace_root)?;
            let catalog = AuthorityCatalog::load(&config.catalog_path, &rules)?;
            let (canonical, supplemental_required, published_average) = match &slug {
                ProgramSlug::Authority {
                    code,
                    university_norm,
                } => (
                    catalog.canonical_names(code, university_norm),
                    facts.requires_supplemental(code),
                    facts.published_average(code),
                ),
                ProgramSlug::Legacy { .. } => (
                    None,
                    records.iter().any(|r| r.supplemental_required),
                    None,
                ),
            };

            let report = LookupReport {
                slug: slug.to_string(),
                canonical,
                supplemental_required,
                published_average,
                records,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing lookup")?
            );
        }
        Commands::Stats {
            year,
            university,
            coded_only,
            limit,
        } => {
            let university_norm = match university {
                Some(raw) => {
                    let rules = NormalizationRules::from_workspace_root(&config.workspace_root)?;
                    Some(normalize_university(&raw, &rules))
                }
                None => None,
            };
            let store = CanonicalStore::connect(&config.database_url).await?;
            let aggregates = store
                .program_aggregates(&AggregateFilter {
                    academic_year: year,
                    university_norm,
                    coded_only,
                    limit: Some(limit),
                })
                .await?;
            if aggregates.is_empty() {
                println!("no records");
            }
            for agg in aggregates {
                println!(
                    "{:>5}  mean={:>6.2}  min={:>6.2}  max={:>6.2}  {} | {} [{}]",
                    agg.records,
                    agg.mean_grade,
                    agg.min_grade,
                    agg.max_grade,
                    agg.university,
                    agg.program_name,
                    agg.slug
                );
            }
        }
        Commands::Years => {
            let store = CanonicalStore::connect(&config.database_url).await?;
            for year in store.distinct_years().await? {
                println!("{year}");
            }
        }
    }

    Ok(())
}
