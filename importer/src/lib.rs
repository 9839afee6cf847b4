use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use seeder::bundle;
use seeder::config::SeederConfig;
use seeder::dataset::load_dataset;
use seeder::firestore::FirestoreStore;
use seeder::import::{self, CollectionPlan, ImportReport};
use seeder::store::DocumentStore;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "importer",
    about = "Metro demo data tools: bundle the dataset, check it, import it into Firestore"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import projects, image records and analyses into Firestore (default).
    ///
    /// Each collection is committed as one atomic batch of full-document upserts.
    /// A failed collection does not stop the others. The summary is the failure
    /// signal; the exit status stays 0 unless --strict is given.
    Import(ImportArgs),

    /// Validate the dataset and show what an import would write. No network access.
    Check {
        /// Dataset file (defaults to SEEDER_DATA_PATH or bin/demo_data_complete.json).
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Assemble demo_data_complete.json from data/*.json and images/obraN_*.jpg.
    Bundle {
        /// Directory containing data/ and images/.
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Output directory (defaults to <source>/bin).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct ImportArgs {
    /// Dataset file (defaults to SEEDER_DATA_PATH or bin/demo_data_complete.json).
    #[arg(long)]
    data: Option<PathBuf>,

    /// Service-account key file (defaults to GOOGLE_APPLICATION_CREDENTIALS or serviceAccountKey.json).
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Firestore project id; skips reading the credentials file.
    #[arg(long)]
    project: Option<String>,

    /// Exit with an error status when the dataset cannot be loaded or any
    /// collection fails. By default failures are only reported.
    #[arg(long)]
    strict: bool,
}

impl ImportArgs {
    fn apply(&self, config: &mut SeederConfig) {
        if let Some(data) = &self.data {
            config.data_path = data.clone();
        }
        if let Some(credentials) = &self.credentials {
            config.credentials_path = credentials.clone();
        }
        if let Some(project) = &self.project {
            config.project_id = Some(project.clone());
        }
    }
}

pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => run_import(ImportArgs::default()).await,
        Some(Commands::Import(args)) => run_import(args).await,
        Some(Commands::Check { data }) => run_check(data),
        Some(Commands::Bundle { source, output }) => run_bundle(source, output),
    }
}

async fn run_import(args: ImportArgs) -> Result<()> {
    println!("Metro demo data importer");

    let mut config = SeederConfig::from_env();
    args.apply(&mut config);

    let settings = config.firestore_settings()?;
    println!(
        "Target: project={} database={} endpoint={}",
        settings.project_id, settings.database, settings.base_url
    );
    let store = FirestoreStore::new(settings)?;

    finish(seed(&store, &config.data_path).await, args.strict)
}

/// Print the outcome of an import run. Failures only become an error (and a
/// non-zero exit) in strict mode.
fn finish(outcome: Result<ImportReport>, strict: bool) -> Result<()> {
    let report = match outcome {
        Ok(report) => report,
        Err(e) if strict => return Err(e),
        Err(e) => {
            eprintln!("{e:#}");
            return Ok(());
        }
    };
    print!("{}", render_report(&report));

    let failed = report.failed().count();
    if failed == 0 {
        println!("All collections imported.");
    } else if strict {
        bail!(
            "{failed} of {} collections failed to import",
            report.results.len()
        );
    }
    Ok(())
}

/// Load the dataset at `data_path` and import it into `store`.
///
/// A dataset that cannot be loaded aborts before any store call.
pub async fn seed(store: &dyn DocumentStore, data_path: &Path) -> Result<ImportReport> {
    let dataset = load_dataset(data_path)
        .context("fatal: could not load dataset; nothing was imported")?;
    info!(records = dataset.total_records(), "starting import");
    Ok(import::import_dataset(store, &dataset).await)
}

fn run_check(data: Option<PathBuf>) -> Result<()> {
    let config = SeederConfig::from_env();
    let data_path = data.unwrap_or(config.data_path);

    let dataset = load_dataset(&data_path)?;
    let plans = import::plan_dataset(&dataset);
    print!("{}", render_plans(&plans));

    for m in dataset.metadata_mismatches() {
        println!(
            "warning: metadata declares {} {} records, found {}",
            m.declared, m.collection, m.actual
        );
    }

    let blocked = plans.iter().filter(|p| !p.is_importable()).count();
    if blocked > 0 {
        bail!("{blocked} collection(s) would fail to import");
    }
    println!("Dataset OK: {} records ready to import.", dataset.total_records());
    Ok(())
}

fn run_bundle(source: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| source.join("bin"));
    println!("Bundling demo data from {}", source.display());

    let summary = bundle::bundle_demo_data(&source, &output)?;
    println!(
        "Wrote {} ({:.2} MB)",
        summary.output_path.display(),
        summary.output_bytes as f64 / (1024.0 * 1024.0)
    );
    println!(
        "Bundle complete: projects={} image_records={} analyses={} images_embedded={}",
        summary.projects, summary.image_records, summary.analyses, summary.images_embedded
    );
    Ok(())
}

fn render_report(report: &ImportReport) -> String {
    let mut out = String::from("\nSummary:\n");
    for result in &report.results {
        let _ = match result.error() {
            None => writeln!(
                out,
                "  {:<14} ok      written={}",
                result.collection,
                result.written()
            ),
            Some(e) => writeln!(
                out,
                "  {:<14} FAILED  staged={} error={e}",
                result.collection, result.staged
            ),
        };
    }
    let _ = writeln!(
        out,
        "Documents written: {} ({} of {} collections succeeded)",
        report.documents_written(),
        report.succeeded().count(),
        report.results.len()
    );
    out
}

fn render_plans(plans: &[CollectionPlan]) -> String {
    let mut out = String::new();
    for plan in plans {
        let _ = writeln!(
            out,
            "  {:<14} records={} timestamps={} duplicate_ids={}",
            plan.collection,
            plan.records,
            plan.timestamps,
            plan.duplicate_ids.len()
        );
        for problem in &plan.problems {
            let _ = writeln!(out, "    problem: {problem}");
        }
        if !plan.duplicate_ids.is_empty() {
            let _ = writeln!(
                out,
                "    later records overwrite earlier ones for: {}",
                plan.duplicate_ids.join(", ")
            );
        }
    }
    out
}
