use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_expression_curator::app::{App, ProgressSink};
use kira_expression_curator::catalog::CatalogHttpClient;
use kira_expression_curator::config::ConfigLoader;
use kira_expression_curator::domain::DatasetKey;
use kira_expression_curator::error::{ErrorClass, KiraError};
use kira_expression_curator::fetcher::FetchOptions;
use kira_expression_curator::geo::GeoHttpClient;
use kira_expression_curator::output::{JsonOutput, OutputMode, StderrProgress};
use kira_expression_curator::soft::GeoRecord;

#[derive(Parser)]
#[command(name = "kira-ec")]
#[command(about = "Curates GEO microarray records and CuMiDa datasets into a local expression store")]
#[command(version, author)]
struct Cli {
    /// Path to a kira-ec.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the dataset catalog and list its entries")]
    Catalog,
    #[command(about = "Fetch and parse one GEO record (GPL or GSE)")]
    Fetch(FetchArgs),
    #[command(about = "Download matrices and platform records for GSE:Type keys")]
    Download(KeysArgs),
    #[command(about = "Rebuild the expression store")]
    Curate(KeysArgs),
    #[command(about = "Curate only if the expression store is missing or empty")]
    Check,
    #[command(about = "Show a stored dataset")]
    Show(ShowArgs),
    #[command(about = "List stored datasets")]
    List,
}

#[derive(Args)]
struct FetchArgs {
    accession: String,

    /// Directory holding (or receiving) the raw record file.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Create --dir if it does not exist.
    #[arg(long)]
    make_dir: bool,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct KeysArgs {
    /// Dataset keys such as GSE45827:Breast. Empty means the configured selection.
    keys: Vec<String>,
}

#[derive(Args)]
struct ShowArgs {
    series: String,
    category: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error.class() {
        ErrorClass::InvalidInput => 64,
        ErrorClass::NotFound => 2,
        ErrorClass::TransientIo => 3,
        ErrorClass::SchemaViolation => 4,
        ErrorClass::Other => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let settings = ConfigLoader::resolve(cli.config.as_deref())?;
    let geo = GeoHttpClient::new(&settings)?;
    let catalog = CatalogHttpClient::new(&settings)?;
    let app = App::new(settings, geo, catalog);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &StderrProgress,
    };

    match cli.command {
        Commands::Catalog => {
            let result = app.catalog_listing(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_catalog(&result).into_diagnostic()?,
                OutputMode::Text => {
                    for entry in &result.entries {
                        let marker = if result.selected.contains(&entry.key()) {
                            "*"
                        } else {
                            " "
                        };
                        println!(
                            "{marker} {:<10} {:<24} {:<8} classes={} samples={} genes={}",
                            entry.series,
                            entry.category,
                            entry.platform,
                            entry.classes,
                            entry.samples,
                            entry.genes
                        );
                    }
                    println!(
                        "{} entries, {} selected",
                        result.entries.len(),
                        result.selected.len()
                    );
                }
            }
        }
        Commands::Fetch(args) => {
            let options = FetchOptions {
                silent: output_mode == OutputMode::Json,
                make_dir: args.make_dir,
                use_cache: !args.no_cache,
            };
            let record = app.fetch_record(&args.accession, args.dir.as_deref(), options)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_record(&record).into_diagnostic()?,
                OutputMode::Text => print_record_summary(&record),
            }
        }
        Commands::Download(args) => {
            let keys = parse_keys(&args.keys)?;
            let keys = if keys.is_empty() {
                app.catalog()?.select(&app.settings().selection)
            } else {
                keys
            };
            let report = app.download(&keys, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_download(&report).into_diagnostic()?,
                OutputMode::Text => {
                    for item in &report.matrices {
                        println!("{:?} {} -> {}", item.action, item.key, item.path.display());
                        if let Some(error) = &item.error {
                            println!("    {error}");
                        }
                    }
                    for platform in &report.platforms {
                        let status = if platform.ok { "ok" } else { "failed" };
                        println!("{} {status}", platform.accession);
                    }
                }
            }
        }
        Commands::Curate(args) => {
            let keys = parse_keys(&args.keys)?;
            let selection = (!keys.is_empty()).then_some(keys);
            let report = app.curate(selection, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_curation(&report).into_diagnostic()?,
                OutputMode::Text => print_curation_summary(&report),
            }
        }
        Commands::Check => {
            let result = app.ensure_curated(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_check(&result).into_diagnostic()?,
                OutputMode::Text => match &result.report {
                    Some(report) => print_curation_summary(report),
                    None => println!("{} is populated", result.database),
                },
            }
        }
        Commands::Show(args) => {
            let table = app.retrieve(&args.series.trim().to_ascii_uppercase(), &args.category)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_table(&table).into_diagnostic()?,
                OutputMode::Text => {
                    println!("{} samples x {} genes", table.rows.len(), table.genes.len());
                    let mut counts: Vec<(&str, usize)> = Vec::new();
                    for label in table.sample_types() {
                        match counts.iter_mut().find(|(seen, _)| *seen == label) {
                            Some((_, count)) => *count += 1,
                            None => counts.push((label, 1)),
                        }
                    }
                    for (label, count) in counts {
                        println!("  {label}: {count}");
                    }
                }
            }
        }
        Commands::List => {
            let datasets = app.stored_datasets()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_datasets(&datasets).into_diagnostic()?,
                OutputMode::Text => {
                    for dataset in &datasets {
                        println!(
                            "{:>4} {:<10} {:<24} samples={}",
                            dataset.id, dataset.series, dataset.class_label, dataset.samples
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn parse_keys(values: &[String]) -> Result<Vec<DatasetKey>, KiraError> {
    values.iter().map(|value| value.parse()).collect()
}

fn print_record_summary(record: &GeoRecord) {
    match record {
        GeoRecord::Platform(platform) => {
            println!(
                "{} {}",
                platform.accession,
                platform.title().unwrap_or_default()
            );
            println!(
                "  manufacturer: {}",
                platform.manufacturer().unwrap_or("unknown")
            );
            println!(
                "  table: {} rows, columns {}",
                platform.table.len(),
                platform.table.columns.join(", ")
            );
        }
        GeoRecord::Series(series) => {
            println!("{} {}", series.accession, series.title().unwrap_or_default());
            println!("  samples: {}", series.samples.len());
            let platforms: Vec<&str> = series
                .platforms
                .iter()
                .map(|platform| platform.accession.as_str())
                .collect();
            println!("  platforms: {}", platforms.join(", "));
        }
    }
}

fn print_curation_summary(report: &kira_expression_curator::app::CurationReport) {
    println!(
        "stored {} of {} datasets in {} ({} ms)",
        report.ingested(),
        report.items.len(),
        report.database,
        report.elapsed_ms
    );
    for item in report.failed() {
        println!(
            "  {:?} {}: {}",
            item.outcome,
            item.key,
            item.detail.as_deref().unwrap_or("")
        );
    }
}
