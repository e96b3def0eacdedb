// TableSleuth - main.rs
//
// Application entry point. Handles:
// 1. CLI argument parsing
// 2. config.toml loading and logging initialisation
// 3. Schema mapping and pattern set loading (built-in + user-defined)
// 4. One pipeline run into the output directory

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tablesleuth::app::{config_mgr, pipeline, sink::DirectorySink};
use tablesleuth::core::ingest;
use tablesleuth::core::model::SearchMode;
use tablesleuth::core::reconcile::{ReconcileConfig, SimilarityMetric};
use tablesleuth::core::search::SearchConfig;
use tablesleuth::platform::config::{self as pconfig, PlatformPaths};
use tablesleuth::platform::fs::DiscoveryConfig;
use tablesleuth::util::constants;
use tablesleuth::util::error::{ConfigError, TableSleuthError};

/// TableSleuth - encoding-resilient table ingestion, pattern search and
/// reference reconciliation.
///
/// Point TableSleuth at a directory of source exports to normalize them into
/// canonical tables keyed by project, search them for a thematic pattern set,
/// and optionally verify the hits against a reference list of project names.
#[derive(Parser, Debug)]
#[command(name = "tablesleuth", version, about)]
struct Cli {
    /// Directory containing the source exports.
    input_dir: PathBuf,

    /// Schema mapping id.
    #[arg(long, default_value = constants::DEFAULT_SCHEMA_ID)]
    schema: String,

    /// Pattern set id.
    #[arg(long = "patterns", default_value = constants::DEFAULT_PATTERN_SET_ID)]
    pattern_set: String,

    /// Reference list (one project name per line) to reconcile against.
    #[arg(short = 'r', long)]
    reference: Option<PathBuf>,

    /// Output directory.
    #[arg(short = 'o', long, default_value = constants::DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Search mode (overrides config.toml).
    #[arg(short = 'm', long, value_parser = ["narrow", "broad"])]
    mode: Option<String>,

    /// Minimum fuzzy similarity (overrides config.toml).
    #[arg(short = 't', long)]
    threshold: Option<f64>,

    /// Stop searching after this many rows.
    #[arg(long)]
    max_rows: Option<usize>,

    /// config.toml to use instead of the platform default.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Directory containing user-defined schema mappings.
    #[arg(long)]
    schema_dir: Option<PathBuf>,

    /// Directory containing user-defined pattern sets.
    #[arg(long)]
    pattern_dir: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = PlatformPaths::resolve();
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file.clone());
    let (config, config_warnings) = pconfig::load_config(&config_path);

    tablesleuth::util::logging::init(cli.debug, config.log_level.as_deref());

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "TableSleuth starting"
    );
    for w in &config_warnings {
        tracing::warn!(warning = %w, "Config warning");
    }

    match run(&cli, &paths, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    cli: &Cli,
    paths: &PlatformPaths,
    config: &pconfig::AppConfig,
) -> Result<(), TableSleuthError> {
    let encodings = ingest::resolve_encodings(config.encodings.as_slice())?;

    // CLI values were restricted by clap; config values were validated on load.
    let mode_label = cli.mode.as_deref().unwrap_or(&config.search_mode);
    let mode = SearchMode::parse(mode_label).unwrap_or_default();

    let threshold = match cli.threshold {
        Some(t) if !(constants::MIN_FUZZY_THRESHOLD..=constants::MAX_FUZZY_THRESHOLD).contains(&t) => {
            return Err(ConfigError::ValueOutOfRange {
                field: "--threshold".to_string(),
                value: t.to_string(),
                expected: format!(
                    "{}-{}",
                    constants::MIN_FUZZY_THRESHOLD,
                    constants::MAX_FUZZY_THRESHOLD
                ),
            }
            .into())
        }
        Some(t) => t,
        None => config.fuzzy_threshold,
    };

    let schema_dir = cli.schema_dir.as_deref().unwrap_or(&paths.user_schemas_dir);
    let pattern_dir = cli.pattern_dir.as_deref().unwrap_or(&paths.user_patterns_dir);

    let schema = config_mgr::load_schema(Some(schema_dir), &cli.schema)?;
    let set = config_mgr::load_pattern_set(Some(pattern_dir), &cli.pattern_set)?;

    let options = pipeline::RunOptions {
        input_dir: cli.input_dir.clone(),
        reference: cli.reference.clone(),
        discovery: DiscoveryConfig {
            large_file_threshold: config.large_file_threshold,
            ..DiscoveryConfig::default()
        },
        encodings,
        search: SearchConfig {
            mode,
            chunk_rows: config.chunk_rows,
            max_rows: cli.max_rows.or(config.max_rows),
            worker_threads: config.worker_threads,
        },
        reconcile: ReconcileConfig {
            threshold,
            containment_floor: config.containment_floor,
            metric: SimilarityMetric::parse(&config.similarity_metric).unwrap_or_default(),
        },
    };

    let mut sink = DirectorySink::new(&cli.output);
    let output = pipeline::run(&schema, &set, &options, &mut sink)?;

    let summary = &output.summary;
    println!(
        "{} sources read, {} skipped, {} unmapped",
        summary.sources_read,
        summary.skipped_sources.len(),
        summary.unmapped_sources.len()
    );
    println!(
        "{} matched projects ({} narrow), {} evidence entries{}",
        summary.search.matched_projects,
        summary.search.narrow_matched_projects,
        summary.search.evidence,
        if summary.search.complete {
            ""
        } else {
            " [row budget reached, search incomplete]"
        }
    );
    if let Some(r) = &summary.reconciliation {
        println!(
            "{} references: {} exact, {} fuzzy, {} missing ({} ambiguous), coverage {:.1}%",
            r.total,
            r.exact,
            r.fuzzy,
            r.missing,
            r.ambiguous,
            r.coverage_ratio * 100.0
        );
    }
    println!("Results written to {}", sink.dir().display());

    Ok(())
}
