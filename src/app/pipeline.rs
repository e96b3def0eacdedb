// TableSleuth - app/pipeline.rs
//
// Run orchestration: discover -> ingest -> normalize -> search -> reconcile,
// then hand every result to a ResultSink.
//
// Error policy:
//   - Configuration-scoped failures (pattern set, reference list, discovery
//     root) abort before any input is decoded.
//   - A source that cannot be read or decoded is skipped and listed in the
//     run summary with its reason.
//   - The sink is only called once every stage has succeeded.

use crate::core::export::ResultSink;
use crate::core::ingest::{self, CandidateEncoding};
use crate::core::model::{
    NormalizedSchema, RawTable, ReconciliationReport, ReferenceRecord, RunSummary, SearchResult,
    SearchStats, SkippedSource, TableCount,
};
use crate::core::normalize;
use crate::core::patterns::PatternSet;
use crate::core::reconcile::{self, ReconcileConfig};
use crate::core::schema::SchemaMapping;
use crate::core::search::{SearchConfig, SearchEngine};
use crate::platform::fs::{self as pfs, BoundedReadError, DiscoveryConfig, InputFile};
use crate::util::constants;
use crate::util::error::{IngestError, ReferenceError, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Everything one run needs besides the schema mapping and pattern set.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_dir: PathBuf,
    /// Reference list to reconcile against; `None` skips reconciliation.
    pub reference: Option<PathBuf>,
    pub discovery: DiscoveryConfig,
    pub encodings: Vec<CandidateEncoding>,
    pub search: SearchConfig,
    pub reconcile: ReconcileConfig,
}

/// In-memory results of a completed run.
#[derive(Debug)]
pub struct RunOutput {
    pub normalized: NormalizedSchema,
    pub search: SearchResult,
    pub reconciliation: Option<ReconciliationReport>,
    pub summary: RunSummary,
}

/// Decoded sources plus the ones that were skipped.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub tables: Vec<RawTable>,
    pub skipped: Vec<SkippedSource>,
}

/// Execute a full run from disk and write the results to `sink`.
pub fn run(
    schema: &SchemaMapping,
    set: &PatternSet,
    options: &RunOptions,
    sink: &mut dyn ResultSink,
) -> Result<RunOutput> {
    tracing::info!(
        input = %options.input_dir.display(),
        schema_id = %schema.id,
        set_id = %set.id,
        mode = %options.search.mode,
        "Run starting"
    );

    // Surface configuration errors before touching any input.
    let engine = SearchEngine::new(set, options.search.clone())?;
    let references = match &options.reference {
        Some(path) => Some(load_reference_list(path, &options.encodings)?),
        None => None,
    };

    let (files, warnings) = pfs::discover_inputs(&options.input_dir, &options.discovery)?;
    for w in &warnings {
        tracing::warn!(warning = %w, "Discovery warning");
    }
    tracing::info!(files = files.len(), "Inputs discovered");

    let ingested = ingest_files(&files, &options.encodings, options.search.worker_threads);

    let output = analyze(
        schema,
        &engine,
        ingested,
        references.as_deref(),
        &options.reconcile,
    );

    write_results(schema, &output, sink)?;

    tracing::info!(
        sources = output.summary.sources_read,
        skipped = output.summary.skipped_sources.len(),
        matched_projects = output.summary.search.matched_projects,
        "Run complete"
    );

    Ok(output)
}

/// Read the reference list within the size cap and decode it.
pub fn load_reference_list(
    path: &Path,
    encodings: &[CandidateEncoding],
) -> std::result::Result<Vec<ReferenceRecord>, ReferenceError> {
    let bytes = match pfs::read_bounded(path, constants::MAX_REFERENCE_FILE_SIZE) {
        Ok(bytes) => bytes,
        Err(BoundedReadError::TooLarge { size }) => {
            return Err(ReferenceError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                max_size: constants::MAX_REFERENCE_FILE_SIZE,
            })
        }
        Err(BoundedReadError::Io(source)) => {
            return Err(ReferenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    reconcile::decode_reference_list(&bytes, encodings, path)
}

/// Read and decode every input in parallel. Output order follows input order.
pub fn ingest_files(
    files: &[InputFile],
    encodings: &[CandidateEncoding],
    worker_threads: usize,
) -> IngestOutcome {
    let decode = || -> Vec<std::result::Result<RawTable, SkippedSource>> {
        files
            .par_iter()
            .map(|file| ingest_file(file, encodings))
            .collect()
    };

    let results = if worker_threads > 0 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.min(constants::MAX_WORKER_THREADS))
            .build()
        {
            Ok(pool) => pool.install(decode),
            Err(e) => {
                tracing::warn!(error = %e, "Could not build worker pool, using the global pool");
                decode()
            }
        }
    } else {
        decode()
    };

    let mut outcome = IngestOutcome::default();
    for result in results {
        match result {
            Ok(table) => outcome.tables.push(table),
            Err(skipped) => outcome.skipped.push(skipped),
        }
    }
    outcome
}

fn ingest_file(
    file: &InputFile,
    encodings: &[CandidateEncoding],
) -> std::result::Result<RawTable, SkippedSource> {
    let skip = |e: IngestError| {
        tracing::warn!(source = %file.name, error = %e, "Input could not be ingested, skipping");
        SkippedSource {
            source: file.name.clone(),
            reason: e.to_string(),
        }
    };

    let bytes = pfs::read_input(file)
        .map_err(|source| IngestError::Io {
            path: file.path.clone(),
            source,
        })
        .map_err(skip)?;

    ingest::ingest_bytes(&file.name, &bytes, encodings).map_err(skip)
}

/// Normalize, search and reconcile already-decoded sources.
///
/// Pure with respect to the filesystem; `run` wraps it with discovery and
/// output.
pub fn analyze(
    schema: &SchemaMapping,
    engine: &SearchEngine<'_>,
    ingested: IngestOutcome,
    references: Option<&[ReferenceRecord]>,
    reconcile_config: &ReconcileConfig,
) -> RunOutput {
    let normalized = normalize::normalize(schema, &ingested.tables);
    let search = engine.search(&normalized);

    let reconciliation = references.map(|refs| {
        let projects = reconcile::matched_projects(schema, &normalized, &search);
        reconcile::reconcile(&projects, refs, reconcile_config)
    });

    let summary = RunSummary {
        tool: constants::APP_NAME.to_string(),
        version: constants::APP_VERSION.to_string(),
        generated_at: chrono::Utc::now(),
        schema_id: schema.id.clone(),
        pattern_set_id: search.pattern_set_id.clone(),
        mode: engine.mode(),
        sources_read: ingested.tables.len(),
        skipped_sources: ingested.skipped,
        unmapped_sources: normalized.report.unmapped_sources.clone(),
        tables: normalized
            .tables
            .iter()
            .map(|t| TableCount {
                name: t.name.clone(),
                rows: t.rows.len(),
                columns: t.columns.len(),
            })
            .collect(),
        unkeyed_rows: normalized.report.total_unkeyed(),
        collisions: normalized.report.collisions.len(),
        value_conflicts: normalized.report.value_conflicts,
        search: SearchStats::from_result(&search),
        reconciliation: reconciliation.as_ref().map(|r| r.summary.clone()),
    };

    RunOutput {
        normalized,
        search,
        reconciliation,
        summary,
    }
}

fn write_results(
    schema: &SchemaMapping,
    output: &RunOutput,
    sink: &mut dyn ResultSink,
) -> Result<()> {
    sink.write_tables(schema, &output.normalized)?;
    sink.write_evidence(&output.search)?;
    if let Some(report) = &output.reconciliation {
        sink.write_verification(report)?;
    }
    sink.finish(&output.summary)?;
    Ok(())
}
