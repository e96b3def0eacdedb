// TableSleuth - tests/e2e_pipeline.rs
//
// End-to-end tests for the full run: real files in a temporary directory,
// real built-in schema mapping and pattern set, real Shift_JIS and
// UTF-8-with-BOM encodings, output written through DirectorySink.

use std::fs;
use std::path::Path;
use tablesleuth::app::config_mgr;
use tablesleuth::app::pipeline::{self, RunOptions};
use tablesleuth::app::sink::DirectorySink;
use tablesleuth::core::ingest;
use tablesleuth::core::model::{HitStatus, MatchClass, ProjectKey, SearchMode};
use tablesleuth::core::patterns::PatternSet;
use tablesleuth::core::reconcile::ReconcileConfig;
use tablesleuth::core::schema::SchemaMapping;
use tablesleuth::core::search::SearchConfig;
use tablesleuth::platform::fs::DiscoveryConfig;

// =============================================================================
// Helpers
// =============================================================================

const PROJECTS_CSV: &str = "予算事業ID,事業年度,シート種別,事業名,事業の目的\n\
1,2024,事業概要,AI活用推進事業,行政のDX\n\
2,2024,事業概要,ＡＩ・IoT導入支援,中小企業支援\n\
3,2024,事業概要,道路整備事業,交通安全\n\
,2024,事業概要,番号なし事業,\n";

const EXPENDITURE_CSV: &str = "予算事業ID,事業年度,シート種別,事業名,支出先名,契約概要\n\
3,2024,支出情報,道路整備事業,株式会社AI,AI 解析業務\n\
3,2024,支出情報,道路整備事業,建設会社,舗装\n";

const REFERENCES: &str = "AI活用推進事業\nＡＩ・IoT導入支援事業\n\n宇宙開発\n";

fn shift_jis(text: &str) -> Vec<u8> {
    let (bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(text);
    assert!(!had_errors, "fixture text must be representable in Shift_JIS");
    bytes.into_owned()
}

/// Write the fixture exports into `dir`.
fn write_inputs(dir: &Path) {
    fs::write(
        dir.join("1-2_RS_2024_基本情報_事業概要等.csv"),
        shift_jis(PROJECTS_CSV),
    )
    .unwrap();

    let mut with_bom = vec![0xEF, 0xBB, 0xBF];
    with_bom.extend_from_slice(EXPENDITURE_CSV.as_bytes());
    fs::write(dir.join("5-1_RS_2024_支出先_支出情報.csv"), with_bom).unwrap();

    // Invalid in every default candidate encoding.
    fs::write(dir.join("broken.csv"), b"a,b\n\xff\xfe,1\n").unwrap();

    fs::write(dir.join("9-9_unknown.csv"), "x,y\n1,2\n").unwrap();
    fs::write(dir.join("readme.txt"), "not an export").unwrap();
    fs::write(dir.join("refs.txt"), shift_jis(REFERENCES)).unwrap();
}

fn builtins() -> (SchemaMapping, PatternSet) {
    let (schemas, _) = config_mgr::load_all_schemas(None);
    let (sets, _) = config_mgr::load_all_pattern_sets(None);
    (
        config_mgr::select_schema(schemas, "rs-2024").unwrap(),
        config_mgr::select_pattern_set(sets, "ai").unwrap(),
    )
}

fn options(dir: &Path, mode: SearchMode) -> RunOptions {
    RunOptions {
        input_dir: dir.to_path_buf(),
        reference: Some(dir.join("refs.txt")),
        discovery: DiscoveryConfig::default(),
        encodings: ingest::default_encodings(),
        search: SearchConfig {
            mode,
            ..SearchConfig::default()
        },
        reconcile: ReconcileConfig::default(),
    }
}

fn key(id: u64) -> ProjectKey {
    ProjectKey::new(id, 2024)
}

// =============================================================================
// Full run
// =============================================================================

#[test]
fn e2e_broad_run_normalizes_searches_and_reconciles() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_inputs(input.path());
    let (schema, set) = builtins();

    let mut sink = DirectorySink::new(out.path().join("results"));
    let output = pipeline::run(
        &schema,
        &set,
        &options(input.path(), SearchMode::Broad),
        &mut sink,
    )
    .unwrap();

    // Ingestion and normalization.
    let summary = &output.summary;
    assert_eq!(summary.sources_read, 3);
    assert_eq!(summary.skipped_sources.len(), 1);
    assert_eq!(summary.skipped_sources[0].source, "broken.csv");
    assert_eq!(summary.unmapped_sources, vec!["9-9_unknown.csv".to_string()]);
    assert_eq!(summary.unkeyed_rows, 1);

    let projects = output.normalized.table("projects").unwrap();
    assert_eq!(projects.rows.len(), 3);
    assert_eq!(projects.columns, vec!["事業名", "事業の目的"]);
    let expenditure = output.normalized.table("expenditure_info").unwrap();
    assert_eq!(expenditure.rows.len(), 2);

    let encodings: Vec<(&str, &str)> = output
        .normalized
        .report
        .sources
        .iter()
        .map(|s| (s.canonical_table.as_str(), s.encoding.as_str()))
        .collect();
    assert!(encodings.contains(&("projects", "shift_jis")));
    assert!(encodings.contains(&("expenditure_info", "utf-8")));

    // Search: project 1 only matches a broad pattern, project 3 matches via
    // its expenditure rows.
    assert_eq!(
        output.search.matched_projects(),
        vec![key(1), key(2), key(3)]
    );
    assert_eq!(
        output.search.matched_projects_in(SearchMode::Narrow),
        vec![key(2), key(3)]
    );
    assert!(output.search.complete);

    // Reconciliation.
    let report = output.reconciliation.as_ref().unwrap();
    let classes: Vec<MatchClass> = report.outcomes.iter().map(|o| o.classification).collect();
    assert_eq!(
        classes,
        vec![MatchClass::Exact, MatchClass::Fuzzy, MatchClass::Missing]
    );
    assert_eq!(report.outcomes[1].matched.as_ref().unwrap().key, key(2));
    assert!(report.outcomes[2].best_candidate.is_some());

    let statuses: Vec<(ProjectKey, HitStatus)> =
        report.hits.iter().map(|h| (h.key, h.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (key(1), HitStatus::Confirmed),
            (key(2), HitStatus::Confirmed),
            (key(3), HitStatus::Unconfirmed),
        ]
    );
    assert_eq!(report.summary.total, 3);
    assert!((report.summary.coverage_ratio - 2.0 / 3.0).abs() < 1e-9);
    assert!(!report.summary.vacuous);

    // Output contract.
    let results = out.path().join("results");
    for file in [
        "tables/projects.csv",
        "tables/expenditure_info.csv",
        "tables/remarks.csv",
        "normalization.json",
        "evidence.json",
        "evidence.csv",
        "verification.json",
        "verification.csv",
        "run_summary.json",
    ] {
        assert!(results.join(file).is_file(), "missing output {file}");
    }

    let projects_csv = fs::read_to_string(results.join("tables/projects.csv")).unwrap();
    assert_eq!(
        projects_csv.lines().next(),
        Some("予算事業ID,事業年度,事業名,事業の目的")
    );
    assert_eq!(projects_csv.lines().count(), 4);

    let summary_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(results.join("run_summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary_json["schema_id"], "rs-2024");
    assert_eq!(summary_json["mode"], "broad");
    assert_eq!(summary_json["skipped_sources"][0]["source"], "broken.csv");
    assert_eq!(summary_json["reconciliation"]["exact"], 1);
}

#[test]
fn e2e_narrow_run_drops_broad_only_hits() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_inputs(input.path());
    let (schema, set) = builtins();

    let mut sink = DirectorySink::new(out.path());
    let output = pipeline::run(
        &schema,
        &set,
        &options(input.path(), SearchMode::Narrow),
        &mut sink,
    )
    .unwrap();

    assert_eq!(output.search.matched_projects(), vec![key(2), key(3)]);
    assert!(output
        .search
        .evidence
        .values()
        .flatten()
        .all(|e| e.category == tablesleuth::core::model::PatternCategory::Narrow));

    // Project 1 is no longer a hit, so its reference has no candidate pool
    // entry to match exactly.
    let report = output.reconciliation.unwrap();
    assert_ne!(report.outcomes[0].classification, MatchClass::Exact);
}

#[test]
fn e2e_result_is_independent_of_chunking_and_threads() {
    let input = tempfile::tempdir().unwrap();
    write_inputs(input.path());
    let (schema, set) = builtins();

    let run_with = |chunk_rows: usize, worker_threads: usize| {
        let out = tempfile::tempdir().unwrap();
        let mut opts = options(input.path(), SearchMode::Broad);
        opts.search.chunk_rows = chunk_rows;
        opts.search.worker_threads = worker_threads;
        let mut sink = DirectorySink::new(out.path());
        pipeline::run(&schema, &set, &opts, &mut sink).unwrap()
    };

    let baseline = run_with(10_000, 1);
    let chunked = run_with(1, 3);
    assert_eq!(baseline.search.evidence, chunked.search.evidence);
    assert_eq!(
        baseline.reconciliation.unwrap().outcomes,
        chunked.reconciliation.unwrap().outcomes
    );
}

#[test]
fn e2e_row_budget_marks_search_incomplete() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_inputs(input.path());
    let (schema, set) = builtins();

    let mut opts = options(input.path(), SearchMode::Broad);
    opts.search.max_rows = Some(1);
    opts.reference = None;
    let mut sink = DirectorySink::new(out.path());
    let output = pipeline::run(&schema, &set, &opts, &mut sink).unwrap();

    assert!(!output.search.complete);
    assert_eq!(output.search.rows_scanned, 1);
    assert!(output.reconciliation.is_none());
    assert!(!out.path().join("verification.json").exists());
}

#[test]
fn e2e_missing_input_dir_writes_nothing() {
    let out = tempfile::tempdir().unwrap();
    let (schema, set) = builtins();
    let mut opts = options(&out.path().join("absent"), SearchMode::Broad);
    opts.reference = None;

    let mut sink = DirectorySink::new(out.path().join("results"));
    assert!(pipeline::run(&schema, &set, &opts, &mut sink).is_err());
    assert!(!out.path().join("results").exists());
}
