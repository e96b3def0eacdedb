// TableSleuth - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// platform dependencies.
//
// These types are the shared vocabulary across all layers and form the
// output contract handed to a `ResultSink`.

use crate::util::error::NormalizeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Raw table (output of ingestion)
// =============================================================================

/// A decoded source export. Immutable after ingestion.
///
/// Rows are positional: `rows[r][c]` is the value of `columns[c]`. Empty
/// cells are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// Name of the source (file name for on-disk inputs).
    pub source_name: String,

    /// Label of the candidate encoding that decoded this table.
    pub encoding: String,

    /// Header names, unique within the table.
    pub columns: Vec<String>,

    /// Data rows in file order, each exactly `columns.len()` wide.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Position of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell value, `None` for empty cells and out-of-range positions.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// =============================================================================
// Project key
// =============================================================================

/// Composite identifier naming one project across all canonical tables.
///
/// Ordering is lexicographic over (project_id, fiscal_year); this is the
/// order used for every deterministic tie-break.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ProjectKey {
    pub project_id: u64,
    pub fiscal_year: u32,
}

impl ProjectKey {
    pub fn new(project_id: u64, fiscal_year: u32) -> Self {
        Self {
            project_id,
            fiscal_year,
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.fiscal_year)
    }
}

// =============================================================================
// Canonical tables (output of normalization)
// =============================================================================

/// How many rows a canonical table holds per ProjectKey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one row per key; rows from several sources merge.
    OneToOne,

    /// Any number of rows per key, kept in source order.
    OneToMany,
}

/// Where a canonical row came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowOrigin {
    pub source: String,
    /// Zero-based data row index within the source (header excluded).
    pub row_index: usize,
}

/// One row of a canonical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRow {
    pub key: ProjectKey,

    /// Values aligned with the owning table's `columns`.
    pub values: Vec<Option<String>>,

    /// Every raw row merged into this row, in merge order. Always non-empty.
    pub origins: Vec<RowOrigin>,
}

/// A semantically-named relational table produced by normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalTable {
    pub name: String,
    pub cardinality: Cardinality,

    /// Data column names in first-appearance order. Key columns are not
    /// repeated here; every row carries its `key`.
    pub columns: Vec<String>,

    pub rows: Vec<CanonicalRow>,
}

impl CanonicalTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.values.get(column)?.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A raw column identified by its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    pub source: String,
    pub column: String,
}

/// A canonical column fed by more than one raw column. Resolved by keeping
/// the first non-null value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnCollision {
    pub canonical_table: String,
    pub canonical_column: String,
    /// Contributing raw columns, in the order their values are consulted.
    pub contributors: Vec<ColumnRef>,
}

/// Per-source normalization counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub canonical_table: String,
    pub encoding: String,
    pub rows: usize,
    pub keyed: usize,
    pub unkeyed: usize,
}

/// Run-level statistics from normalization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizationReport {
    pub sources: Vec<SourceStats>,

    /// Detailed unkeyed rows, capped per source; `SourceStats::unkeyed` is exact.
    pub unkeyed_samples: Vec<NormalizeError>,

    pub collisions: Vec<ColumnCollision>,

    /// Cells where a later source supplied a different non-null value for an
    /// already-filled one-to-one column.
    pub value_conflicts: usize,

    /// Inputs that no schema source definition claimed.
    pub unmapped_sources: Vec<String>,
}

impl NormalizationReport {
    pub fn total_unkeyed(&self) -> usize {
        self.sources.iter().map(|s| s.unkeyed).sum()
    }
}

/// The full set of canonical tables for one run.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedSchema {
    pub schema_id: String,

    /// One entry per declared canonical table, in declaration order,
    /// including empty ones.
    pub tables: Vec<CanonicalTable>,

    pub report: NormalizationReport,
}

impl NormalizedSchema {
    pub fn table(&self, name: &str) -> Option<&CanonicalTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Number of raw rows from `source` present in any canonical table.
    pub fn rows_from_source(&self, source: &str) -> usize {
        self.tables
            .iter()
            .flat_map(|t| &t.rows)
            .flat_map(|r| &r.origins)
            .filter(|o| o.source == source)
            .count()
    }
}

// =============================================================================
// Search
// =============================================================================

/// Strictness tier a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    /// Matches only an isolated root token.
    Narrow,

    /// Matches compound and derivative forms of the root token.
    Broad,
}

impl PatternCategory {
    pub fn label(&self) -> &'static str {
        match self {
            PatternCategory::Narrow => "narrow",
            PatternCategory::Broad => "broad",
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Search strictness. A mode is the set of categories it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Narrow,
    #[default]
    Broad,
}

impl SearchMode {
    /// Whether patterns of `category` run under this mode.
    pub fn includes(&self, category: PatternCategory) -> bool {
        match self {
            SearchMode::Narrow => category == PatternCategory::Narrow,
            SearchMode::Broad => true,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchMode::Narrow => "narrow",
            SearchMode::Broad => "broad",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "narrow" => Some(SearchMode::Narrow),
            "broad" => Some(SearchMode::Broad),
            _ => None,
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One pattern match in one cell. The audit unit of the search engine;
/// never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchEvidence {
    pub key: ProjectKey,
    pub table: String,
    pub column: String,
    pub pattern_id: String,
    pub category: PatternCategory,
    pub matched_text: String,
    /// Row index within the canonical table.
    pub row_index: usize,
    /// Byte offsets of the match within the cell text.
    pub start: usize,
    pub end: usize,
    /// Excerpt of the cell text around the match.
    pub context: String,
}

/// Aggregated evidence for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub key: ProjectKey,
    pub evidence_count: usize,
    /// Distinct, in first-seen order.
    pub tables: Vec<String>,
    pub patterns: Vec<String>,
    pub matched_texts: Vec<String>,
}

/// Output of one search run.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub pattern_set_id: String,
    pub mode: SearchMode,

    /// Evidence per project, ordered by key; within a key, in target order
    /// then row, column, pattern and position order.
    #[serde(serialize_with = "serialize_evidence")]
    pub evidence: BTreeMap<ProjectKey, Vec<MatchEvidence>>,

    /// Rows in all scanned targets.
    pub rows_total: usize,

    /// Rows actually scanned. Smaller than `rows_total` only when a row
    /// budget cut the run short.
    pub rows_scanned: usize,

    /// False when a budget stopped the scan early.
    pub complete: bool,

    /// Targets (`table.column`) absent from the normalized schema.
    pub skipped_targets: Vec<String>,
}

impl SearchResult {
    /// Projects with at least one evidence entry, ascending by key.
    pub fn matched_projects(&self) -> Vec<ProjectKey> {
        self.evidence
            .iter()
            .filter(|(_, ev)| !ev.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Projects with evidence from patterns run under `mode`.
    pub fn matched_projects_in(&self, mode: SearchMode) -> Vec<ProjectKey> {
        self.evidence
            .iter()
            .filter(|(_, ev)| ev.iter().any(|e| mode.includes(e.category)))
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence.values().map(Vec::len).sum()
    }

    pub fn project_summaries(&self) -> Vec<ProjectSummary> {
        self.evidence
            .iter()
            .map(|(key, evidence)| {
                let mut tables: Vec<String> = Vec::new();
                let mut patterns: Vec<String> = Vec::new();
                let mut matched_texts: Vec<String> = Vec::new();
                for e in evidence {
                    push_distinct(&mut tables, &e.table);
                    push_distinct(&mut patterns, &e.pattern_id);
                    push_distinct(&mut matched_texts, &e.matched_text);
                }
                ProjectSummary {
                    key: *key,
                    evidence_count: evidence.len(),
                    tables,
                    patterns,
                    matched_texts,
                }
            })
            .collect()
    }
}

/// JSON object keys must be strings, so the map goes out as a list of
/// `{key, evidence}` entries in key order.
fn serialize_evidence<S: Serializer>(
    map: &BTreeMap<ProjectKey, Vec<MatchEvidence>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        key: &'a ProjectKey,
        evidence: &'a [MatchEvidence],
    }
    serializer.collect_seq(map.iter().map(|(key, evidence)| Entry { key, evidence }))
}

fn push_distinct(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// One entry of the authoritative reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceRecord {
    /// 1-based line number in the reference list.
    pub id: usize,
    pub name: String,
}

/// A search hit offered to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedProject {
    pub key: ProjectKey,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchClass {
    Exact,
    Fuzzy,
    Missing,
}

impl MatchClass {
    pub fn label(&self) -> &'static str {
        match self {
            MatchClass::Exact => "exact",
            MatchClass::Fuzzy => "fuzzy",
            MatchClass::Missing => "missing",
        }
    }
}

/// A scored project candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub key: ProjectKey,
    pub name: String,
    pub score: f64,
}

/// Classification of one reference record. Exactly one per record per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub reference: ReferenceRecord,
    pub classification: MatchClass,

    /// Selected project for `exact` and `fuzzy`.
    pub matched: Option<Candidate>,

    /// Best candidate below threshold, kept for `missing` outcomes.
    pub best_candidate: Option<Candidate>,

    /// Other projects that tied with the selected one. Non-empty means the
    /// deterministic tie-break decided the outcome.
    pub tie: Vec<ProjectKey>,
}

impl VerificationOutcome {
    pub fn is_ambiguous(&self) -> bool {
        !self.tie.is_empty()
    }

    /// Similarity score for fuzzy outcomes.
    pub fn score(&self) -> Option<f64> {
        match self.classification {
            MatchClass::Fuzzy => self.matched.as_ref().map(|c| c.score),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitStatus {
    /// Claimed by at least one exact or fuzzy outcome.
    Confirmed,
    Unconfirmed,
}

/// Classification of one search hit against the reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HitVerification {
    pub key: ProjectKey,
    pub name: String,
    pub status: HitStatus,
    pub reference_ids: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationSummary {
    pub total: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub missing: usize,
    pub ambiguous: usize,
    pub confirmed_hits: usize,
    pub unconfirmed_hits: usize,

    /// (exact + fuzzy) / total; 1.0 when the reference list is empty.
    pub coverage_ratio: f64,

    /// True when `total` is zero and the ratio is vacuous.
    pub vacuous: bool,
}

/// Output of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub metric: String,
    pub threshold: f64,
    pub containment_floor: Option<f64>,

    /// In reference-list order.
    pub outcomes: Vec<VerificationOutcome>,

    /// Ascending by project key.
    pub hits: Vec<HitVerification>,

    pub summary: ReconciliationSummary,
}

// =============================================================================
// Run summary
// =============================================================================

/// A source that did not reach normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
}

/// Search statistics carried into the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub rows_total: usize,
    pub rows_scanned: usize,
    pub complete: bool,
    pub evidence: usize,
    pub matched_projects: usize,
    pub narrow_matched_projects: usize,
    pub skipped_targets: Vec<String>,
}

impl SearchStats {
    pub fn from_result(result: &SearchResult) -> Self {
        Self {
            rows_total: result.rows_total,
            rows_scanned: result.rows_scanned,
            complete: result.complete,
            evidence: result.evidence_count(),
            matched_projects: result.matched_projects().len(),
            narrow_matched_projects: result.matched_projects_in(SearchMode::Narrow).len(),
            skipped_targets: result.skipped_targets.clone(),
        }
    }
}

/// Everything a reader needs to judge whether a run was complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub schema_id: String,
    pub pattern_set_id: String,
    pub mode: SearchMode,
    pub sources_read: usize,
    pub skipped_sources: Vec<SkippedSource>,
    pub unmapped_sources: Vec<String>,
    pub tables: Vec<TableCount>,
    pub unkeyed_rows: usize,
    pub collisions: usize,
    pub value_conflicts: usize,
    pub search: SearchStats,
    pub reconciliation: Option<ReconciliationSummary>,
}
