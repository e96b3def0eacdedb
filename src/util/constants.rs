// TableSleuth - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every configurable value has a default, a lower bound and an upper bound
// here so config validation can be audited in one place.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "TableSleuth";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "TableSleuth";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Ingestion
// =============================================================================

/// Candidate encodings tried, in order, when decoding a source export.
///
/// `utf-8-sig` is not an encoding_rs label; the ingestor treats it as UTF-8
/// that must start with a byte-order mark. `cp932` is aliased to the
/// Windows-31J decoder, which encoding_rs shares with `shift_jis`.
pub const DEFAULT_ENCODINGS: &[&str] = &[
    "utf-8",
    "utf-8-sig",
    "shift_jis",
    "cp932",
    "euc-jp",
    "iso-2022-jp",
];

/// Pseudo-label for UTF-8 with a mandatory byte-order mark.
pub const UTF8_SIG_LABEL: &str = "utf-8-sig";

/// Maximum number of candidate encodings accepted from configuration.
pub const MAX_CANDIDATE_ENCODINGS: usize = 16;

/// File size threshold in bytes above which inputs are memory-mapped.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 64 * 1024 * 1024; // 64 MB

/// Minimum configurable large-file threshold.
pub const MIN_LARGE_FILE_THRESHOLD: u64 = 1024 * 1024; // 1 MB

/// Maximum directory recursion depth when discovering input files.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Maximum number of input files accepted in a single run.
pub const MAX_INPUT_FILES: usize = 1_000;

/// Default include glob patterns for input discovery.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &["*.csv", "*.CSV"];

/// Default exclude glob patterns for input discovery.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] =
    &["*.zip", "*.tmp", "~$*", ".git", "__MACOSX", "__pycache__"];

/// Retry limits for transient I/O errors.
pub const MAX_READ_RETRIES: u32 = 3;
pub const READ_RETRY_DELAYS_MS: [u64; 3] = [50, 100, 200];

// =============================================================================
// Normalization
// =============================================================================

/// Maximum `UnkeyedRow` records kept per source. The count stays exact;
/// only the detailed samples are capped.
pub const MAX_RECORDED_UNKEYED_ROWS: usize = 100;

/// Separator used when disambiguating repeated header names (`name.1`).
pub const DUPLICATE_HEADER_SEPARATOR: char = '.';

// =============================================================================
// Search
// =============================================================================

/// Rows handed to a worker in one chunk while scanning a canonical table.
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

/// Minimum configurable chunk size.
pub const MIN_CHUNK_ROWS: usize = 1;

/// Maximum configurable chunk size.
pub const MAX_CHUNK_ROWS: usize = 1_000_000;

/// Default number of worker threads for parallel scanning.
/// 0 means auto-detect (use available CPU cores).
pub const DEFAULT_WORKER_THREADS: usize = 0;

/// Hard upper bound on configured worker threads.
pub const MAX_WORKER_THREADS: usize = 256;

/// Characters of cell text kept around a match as audit context.
pub const EVIDENCE_CONTEXT_CHARS: usize = 300;

/// Maximum regex pattern length to prevent ReDoS.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Search mode labels accepted in `[search] mode` and `--mode`.
pub const SEARCH_MODES: &[&str] = &["narrow", "broad"];

/// Default search mode.
pub const DEFAULT_SEARCH_MODE: &str = "broad";

/// Maximum number of patterns in one pattern set.
pub const MAX_PATTERNS_PER_SET: usize = 512;

// =============================================================================
// Reconciliation
// =============================================================================

/// Default minimum similarity for a fuzzy match.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.85;

/// Score assigned (at least) when one normalized name contains the other.
pub const DEFAULT_CONTAINMENT_FLOOR: f64 = 0.90;

/// Lowest accepted fuzzy threshold. Anything lower turns unrelated names
/// into matches.
pub const MIN_FUZZY_THRESHOLD: f64 = 0.5;

/// Highest accepted fuzzy threshold.
pub const MAX_FUZZY_THRESHOLD: f64 = 1.0;

/// Similarity metric labels accepted in `[reconcile] metric`.
pub const SIMILARITY_METRICS: &[&str] =
    &["normalized_levenshtein", "jaro_winkler", "sorensen_dice"];

/// Default similarity metric.
pub const DEFAULT_SIMILARITY_METRIC: &str = "normalized_levenshtein";

/// Maximum reference list size in bytes.
pub const MAX_REFERENCE_FILE_SIZE: u64 = 16 * 1024 * 1024; // 16 MB

// =============================================================================
// Config documents (schema mappings, pattern sets)
// =============================================================================

/// Maximum size of a schema or pattern-set TOML file in bytes.
pub const MAX_DEFINITION_FILE_SIZE: u64 = 256 * 1024; // 256 KB

/// Maximum number of schema mappings or pattern sets loaded (built-in + user).
pub const MAX_DEFINITIONS: usize = 100;

/// Built-in schema mapping used when none is named.
pub const DEFAULT_SCHEMA_ID: &str = "rs-2024";

/// Built-in pattern set used when none is named.
pub const DEFAULT_PATTERN_SET_ID: &str = "ai";

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Accepted `[logging] level` values.
pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// =============================================================================
// Configuration and output
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// User schema mapping subdirectory name.
pub const SCHEMAS_DIR_NAME: &str = "schemas";

/// User pattern set subdirectory name.
pub const PATTERNS_DIR_NAME: &str = "patterns";

/// Default output directory (relative to the working directory).
pub const DEFAULT_OUTPUT_DIR: &str = "tablesleuth-out";

/// Subdirectory of the output directory holding one CSV per canonical table.
pub const TABLES_DIR_NAME: &str = "tables";
