// TableSleuth - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation.
// All errors preserve the causal chain for diagnostic logging.
//
// Propagation policy:
//   - Configuration-scoped errors (schema mapping, pattern set, reference
//     list, config.toml) abort a run before any output is written.
//   - Source-scoped errors (`IngestError::DecodeExhausted`) skip that source.
//   - Row-scoped errors (`NormalizeError::UnkeyedRow`) are recorded and
//     counted, never returned.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all TableSleuth operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum TableSleuthError {
    /// Input discovery failed.
    Discovery(DiscoveryError),

    /// A source could not be decoded.
    Ingest(IngestError),

    /// Schema mapping loading or validation failed.
    Schema(SchemaError),

    /// Pattern set loading, validation, or compilation failed.
    Pattern(PatternError),

    /// The reference list could not be read.
    Reference(ReferenceError),

    /// Writing results failed.
    Export(ExportError),

    /// Configuration loading or validation failed.
    Config(ConfigError),
}

impl fmt::Display for TableSleuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(e) => write!(f, "Discovery error: {e}"),
            Self::Ingest(e) => write!(f, "Ingest error: {e}"),
            Self::Schema(e) => write!(f, "Schema error: {e}"),
            Self::Pattern(e) => write!(f, "Pattern error: {e}"),
            Self::Reference(e) => write!(f, "Reference list error: {e}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
        }
    }
}

impl std::error::Error for TableSleuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Discovery(e) => Some(e),
            Self::Ingest(e) => Some(e),
            Self::Schema(e) => Some(e),
            Self::Pattern(e) => Some(e),
            Self::Reference(e) => Some(e),
            Self::Export(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors related to input file discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The input path does not exist or is not accessible.
    RootNotFound { path: PathBuf },

    /// The input path is not a directory.
    NotADirectory { path: PathBuf },

    /// Maximum input file count exceeded.
    MaxFilesExceeded { max: usize },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound { path } => {
                write!(f, "Input path '{}' does not exist", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Input path '{}' is not a directory", path.display())
            }
            Self::MaxFilesExceeded { max } => write!(
                f,
                "Discovery stopped: more than {max} input files. \
                 Narrow the input directory."
            ),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<DiscoveryError> for TableSleuthError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Ingest errors
// ---------------------------------------------------------------------------

/// Why one candidate encoding was rejected for a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    /// The byte stream contains sequences that are malformed in this encoding.
    Malformed,

    /// `utf-8-sig` was requested but the stream has no byte-order mark.
    MissingBom,

    /// Decoding succeeded but the header row yielded no columns.
    NoColumns,

    /// A data row has more fields than the header.
    RowTooLong {
        row_index: usize,
        fields: usize,
        columns: usize,
    },

    /// The CSV reader rejected the decoded text.
    Csv(String),
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed byte sequence"),
            Self::MissingBom => f.write_str("no UTF-8 byte-order mark"),
            Self::NoColumns => f.write_str("header row has no columns"),
            Self::RowTooLong {
                row_index,
                fields,
                columns,
            } => write!(
                f,
                "row {row_index} has {fields} fields but the header has {columns}"
            ),
            Self::Csv(reason) => write!(f, "CSV structure error: {reason}"),
        }
    }
}

/// One rejected decoding attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeAttempt {
    pub encoding: String,
    pub failure: DecodeFailure,
}

/// Errors related to decoding a source export.
#[derive(Debug)]
pub enum IngestError {
    /// Every candidate encoding failed for this source.
    DecodeExhausted {
        source_name: String,
        attempts: Vec<DecodeAttempt>,
    },

    /// The candidate encoding list is empty.
    NoCandidateEncodings { source_name: String },

    /// I/O error while reading a source file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecodeExhausted {
                source_name,
                attempts,
            } => {
                write!(f, "'{source_name}': no candidate encoding decoded the table")?;
                for attempt in attempts {
                    write!(f, "; {}: {}", attempt.encoding, attempt.failure)?;
                }
                Ok(())
            }
            Self::NoCandidateEncodings { source_name } => {
                write!(f, "'{source_name}': no candidate encodings configured")
            }
            Self::Io { path, source } => {
                write!(f, "'{}': I/O error: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<IngestError> for TableSleuthError {
    fn from(e: IngestError) -> Self {
        Self::Ingest(e)
    }
}

// ---------------------------------------------------------------------------
// Normalize errors (recorded, never returned)
// ---------------------------------------------------------------------------

/// Why a row's ProjectKey could not be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFailure {
    MissingProjectId,
    InvalidProjectId,
    MissingFiscalYear,
    InvalidFiscalYear,
}

impl fmt::Display for KeyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingProjectId => "project id is empty",
            Self::InvalidProjectId => "project id is not an integer",
            Self::MissingFiscalYear => "fiscal year is empty",
            Self::InvalidFiscalYear => "fiscal year is not an integer",
        })
    }
}

/// Row-scoped normalization errors. Recovered locally by exclusion.
#[derive(Debug, Clone, serde::Serialize)]
pub enum NormalizeError {
    /// A row lacks a usable ProjectKey.
    UnkeyedRow {
        source_name: String,
        row_index: usize,
        reason: KeyFailure,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnkeyedRow {
                source_name,
                row_index,
                reason,
            } => write!(f, "'{source_name}' row {row_index}: {reason}"),
        }
    }
}

impl std::error::Error for NormalizeError {}

// ---------------------------------------------------------------------------
// Schema mapping errors
// ---------------------------------------------------------------------------

/// Errors related to schema mapping loading and validation.
#[derive(Debug)]
pub enum SchemaError {
    /// TOML file could not be parsed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Definition file exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// A required field is missing or empty.
    MissingField {
        schema_id: String,
        field: &'static str,
    },

    /// Two `[[tables]]` entries share a name.
    DuplicateTable { schema_id: String, table: String },

    /// Two `[[sources]]` entries share a name.
    DuplicateSource { schema_id: String, source_name: String },

    /// A source or display setting names a canonical table that is not declared.
    UnknownCanonicalTable {
        schema_id: String,
        referenced_by: String,
        table: String,
    },

    /// Exactly one `one_to_one` (master) table is required.
    MasterTableCount { schema_id: String, found: usize },

    /// A `key` route targets a column that is not a key column.
    KeyRouteMismatch {
        schema_id: String,
        source_name: String,
        column: String,
        canonical: String,
    },

    /// A source file pattern is not a valid glob.
    InvalidFilePattern {
        schema_id: String,
        source_name: String,
        pattern: String,
        source: glob::PatternError,
    },

    /// Two user files define the same schema id.
    DuplicateId {
        id: String,
        path1: PathBuf,
        path2: PathBuf,
    },

    /// Maximum number of schema mappings exceeded.
    TooManyDefinitions { count: usize, max: usize },

    /// The requested schema mapping id is not loaded.
    UnknownSchema { id: String, available: Vec<String> },

    /// I/O error reading a definition file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Failed to parse TOML '{}': {source}", path.display())
            }
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Schema '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::MissingField { schema_id, field } => {
                write!(f, "Schema '{schema_id}': missing required field '{field}'")
            }
            Self::DuplicateTable { schema_id, table } => {
                write!(f, "Schema '{schema_id}': table '{table}' declared twice")
            }
            Self::DuplicateSource {
                schema_id,
                source_name,
            } => write!(
                f,
                "Schema '{schema_id}': source '{source_name}' declared twice"
            ),
            Self::UnknownCanonicalTable {
                schema_id,
                referenced_by,
                table,
            } => write!(
                f,
                "Schema '{schema_id}': '{referenced_by}' refers to undeclared table '{table}'"
            ),
            Self::MasterTableCount { schema_id, found } => write!(
                f,
                "Schema '{schema_id}': expected exactly one one_to_one table, found {found}"
            ),
            Self::KeyRouteMismatch {
                schema_id,
                source_name,
                column,
                canonical,
            } => write!(
                f,
                "Schema '{schema_id}': source '{source_name}' routes '{column}' as a key \
                 to '{canonical}', which is not a key column"
            ),
            Self::InvalidFilePattern {
                schema_id,
                source_name,
                pattern,
                source,
            } => write!(
                f,
                "Schema '{schema_id}': source '{source_name}' has invalid file pattern \
                 '{pattern}': {source}"
            ),
            Self::DuplicateId { id, path1, path2 } => write!(
                f,
                "Duplicate schema ID '{id}' in '{}' and '{}'",
                path1.display(),
                path2.display()
            ),
            Self::TooManyDefinitions { count, max } => {
                write!(f, "Too many schemas loaded ({count}), maximum is {max}")
            }
            Self::UnknownSchema { id, available } => write!(
                f,
                "Schema '{id}' is not loaded. Available: {}",
                available.join(", ")
            ),
            Self::Io { path, source } => {
                write!(f, "I/O error reading schema '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::InvalidFilePattern { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<SchemaError> for TableSleuthError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

// ---------------------------------------------------------------------------
// Pattern set errors
// ---------------------------------------------------------------------------

/// Errors related to pattern set loading, validation, and compilation.
#[derive(Debug)]
pub enum PatternError {
    /// TOML file could not be parsed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Definition file exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// A required field is missing or empty.
    MissingField {
        set_id: String,
        field: &'static str,
    },

    /// A pattern's regex failed to compile.
    PatternCompile {
        set_id: String,
        pattern_id: String,
        pattern: String,
        source: regex::Error,
    },

    /// A regex pattern exceeds the maximum allowed length.
    RegexTooLong {
        set_id: String,
        pattern_id: String,
        length: usize,
        max_length: usize,
    },

    /// Two patterns in one set share an id.
    DuplicatePatternId { set_id: String, pattern_id: String },

    /// The set has more patterns than allowed.
    TooManyPatterns {
        set_id: String,
        count: usize,
        max: usize,
    },

    /// A scan target lists no columns.
    EmptyTarget { set_id: String, table: String },

    /// Two user files define the same pattern set id.
    DuplicateId {
        id: String,
        path1: PathBuf,
        path2: PathBuf,
    },

    /// Maximum number of pattern sets exceeded.
    TooManyDefinitions { count: usize, max: usize },

    /// The requested pattern set id is not loaded.
    UnknownPatternSet { id: String, available: Vec<String> },

    /// I/O error reading a definition file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Failed to parse TOML '{}': {source}", path.display())
            }
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Pattern set '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::MissingField { set_id, field } => {
                write!(f, "Pattern set '{set_id}': missing required field '{field}'")
            }
            Self::PatternCompile {
                set_id,
                pattern_id,
                pattern,
                source,
            } => write!(
                f,
                "Pattern set '{set_id}': pattern '{pattern_id}' ('{pattern}') \
                 does not compile: {source}"
            ),
            Self::RegexTooLong {
                set_id,
                pattern_id,
                length,
                max_length,
            } => write!(
                f,
                "Pattern set '{set_id}': pattern '{pattern_id}' is {length} chars, \
                 exceeds maximum of {max_length}"
            ),
            Self::DuplicatePatternId { set_id, pattern_id } => write!(
                f,
                "Pattern set '{set_id}': pattern id '{pattern_id}' used twice"
            ),
            Self::TooManyPatterns { set_id, count, max } => write!(
                f,
                "Pattern set '{set_id}' has {count} patterns, maximum is {max}"
            ),
            Self::EmptyTarget { set_id, table } => write!(
                f,
                "Pattern set '{set_id}': target table '{table}' lists no columns"
            ),
            Self::DuplicateId { id, path1, path2 } => write!(
                f,
                "Duplicate pattern set ID '{id}' in '{}' and '{}'",
                path1.display(),
                path2.display()
            ),
            Self::TooManyDefinitions { count, max } => {
                write!(f, "Too many pattern sets loaded ({count}), maximum is {max}")
            }
            Self::UnknownPatternSet { id, available } => write!(
                f,
                "Pattern set '{id}' is not loaded. Available: {}",
                available.join(", ")
            ),
            Self::Io { path, source } => write!(
                f,
                "I/O error reading pattern set '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::PatternCompile { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PatternError> for TableSleuthError {
    fn from(e: PatternError) -> Self {
        Self::Pattern(e)
    }
}

// ---------------------------------------------------------------------------
// Reference list errors
// ---------------------------------------------------------------------------

/// Errors related to reading the authoritative reference list.
#[derive(Debug)]
pub enum ReferenceError {
    /// The list exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// No candidate encoding decoded the list.
    Undecodable { path: PathBuf, tried: Vec<String> },

    /// I/O error reading the list.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Reference list '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::Undecodable { path, tried } => write!(
                f,
                "Reference list '{}' could not be decoded (tried {})",
                path.display(),
                tried.join(", ")
            ),
            Self::Io { path, source } => write!(
                f,
                "I/O error reading reference list '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ReferenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ReferenceError> for TableSleuthError {
    fn from(e: ReferenceError) -> Self {
        Self::Reference(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to writing results.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error writing an output file.
    Io { path: PathBuf, source: io::Error },

    /// CSV serialisation error.
    Csv { path: PathBuf, source: csv::Error },

    /// JSON serialisation error.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Export I/O error '{}': {source}", path.display())
            }
            Self::Csv { path, source } => {
                write!(f, "CSV export error '{}': {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "JSON export error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
        }
    }
}

impl From<ExportError> for TableSleuthError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// An encoding label is not known to the decoder.
    UnknownEncoding { label: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::UnknownEncoding { label } => {
                write!(f, "Unknown encoding label '{label}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for TableSleuthError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for TableSleuth results.
pub type Result<T> = std::result::Result<T, TableSleuthError>;
