// TableSleuth - core/schema.rs
//
// Schema mapping loading, validation, and compilation.
// Core layer: accepts TOML strings, never touches the filesystem.
// I/O is handled by app::config_mgr which feeds content here.
//
// A schema mapping is the data-driven routing table from
// (source table, raw column) to (canonical table, canonical column, role).
// New source layouts need new TOML rows, never new code.

use crate::core::model::Cardinality;
use crate::util::error::SchemaError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// =============================================================================
// TOML deserialization structures (raw input)
// =============================================================================

/// Raw TOML schema mapping as deserialized from a .toml file.
/// Validated and compiled into a `SchemaMapping` for runtime use.
#[derive(Debug, Deserialize)]
pub struct SchemaDefinition {
    pub schema: SchemaMeta,
    pub key: KeyDef,
    #[serde(default)]
    pub display: Option<DisplayDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub sources: Vec<SourceDef>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Fiscal year assumed for sources that carry no year column.
    #[serde(default)]
    pub default_fiscal_year: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct KeyDef {
    pub project_id: String,
    pub fiscal_year: String,
}

#[derive(Debug, Deserialize)]
pub struct DisplayDef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub cardinality: Cardinality,
}

#[derive(Debug, Deserialize)]
pub struct SourceDef {
    pub name: String,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    pub canonical_table: String,
    #[serde(default = "default_passthrough")]
    pub passthrough_unmapped: bool,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

fn default_passthrough() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ColumnDef {
    pub column: String,
    /// Defaults to the raw column name.
    #[serde(default)]
    pub canonical: Option<String>,
    #[serde(default)]
    pub role: ColumnRole,
}

/// What a routed raw column contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Key,
    #[default]
    Data,
    Ignore,
}

// =============================================================================
// Compiled mapping (runtime form)
// =============================================================================

/// Which half of the ProjectKey a key column supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPart {
    ProjectId,
    FiscalYear,
}

/// Resolved destination of one raw column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Key(KeyPart),
    Data(String),
    Skip,
}

/// An explicit column route from the mapping.
#[derive(Debug, Clone)]
pub struct ColumnRoute {
    pub column: String,
    pub canonical: String,
    pub role: ColumnRole,
}

/// Compiled routing for one source table.
#[derive(Debug, Clone)]
pub struct SourceMapping {
    pub name: String,
    pub file_patterns: Vec<glob::Pattern>,
    pub canonical_table: String,
    pub passthrough_unmapped: bool,
    pub routes: Vec<ColumnRoute>,
}

impl SourceMapping {
    /// True when `source_name` is this source, by name or by file pattern.
    pub fn claims(&self, source_name: &str) -> bool {
        self.name == source_name || self.file_patterns.iter().any(|p| p.matches(source_name))
    }
}

/// A validated, compiled schema mapping.
#[derive(Debug, Clone)]
pub struct SchemaMapping {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_fiscal_year: Option<u32>,

    /// Canonical names of the two key columns.
    pub key_project_id: String,
    pub key_fiscal_year: String,

    /// Canonical (table, column) holding a project's display name.
    pub display: Option<(String, String)>,

    /// Declaration order is output order.
    pub tables: Vec<(String, Cardinality)>,

    /// Declaration order is merge priority.
    pub sources: Vec<SourceMapping>,

    pub is_builtin: bool,
}

impl SchemaMapping {
    /// The first source definition claiming `source_name`.
    pub fn resolve_source(&self, source_name: &str) -> Option<&SourceMapping> {
        // Exact names win over patterns so a pattern on an earlier source
        // cannot shadow a later source's own name.
        self.sources
            .iter()
            .find(|s| s.name == source_name)
            .or_else(|| self.sources.iter().find(|s| s.claims(source_name)))
    }

    /// Where a raw column of `source` goes.
    ///
    /// Explicit routes win. An unrouted column named like a canonical key
    /// column is a key; anything else passes through under its own name
    /// when the source allows it.
    pub fn route(&self, source: &SourceMapping, raw_column: &str) -> Route {
        if let Some(r) = source.routes.iter().find(|r| r.column == raw_column) {
            return match r.role {
                ColumnRole::Key => self.key_part(&r.canonical).map_or(Route::Skip, Route::Key),
                ColumnRole::Data => Route::Data(r.canonical.clone()),
                ColumnRole::Ignore => Route::Skip,
            };
        }
        if let Some(part) = self.key_part(raw_column) {
            return Route::Key(part);
        }
        if source.passthrough_unmapped {
            Route::Data(raw_column.to_string())
        } else {
            Route::Skip
        }
    }

    pub fn key_part(&self, canonical: &str) -> Option<KeyPart> {
        if canonical == self.key_project_id {
            Some(KeyPart::ProjectId)
        } else if canonical == self.key_fiscal_year {
            Some(KeyPart::FiscalYear)
        } else {
            None
        }
    }

    /// Canonical name of a key column.
    pub fn key_name(&self, part: KeyPart) -> &str {
        match part {
            KeyPart::ProjectId => &self.key_project_id,
            KeyPart::FiscalYear => &self.key_fiscal_year,
        }
    }

    pub fn cardinality(&self, table: &str) -> Option<Cardinality> {
        self.tables.iter().find(|(n, _)| n == table).map(|(_, c)| *c)
    }
}

// =============================================================================
// Validation and compilation
// =============================================================================

/// Parse a TOML string into a `SchemaDefinition`.
///
/// `source_path` is used for error messages only.
pub fn parse_schema_toml(
    toml_content: &str,
    source_path: &Path,
) -> Result<SchemaDefinition, SchemaError> {
    toml::from_str(toml_content).map_err(|e| SchemaError::TomlParse {
        path: source_path.to_path_buf(),
        source: e,
    })
}

/// Validate a `SchemaDefinition` and compile it into a `SchemaMapping`.
///
/// Validates:
/// - Required fields are present and non-empty
/// - Table and source names are unique
/// - Exactly one `one_to_one` (master) table exists
/// - Every source and the display setting name a declared table
/// - `key` routes target one of the two key columns
/// - File patterns are valid globs
pub fn validate_and_compile(
    def: SchemaDefinition,
    source_path: &Path,
    is_builtin: bool,
) -> Result<SchemaMapping, SchemaError> {
    let id = def.schema.id.trim().to_string();

    if id.is_empty() {
        return Err(SchemaError::MissingField {
            schema_id: "(empty)".to_string(),
            field: "schema.id",
        });
    }
    let missing = |field: &'static str| SchemaError::MissingField {
        schema_id: id.clone(),
        field,
    };
    if def.schema.name.trim().is_empty() {
        return Err(missing("schema.name"));
    }
    if def.key.project_id.trim().is_empty() {
        return Err(missing("key.project_id"));
    }
    if def.key.fiscal_year.trim().is_empty() {
        return Err(missing("key.fiscal_year"));
    }
    if def.tables.is_empty() {
        return Err(missing("tables"));
    }

    let mut table_names = HashSet::new();
    for table in &def.tables {
        if table.name.trim().is_empty() {
            return Err(missing("tables.name"));
        }
        if !table_names.insert(table.name.as_str()) {
            return Err(SchemaError::DuplicateTable {
                schema_id: id.clone(),
                table: table.name.clone(),
            });
        }
    }

    let masters = def
        .tables
        .iter()
        .filter(|t| t.cardinality == Cardinality::OneToOne)
        .count();
    if masters != 1 {
        return Err(SchemaError::MasterTableCount {
            schema_id: id.clone(),
            found: masters,
        });
    }

    let display = match def.display {
        Some(d) => {
            if !table_names.contains(d.table.as_str()) {
                return Err(SchemaError::UnknownCanonicalTable {
                    schema_id: id.clone(),
                    referenced_by: "display".to_string(),
                    table: d.table,
                });
            }
            if d.column.trim().is_empty() {
                return Err(missing("display.column"));
            }
            Some((d.table, d.column))
        }
        None => None,
    };

    let key_names = [def.key.project_id.as_str(), def.key.fiscal_year.as_str()];
    let mut source_names = HashSet::new();
    let mut sources = Vec::with_capacity(def.sources.len());

    for src in &def.sources {
        if src.name.trim().is_empty() {
            return Err(missing("sources.name"));
        }
        if !source_names.insert(src.name.as_str()) {
            return Err(SchemaError::DuplicateSource {
                schema_id: id.clone(),
                source_name: src.name.clone(),
            });
        }
        if !table_names.contains(src.canonical_table.as_str()) {
            return Err(SchemaError::UnknownCanonicalTable {
                schema_id: id.clone(),
                referenced_by: src.name.clone(),
                table: src.canonical_table.clone(),
            });
        }

        let mut routes = Vec::with_capacity(src.columns.len());
        for col in &src.columns {
            if col.column.is_empty() {
                return Err(missing("sources.columns.column"));
            }
            let canonical = col.canonical.clone().unwrap_or_else(|| col.column.clone());
            if col.role == ColumnRole::Key && !key_names.contains(&canonical.as_str()) {
                return Err(SchemaError::KeyRouteMismatch {
                    schema_id: id.clone(),
                    source_name: src.name.clone(),
                    column: col.column.clone(),
                    canonical,
                });
            }
            routes.push(ColumnRoute {
                column: col.column.clone(),
                canonical,
                role: col.role,
            });
        }

        let file_patterns = src
            .file_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| SchemaError::InvalidFilePattern {
                    schema_id: id.clone(),
                    source_name: src.name.clone(),
                    pattern: p.clone(),
                    source: e,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        sources.push(SourceMapping {
            name: src.name.clone(),
            file_patterns,
            canonical_table: src.canonical_table.clone(),
            passthrough_unmapped: src.passthrough_unmapped,
            routes,
        });
    }

    if sources.is_empty() {
        tracing::warn!(
            schema_id = %id,
            source = %source_path.display(),
            "Schema declares no sources; every input will be unmapped"
        );
    }

    Ok(SchemaMapping {
        id,
        name: def.schema.name,
        description: def.schema.description,
        default_fiscal_year: def.schema.default_fiscal_year,
        key_project_id: def.key.project_id,
        key_fiscal_year: def.key.fiscal_year,
        display,
        tables: def
            .tables
            .into_iter()
            .map(|t| (t.name, t.cardinality))
            .collect(),
        sources,
        is_builtin,
    })
}

// =============================================================================
// Built-in schema mappings (embedded at compile time)
// =============================================================================

/// Embedded TOML content for built-in schema mappings: (filename, content).
pub fn builtin_schema_sources() -> Vec<(&'static str, &'static str)> {
    vec![("rs_2024.toml", include_str!("../../schemas/rs_2024.toml"))]
}

/// Load and validate all built-in schema mappings.
///
/// Invalid mappings are logged and skipped.
pub fn load_builtin_schemas() -> Vec<SchemaMapping> {
    let mut schemas = Vec::new();

    for (filename, content) in builtin_schema_sources() {
        let path = PathBuf::from(format!("<builtin>/{filename}"));
        match parse_schema_toml(content, &path)
            .and_then(|def| validate_and_compile(def, &path, true))
        {
            Ok(schema) => {
                tracing::debug!(schema_id = %schema.id, "Loaded built-in schema");
                schemas.push(schema);
            }
            Err(e) => {
                tracing::error!(file = filename, error = %e, "Failed to load built-in schema");
            }
        }
    }

    schemas
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_SCHEMA_TOML: &str = r#"
[schema]
id = "test-schema"
name = "Test Schema"
default_fiscal_year = 2024

[key]
project_id = "pid"
fiscal_year = "year"

[display]
table = "projects"
column = "name"

[[tables]]
name = "projects"
cardinality = "one_to_one"

[[tables]]
name = "budgets"
cardinality = "one_to_many"

[[sources]]
name = "master"
file_patterns = ["*master*"]
canonical_table = "projects"

[[sources.columns]]
column = "ID"
canonical = "pid"
role = "key"

[[sources.columns]]
column = "Title"
canonical = "name"

[[sources]]
name = "budget"
canonical_table = "budgets"
passthrough_unmapped = false

[[sources.columns]]
column = "amount"

[[sources.columns]]
column = "name"
role = "ignore"
"#;

    fn compile(toml: &str) -> Result<SchemaMapping, SchemaError> {
        let path = PathBuf::from("test.toml");
        let def = parse_schema_toml(toml, &path)?;
        validate_and_compile(def, &path, false)
    }

    #[test]
    fn test_compile_valid_schema() {
        let schema = compile(VALID_SCHEMA_TOML).unwrap();
        assert_eq!(schema.id, "test-schema");
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.cardinality("budgets"), Some(Cardinality::OneToMany));
        assert_eq!(schema.default_fiscal_year, Some(2024));
        assert_eq!(schema.display, Some(("projects".into(), "name".into())));
        assert!(!schema.is_builtin);
    }

    #[test]
    fn test_routing() {
        let schema = compile(VALID_SCHEMA_TOML).unwrap();
        let master = schema.resolve_source("master").unwrap();
        assert_eq!(schema.route(master, "ID"), Route::Key(KeyPart::ProjectId));
        assert_eq!(schema.route(master, "year"), Route::Key(KeyPart::FiscalYear));
        assert_eq!(schema.route(master, "Title"), Route::Data("name".into()));
        assert_eq!(schema.route(master, "other"), Route::Data("other".into()));

        let budget = schema.resolve_source("budget").unwrap();
        assert_eq!(schema.route(budget, "amount"), Route::Data("amount".into()));
        assert_eq!(schema.route(budget, "name"), Route::Skip);
        assert_eq!(schema.route(budget, "unlisted"), Route::Skip);
        assert_eq!(schema.route(budget, "pid"), Route::Key(KeyPart::ProjectId));
    }

    #[test]
    fn test_resolve_by_pattern_and_exact_name() {
        let schema = compile(VALID_SCHEMA_TOML).unwrap();
        assert_eq!(
            schema.resolve_source("2024_master_export").map(|s| s.name.as_str()),
            Some("master")
        );
        assert_eq!(
            schema.resolve_source("budget").map(|s| s.name.as_str()),
            Some("budget")
        );
        assert!(schema.resolve_source("unrelated").is_none());
    }

    #[test]
    fn test_unknown_canonical_table() {
        let toml = VALID_SCHEMA_TOML.replace(
            "canonical_table = \"budgets\"",
            "canonical_table = \"nowhere\"",
        );
        match compile(&toml).unwrap_err() {
            SchemaError::UnknownCanonicalTable { table, .. } => assert_eq!(table, "nowhere"),
            other => panic!("Expected UnknownCanonicalTable, got: {other:?}"),
        }
    }

    #[test]
    fn test_master_table_required() {
        let toml = VALID_SCHEMA_TOML.replace("one_to_one", "one_to_many");
        assert!(matches!(
            compile(&toml).unwrap_err(),
            SchemaError::MasterTableCount { found: 0, .. }
        ));
    }

    #[test]
    fn test_duplicate_source() {
        let toml = VALID_SCHEMA_TOML.replace("name = \"budget\"", "name = \"master\"");
        assert!(matches!(
            compile(&toml).unwrap_err(),
            SchemaError::DuplicateSource { .. }
        ));
    }

    #[test]
    fn test_key_route_to_data_column_rejected() {
        let toml = VALID_SCHEMA_TOML.replace("canonical = \"pid\"", "canonical = \"name\"");
        assert!(matches!(
            compile(&toml).unwrap_err(),
            SchemaError::KeyRouteMismatch { .. }
        ));
    }

    #[test]
    fn test_missing_id() {
        let toml = VALID_SCHEMA_TOML.replace("id = \"test-schema\"", "id = \"\"");
        match compile(&toml).unwrap_err() {
            SchemaError::MissingField { field, .. } => assert_eq!(field, "schema.id"),
            other => panic!("Expected MissingField, got: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_file_pattern() {
        let toml = VALID_SCHEMA_TOML.replace("*master*", "[master");
        assert!(matches!(
            compile(&toml).unwrap_err(),
            SchemaError::InvalidFilePattern { .. }
        ));
    }

    #[test]
    fn test_load_builtin_schemas() {
        let schemas = load_builtin_schemas();
        let rs = schemas
            .iter()
            .find(|s| s.id == "rs-2024")
            .expect("rs-2024 schema not found");
        assert!(rs.is_builtin);
        assert_eq!(rs.tables.len(), 15);
        assert_eq!(rs.sources.len(), 15);
        assert_eq!(
            rs.resolve_source("1-2_RS_2024_基本情報_事業概要等")
                .map(|s| s.canonical_table.as_str()),
            Some("projects")
        );
        assert_eq!(
            rs.resolve_source("5-1_RS_2024_支出先_支出情報")
                .map(|s| s.canonical_table.as_str()),
            Some("expenditure_info")
        );
    }
}
