// TableSleuth - core/normalize.rs
//
// Relational normalizer: RawTables + SchemaMapping -> NormalizedSchema.
// Core layer: pure transformation, no I/O.
//
// Raw tables are grouped by the canonical table their source definition
// targets and processed in schema source order, then input order. That
// order decides first-value-wins merges, so the output does not depend on
// how the caller happened to list its inputs across sources.

use crate::core::model::{
    Cardinality, CanonicalRow, CanonicalTable, ColumnCollision, ColumnRef, NormalizationReport,
    NormalizedSchema, ProjectKey, RawTable, RowOrigin, SourceStats,
};
use crate::core::schema::{KeyPart, Route, SchemaMapping};
use crate::core::text;
use crate::util::constants;
use crate::util::error::{KeyFailure, NormalizeError};
use std::collections::HashMap;

/// Column plan for one raw table.
struct SourcePlan<'a> {
    raw: &'a RawTable,
    /// Raw column positions supplying the project id, in column order.
    id_columns: Vec<usize>,
    year_columns: Vec<usize>,
    /// (raw column position, canonical column position).
    data_columns: Vec<(usize, usize)>,
}

/// Decompose raw tables into the canonical tables declared by `schema`.
///
/// Every declared table is present in the output, empty or not. Rows whose
/// key cannot be extracted are excluded and counted per source.
pub fn normalize(schema: &SchemaMapping, raw_tables: &[RawTable]) -> NormalizedSchema {
    let mut report = NormalizationReport::default();

    // Assign inputs to source definitions.
    let mut assigned: Vec<Vec<&RawTable>> = vec![Vec::new(); schema.sources.len()];
    for raw in raw_tables {
        match schema
            .sources
            .iter()
            .position(|s| s.name == raw.source_name)
            .or_else(|| schema.sources.iter().position(|s| s.claims(&raw.source_name)))
        {
            Some(idx) => assigned[idx].push(raw),
            None => {
                tracing::warn!(
                    source = %raw.source_name,
                    schema_id = %schema.id,
                    "No schema source claims this input"
                );
                report.unmapped_sources.push(raw.source_name.clone());
            }
        }
    }

    let mut tables = Vec::with_capacity(schema.tables.len());

    for (table_name, cardinality) in &schema.tables {
        let inputs: Vec<&RawTable> = schema
            .sources
            .iter()
            .zip(&assigned)
            .filter(|(src, _)| &src.canonical_table == table_name)
            .flat_map(|(_, raws)| raws.iter().copied())
            .collect();

        let table = build_table(schema, table_name, *cardinality, &inputs, &mut report);

        tracing::debug!(
            table = %table_name,
            sources = inputs.len(),
            rows = table.rows.len(),
            columns = table.columns.len(),
            "Canonical table built"
        );
        tables.push(table);
    }

    tracing::info!(
        schema_id = %schema.id,
        tables = tables.len(),
        unkeyed = report.total_unkeyed(),
        collisions = report.collisions.len(),
        value_conflicts = report.value_conflicts,
        unmapped = report.unmapped_sources.len(),
        "Normalization complete"
    );

    NormalizedSchema {
        schema_id: schema.id.clone(),
        tables,
        report,
    }
}

fn build_table(
    schema: &SchemaMapping,
    table_name: &str,
    cardinality: Cardinality,
    inputs: &[&RawTable],
    report: &mut NormalizationReport,
) -> CanonicalTable {
    let mut columns: Vec<String> = Vec::new();
    // Canonical column name -> raw contributors, first-appearance order.
    let mut contributors: Vec<(String, Vec<ColumnRef>)> = Vec::new();
    let mut plans = Vec::with_capacity(inputs.len());

    for raw in inputs {
        let Some(source) = schema.resolve_source(&raw.source_name) else {
            continue;
        };
        let mut plan = SourcePlan {
            raw,
            id_columns: Vec::new(),
            year_columns: Vec::new(),
            data_columns: Vec::new(),
        };

        for (pos, raw_column) in raw.columns.iter().enumerate() {
            let canonical = match schema.route(source, raw_column) {
                Route::Key(part) => {
                    match part {
                        KeyPart::ProjectId => plan.id_columns.push(pos),
                        KeyPart::FiscalYear => plan.year_columns.push(pos),
                    }
                    schema.key_name(part).to_string()
                }
                Route::Data(canonical) => {
                    let idx = match columns.iter().position(|c| *c == canonical) {
                        Some(idx) => idx,
                        None => {
                            columns.push(canonical.clone());
                            columns.len() - 1
                        }
                    };
                    plan.data_columns.push((pos, idx));
                    canonical
                }
                Route::Skip => continue,
            };

            let column_ref = ColumnRef {
                source: raw.source_name.clone(),
                column: raw_column.clone(),
            };
            match contributors.iter_mut().find(|(c, _)| *c == canonical) {
                Some((_, refs)) => refs.push(column_ref),
                None => contributors.push((canonical, vec![column_ref])),
            }
        }
        plans.push(plan);
    }

    for (canonical_column, refs) in contributors {
        if refs.len() > 1 {
            tracing::debug!(
                table = table_name,
                column = %canonical_column,
                contributors = refs.len(),
                "Column collision resolved by first non-null value"
            );
            report.collisions.push(ColumnCollision {
                canonical_table: table_name.to_string(),
                canonical_column,
                contributors: refs,
            });
        }
    }

    let width = columns.len();
    let mut rows: Vec<CanonicalRow> = Vec::new();
    let mut by_key: HashMap<ProjectKey, usize> = HashMap::new();

    for plan in &plans {
        let raw = plan.raw;
        let mut keyed = 0;
        let mut unkeyed = 0;

        for (row_index, raw_row) in raw.rows.iter().enumerate() {
            let key = match extract_key(schema, plan, raw_row) {
                Ok(key) => key,
                Err(reason) => {
                    unkeyed += 1;
                    tracing::debug!(
                        source = %raw.source_name,
                        row = row_index,
                        reason = %reason,
                        "Unkeyed row excluded"
                    );
                    if unkeyed <= constants::MAX_RECORDED_UNKEYED_ROWS {
                        report.unkeyed_samples.push(NormalizeError::UnkeyedRow {
                            source_name: raw.source_name.clone(),
                            row_index,
                            reason,
                        });
                    }
                    continue;
                }
            };
            keyed += 1;

            let origin = RowOrigin {
                source: raw.source_name.clone(),
                row_index,
            };

            let existing = match cardinality {
                Cardinality::OneToOne => by_key.get(&key).copied(),
                Cardinality::OneToMany => None,
            };

            match existing {
                Some(idx) => {
                    let row = &mut rows[idx];
                    for &(raw_pos, canon_pos) in &plan.data_columns {
                        let incoming = raw_row.get(raw_pos).and_then(|v| v.as_deref());
                        report.value_conflicts +=
                            merge_value(&mut row.values[canon_pos], incoming);
                    }
                    row.origins.push(origin);
                }
                None => {
                    let mut values = vec![None; width];
                    for &(raw_pos, canon_pos) in &plan.data_columns {
                        let incoming = raw_row.get(raw_pos).and_then(|v| v.as_deref());
                        report.value_conflicts += merge_value(&mut values[canon_pos], incoming);
                    }
                    if cardinality == Cardinality::OneToOne {
                        by_key.insert(key, rows.len());
                    }
                    rows.push(CanonicalRow {
                        key,
                        values,
                        origins: vec![origin],
                    });
                }
            }
        }

        if unkeyed > 0 {
            tracing::warn!(
                source = %raw.source_name,
                unkeyed,
                keyed,
                "Rows without a usable project key were excluded"
            );
        }
        tracing::info!(
            source = %raw.source_name,
            table = table_name,
            encoding = %raw.encoding,
            rows = raw.row_count(),
            keyed,
            "Source normalized"
        );

        report.sources.push(SourceStats {
            source: raw.source_name.clone(),
            canonical_table: table_name.to_string(),
            encoding: raw.encoding.clone(),
            rows: raw.row_count(),
            keyed,
            unkeyed,
        });
    }

    CanonicalTable {
        name: table_name.to_string(),
        cardinality,
        columns,
        rows,
    }
}

/// Fill an empty slot; returns 1 when a differing value is discarded.
fn merge_value(slot: &mut Option<String>, incoming: Option<&str>) -> usize {
    match (slot.as_deref(), incoming) {
        (_, None) => 0,
        (None, Some(v)) => {
            *slot = Some(v.to_string());
            0
        }
        (Some(current), Some(v)) => usize::from(current != v),
    }
}

fn extract_key(
    schema: &SchemaMapping,
    plan: &SourcePlan<'_>,
    row: &[Option<String>],
) -> Result<ProjectKey, KeyFailure> {
    let id_text = first_value(row, &plan.id_columns).ok_or(KeyFailure::MissingProjectId)?;
    let project_id = parse_key_number::<u64>(id_text)
        .ok_or(KeyFailure::MissingProjectId)?
        .map_err(|_| KeyFailure::InvalidProjectId)?;

    let fiscal_year = if plan.year_columns.is_empty() {
        schema
            .default_fiscal_year
            .ok_or(KeyFailure::MissingFiscalYear)?
    } else {
        let year_text =
            first_value(row, &plan.year_columns).ok_or(KeyFailure::MissingFiscalYear)?;
        parse_key_number::<u32>(year_text)
            .ok_or(KeyFailure::MissingFiscalYear)?
            .map_err(|_| KeyFailure::InvalidFiscalYear)?
    };

    Ok(ProjectKey::new(project_id, fiscal_year))
}

/// First non-null value among `positions`.
fn first_value<'r>(row: &'r [Option<String>], positions: &[usize]) -> Option<&'r str> {
    positions
        .iter()
        .find_map(|&pos| row.get(pos).and_then(|v| v.as_deref()))
}

/// Parse a key cell. `None` when the cell is blank after folding.
///
/// Accepts full-width digits and the `.0` suffix spreadsheet exports add
/// to integer columns.
fn parse_key_number<T: std::str::FromStr>(cell: &str) -> Option<Result<T, T::Err>> {
    let folded = text::fold_key_text(cell);
    if folded.is_empty() {
        return None;
    }
    let digits = folded.strip_suffix(".0").unwrap_or(&folded);
    Some(digits.parse::<T>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{parse_schema_toml, validate_and_compile};
    use std::path::PathBuf;

    const SCHEMA_TOML: &str = r#"
[schema]
id = "t"
name = "Test"
default_fiscal_year = 2024

[key]
project_id = "project_id"
fiscal_year = "fiscal_year"

[[tables]]
name = "projects"
cardinality = "one_to_one"

[[tables]]
name = "budgets"
cardinality = "one_to_many"

[[tables]]
name = "contracts"
cardinality = "one_to_many"

[[sources]]
name = "overview"
canonical_table = "projects"

[[sources]]
name = "outline"
canonical_table = "projects"

[[sources]]
name = "budget"
canonical_table = "budgets"

[[sources.columns]]
column = "name"
role = "ignore"
"#;

    fn schema() -> SchemaMapping {
        let path = PathBuf::from("t.toml");
        validate_and_compile(parse_schema_toml(SCHEMA_TOML, &path).unwrap(), &path, false)
            .unwrap()
    }

    fn raw(name: &str, columns: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            source_name: name.to_string(),
            encoding: "utf-8".to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|v| (!v.is_empty()).then(|| v.to_string()))
                        .collect()
                })
                .collect(),
        }
    }

    #[test]
    fn test_shared_key_column_collapses_with_one_collision() {
        let a = raw("overview", &["project_id", "name"], &[&["1", "Alpha"], &["2", "Beta"]]);
        let b = raw("outline", &["project_id", "purpose"], &[&["1", "p1"], &["2", "p2"]]);
        let out = normalize(&schema(), &[a, b]);

        let projects = out.table("projects").unwrap();
        assert_eq!(projects.columns, vec!["name", "purpose"]);
        assert_eq!(projects.rows.len(), 2);
        assert_eq!(projects.rows[0].key, ProjectKey::new(1, 2024));
        assert_eq!(projects.value(0, 1), Some("p1"));
        assert_eq!(projects.rows[0].origins.len(), 2);

        assert_eq!(out.report.collisions.len(), 1);
        assert_eq!(out.report.collisions[0].canonical_column, "project_id");
        assert_eq!(out.report.collisions[0].contributors.len(), 2);
    }

    #[test]
    fn test_first_non_null_wins_and_conflicts_are_counted() {
        let a = raw("overview", &["project_id", "name"], &[&["1", ""], &["2", "Beta"]]);
        let b = raw("outline", &["project_id", "name"], &[&["1", "Alpha"], &["2", "Gamma"]]);
        let out = normalize(&schema(), &[a, b]);
        let projects = out.table("projects").unwrap();
        assert_eq!(projects.value(0, 0), Some("Alpha"));
        assert_eq!(projects.value(1, 0), Some("Beta"));
        assert_eq!(out.report.value_conflicts, 1);
    }

    #[test]
    fn test_merge_order_follows_schema_not_input_order() {
        let a = raw("overview", &["project_id", "name"], &[&["1", "From overview"]]);
        let b = raw("outline", &["project_id", "name"], &[&["1", "From outline"]]);
        let forward = normalize(&schema(), &[a.clone(), b.clone()]);
        let reversed = normalize(&schema(), &[b, a]);
        assert_eq!(forward.tables, reversed.tables);
        assert_eq!(
            forward.table("projects").unwrap().value(0, 0),
            Some("From overview")
        );
    }

    #[test]
    fn test_one_to_many_keeps_rows_in_source_order() {
        let b = raw(
            "budget",
            &["project_id", "fiscal_year", "name", "amount"],
            &[&["7", "2023", "x", "10"], &["7", "2024", "x", "20"], &["7", "2024", "x", "30"]],
        );
        let out = normalize(&schema(), &[b]);
        let budgets = out.table("budgets").unwrap();
        assert_eq!(budgets.columns, vec!["amount"]);
        let amounts: Vec<_> = (0..3).map(|r| budgets.value(r, 0)).collect();
        assert_eq!(amounts, vec![Some("10"), Some("20"), Some("30")]);
        assert_eq!(budgets.rows[0].key, ProjectKey::new(7, 2023));
    }

    #[test]
    fn test_unkeyed_rows_are_counted_not_dropped_silently() {
        let b = raw(
            "budget",
            &["project_id", "amount"],
            &[&["1", "10"], &["", "20"], &["abc", "30"], &["１２", "40"], &["3.0", "50"]],
        );
        let out = normalize(&schema(), &[b]);
        let stats = &out.report.sources[0];
        assert_eq!(stats.rows, 5);
        assert_eq!(stats.keyed, 3);
        assert_eq!(stats.unkeyed, 2);
        assert_eq!(out.report.unkeyed_samples.len(), 2);
        let budgets = out.table("budgets").unwrap();
        assert_eq!(budgets.rows[1].key, ProjectKey::new(12, 2024));
        assert_eq!(budgets.rows[2].key, ProjectKey::new(3, 2024));
    }

    #[test]
    fn test_row_counts_match_keyed_rows_per_source() {
        let a = raw("overview", &["project_id", "name"], &[&["1", "A"], &["1", "A"], &["x", "B"]]);
        let b = raw("budget", &["project_id", "amount"], &[&["1", "5"], &["1", "6"], &["", "7"]]);
        let out = normalize(&schema(), &[a, b]);
        for stats in &out.report.sources {
            assert_eq!(out.rows_from_source(&stats.source), stats.rows - stats.unkeyed);
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let a = raw("overview", &["project_id", "name"], &[&["2", "B"], &["1", "A"]]);
        let b = raw("budget", &["project_id", "amount"], &[&["1", "5"], &["2", "6"]]);
        let first = normalize(&schema(), &[a.clone(), b.clone()]);
        let second = normalize(&schema(), &[a, b]);
        assert_eq!(first.tables, second.tables);
    }

    #[test]
    fn test_empty_and_unmapped() {
        let stray = raw("mystery", &["project_id"], &[&["1"]]);
        let out = normalize(&schema(), &[stray]);
        assert_eq!(out.tables.len(), 3);
        assert!(out.table("contracts").unwrap().is_empty());
        assert_eq!(out.report.unmapped_sources, vec!["mystery"]);
    }

    #[test]
    fn test_missing_fiscal_year_without_default() {
        let toml = SCHEMA_TOML.replace("default_fiscal_year = 2024\n", "");
        let path = PathBuf::from("t.toml");
        let schema =
            validate_and_compile(parse_schema_toml(&toml, &path).unwrap(), &path, false).unwrap();
        let b = raw("budget", &["project_id"], &[&["1"]]);
        let out = normalize(&schema, &[b]);
        match &out.report.unkeyed_samples[0] {
            NormalizeError::UnkeyedRow { reason, .. } => {
                assert_eq!(*reason, KeyFailure::MissingFiscalYear)
            }
        }
    }
}
