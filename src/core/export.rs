// TableSleuth - core/export.rs
//
// Output contract and CSV/JSON writers.
// Core layer: writes to any Write trait object. Where the bytes land is the
// sink implementation's business (see app::sink).

use crate::core::model::{
    CanonicalTable, MatchClass, NormalizedSchema, ReconciliationReport, RunSummary, SearchResult,
};
use crate::core::schema::SchemaMapping;
use crate::util::error::ExportError;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Receives the results of one run.
///
/// The pipeline calls every method once, in declaration order, and only
/// after every stage has succeeded.
pub trait ResultSink {
    fn write_tables(
        &mut self,
        schema: &SchemaMapping,
        normalized: &NormalizedSchema,
    ) -> Result<(), ExportError>;

    fn write_evidence(&mut self, search: &SearchResult) -> Result<(), ExportError>;

    /// Not called when the run has no reference list.
    fn write_verification(&mut self, report: &ReconciliationReport) -> Result<(), ExportError>;

    fn finish(&mut self, summary: &RunSummary) -> Result<(), ExportError>;
}

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> ExportError + '_ {
    move |e| ExportError::Csv {
        path: path.to_path_buf(),
        source: e,
    }
}

fn flush<W: Write>(mut writer: csv::Writer<W>, path: &Path) -> Result<(), ExportError> {
    writer.flush().map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write one canonical table as CSV: the two key columns, then data columns.
///
/// `path` is used for error messages only. Returns the row count.
pub fn export_table_csv<W: Write>(
    table: &CanonicalTable,
    key_columns: (&str, &str),
    writer: W,
    path: &Path,
) -> Result<usize, ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec![key_columns.0, key_columns.1];
    header.extend(table.columns.iter().map(String::as_str));
    csv_writer.write_record(&header).map_err(csv_err(path))?;

    for row in &table.rows {
        let id = row.key.project_id.to_string();
        let year = row.key.fiscal_year.to_string();
        let mut record = vec![id.as_str(), year.as_str()];
        record.extend(row.values.iter().map(|v| v.as_deref().unwrap_or("")));
        csv_writer.write_record(&record).map_err(csv_err(path))?;
    }

    flush(csv_writer, path)?;
    Ok(table.rows.len())
}

/// Write every evidence entry as one CSV row, in result order.
pub fn export_evidence_csv<W: Write>(
    search: &SearchResult,
    writer: W,
    path: &Path,
) -> Result<usize, ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record([
            "project_id",
            "fiscal_year",
            "table",
            "column",
            "pattern_id",
            "category",
            "matched_text",
            "row_index",
            "start",
            "end",
            "context",
        ])
        .map_err(csv_err(path))?;

    let mut count = 0;
    for e in search.evidence.values().flatten() {
        csv_writer
            .write_record([
                e.key.project_id.to_string().as_str(),
                e.key.fiscal_year.to_string().as_str(),
                &e.table,
                &e.column,
                &e.pattern_id,
                e.category.label(),
                &e.matched_text,
                e.row_index.to_string().as_str(),
                e.start.to_string().as_str(),
                e.end.to_string().as_str(),
                &e.context,
            ])
            .map_err(csv_err(path))?;
        count += 1;
    }

    flush(csv_writer, path)?;
    Ok(count)
}

/// Write one row per reference record.
pub fn export_verification_csv<W: Write>(
    report: &ReconciliationReport,
    writer: W,
    path: &Path,
) -> Result<usize, ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record([
            "reference_id",
            "reference_name",
            "classification",
            "project_id",
            "fiscal_year",
            "project_name",
            "score",
            "tied_with",
        ])
        .map_err(csv_err(path))?;

    for o in &report.outcomes {
        // Missing outcomes show their best candidate so a reviewer can see
        // how close the miss was.
        let shown = o.matched.as_ref().or(o.best_candidate.as_ref());
        let (id, year, name, score) = match shown {
            Some(c) => (
                c.key.project_id.to_string(),
                c.key.fiscal_year.to_string(),
                c.name.as_str(),
                match o.classification {
                    MatchClass::Exact => String::new(),
                    _ => format!("{:.4}", c.score),
                },
            ),
            None => (String::new(), String::new(), "", String::new()),
        };
        let tied = o
            .tie
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        csv_writer
            .write_record([
                o.reference.id.to_string().as_str(),
                &o.reference.name,
                o.classification.label(),
                &id,
                &year,
                name,
                &score,
                &tied,
            ])
            .map_err(csv_err(path))?;
    }

    flush(csv_writer, path)?;
    Ok(report.outcomes.len())
}

/// Pretty-print any result record as JSON.
pub fn export_json<W: Write, T: Serialize + ?Sized>(
    value: &T,
    writer: W,
    path: &Path,
) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, value).map_err(|e| ExportError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{
        Candidate, CanonicalRow, Cardinality, MatchEvidence, PatternCategory, ProjectKey,
        ReconciliationSummary, ReferenceRecord, RowOrigin, SearchMode, VerificationOutcome,
    };
    use std::collections::BTreeMap;

    fn table() -> CanonicalTable {
        CanonicalTable {
            name: "projects".to_string(),
            cardinality: Cardinality::OneToOne,
            columns: vec!["事業名".to_string(), "備考".to_string()],
            rows: vec![CanonicalRow {
                key: ProjectKey::new(42, 2024),
                values: vec![Some("AI, \"基盤\"".to_string()), None],
                origins: vec![RowOrigin {
                    source: "s".to_string(),
                    row_index: 0,
                }],
            }],
        }
    }

    fn search() -> SearchResult {
        let key = ProjectKey::new(42, 2024);
        let mut evidence = BTreeMap::new();
        evidence.insert(
            key,
            vec![MatchEvidence {
                key,
                table: "projects".to_string(),
                column: "事業名".to_string(),
                pattern_id: "ai-halfwidth".to_string(),
                category: PatternCategory::Narrow,
                matched_text: "AI".to_string(),
                row_index: 0,
                start: 0,
                end: 2,
                context: "AI, \"基盤\"".to_string(),
            }],
        );
        SearchResult {
            pattern_set_id: "ai".to_string(),
            mode: SearchMode::Broad,
            evidence,
            rows_total: 1,
            rows_scanned: 1,
            complete: true,
            skipped_targets: Vec::new(),
        }
    }

    #[test]
    fn test_table_csv_has_key_columns_and_quotes() {
        let mut buf = Vec::new();
        let count =
            export_table_csv(&table(), ("予算事業ID", "事業年度"), &mut buf, Path::new("t.csv"))
                .unwrap();
        assert_eq!(count, 1);
        let output = String::from_utf8(buf).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("予算事業ID,事業年度,事業名,備考"));
        assert_eq!(lines.next(), Some("42,2024,\"AI, \"\"基盤\"\"\","));
    }

    #[test]
    fn test_evidence_csv() {
        let mut buf = Vec::new();
        let count = export_evidence_csv(&search(), &mut buf, Path::new("e.csv")).unwrap();
        assert_eq!(count, 1);
        let output = String::from_utf8(buf).unwrap();
        assert!(output.starts_with("project_id,fiscal_year,table"));
        assert!(output.contains("42,2024,projects,事業名,ai-halfwidth,narrow,AI,0,0,2"));
    }

    #[test]
    fn test_evidence_json_uses_entry_list() {
        let mut buf = Vec::new();
        export_json(&search(), &mut buf, Path::new("e.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        let entries = value["evidence"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["key"]["project_id"], 42);
        assert_eq!(entries[0]["evidence"][0]["category"], "narrow");
    }

    #[test]
    fn test_verification_csv_shows_best_candidate_for_missing() {
        let report = ReconciliationReport {
            metric: "normalized_levenshtein".to_string(),
            threshold: 0.85,
            containment_floor: Some(0.9),
            outcomes: vec![VerificationOutcome {
                reference: ReferenceRecord {
                    id: 1,
                    name: "宇宙開発".to_string(),
                },
                classification: MatchClass::Missing,
                matched: None,
                best_candidate: Some(Candidate {
                    key: ProjectKey::new(7, 2024),
                    name: "宇宙利用".to_string(),
                    score: 0.5,
                }),
                tie: Vec::new(),
            }],
            hits: Vec::new(),
            summary: ReconciliationSummary {
                total: 1,
                exact: 0,
                fuzzy: 0,
                missing: 1,
                ambiguous: 0,
                confirmed_hits: 0,
                unconfirmed_hits: 0,
                coverage_ratio: 0.0,
                vacuous: false,
            },
        };
        let mut buf = Vec::new();
        export_verification_csv(&report, &mut buf, Path::new("v.csv")).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("1,宇宙開発,missing,7,2024,宇宙利用,0.5000,"));
    }
}
