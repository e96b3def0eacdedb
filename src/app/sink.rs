// TableSleuth - app/sink.rs
//
// DirectorySink: writes the output contract of a run into one directory.
//
//   tables/<name>.csv      one file per canonical table
//   normalization.json     per-source stats, unkeyed samples, collisions
//   evidence.json          search result and per-project summaries
//   evidence.csv           one row per evidence entry
//   verification.json      reconciliation report (only with a reference list)
//   verification.csv
//   run_summary.json

use crate::core::export::{self, ResultSink};
use crate::core::model::{
    NormalizationReport, NormalizedSchema, ProjectSummary, ReconciliationReport, RunSummary,
    SearchResult,
};
use crate::core::schema::SchemaMapping;
use crate::util::constants;
use crate::util::error::ExportError;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub struct DirectorySink {
    dir: PathBuf,
    /// Files written so far, in write order.
    written: Vec<PathBuf>,
}

#[derive(Serialize)]
struct NormalizationOutput<'a> {
    schema_id: &'a str,
    #[serde(flatten)]
    report: &'a NormalizationReport,
}

#[derive(Serialize)]
struct EvidenceOutput<'a> {
    #[serde(flatten)]
    result: &'a SearchResult,
    projects: Vec<ProjectSummary>,
}

impl DirectorySink {
    /// Nothing touches the disk until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn create(&mut self, relative: &str) -> Result<(BufWriter<File>, PathBuf), ExportError> {
        let path = self.dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExportError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = File::create(&path).map_err(|e| ExportError::Io {
            path: path.clone(),
            source: e,
        })?;
        self.written.push(path.clone());
        Ok((BufWriter::new(file), path))
    }

    fn write_json<T: Serialize>(&mut self, relative: &str, value: &T) -> Result<(), ExportError> {
        let (writer, path) = self.create(relative)?;
        export::export_json(value, writer, &path)?;
        tracing::debug!(file = %path.display(), "Wrote JSON output");
        Ok(())
    }
}

/// Table names become file names; anything outside [A-Za-z0-9_-] is replaced.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ResultSink for DirectorySink {
    fn write_tables(
        &mut self,
        schema: &SchemaMapping,
        normalized: &NormalizedSchema,
    ) -> Result<(), ExportError> {
        let keys = (
            schema.key_project_id.as_str(),
            schema.key_fiscal_year.as_str(),
        );
        for table in &normalized.tables {
            let relative = format!(
                "{}/{}.csv",
                constants::TABLES_DIR_NAME,
                file_stem(&table.name)
            );
            let (writer, path) = self.create(&relative)?;
            let rows = export::export_table_csv(table, keys, writer, &path)?;
            tracing::debug!(table = %table.name, rows, "Wrote canonical table");
        }

        self.write_json(
            "normalization.json",
            &NormalizationOutput {
                schema_id: &normalized.schema_id,
                report: &normalized.report,
            },
        )
    }

    fn write_evidence(&mut self, search: &SearchResult) -> Result<(), ExportError> {
        self.write_json(
            "evidence.json",
            &EvidenceOutput {
                result: search,
                projects: search.project_summaries(),
            },
        )?;
        let (writer, path) = self.create("evidence.csv")?;
        let count = export::export_evidence_csv(search, writer, &path)?;
        tracing::debug!(evidence = count, "Wrote evidence");
        Ok(())
    }

    fn write_verification(&mut self, report: &ReconciliationReport) -> Result<(), ExportError> {
        self.write_json("verification.json", report)?;
        let (writer, path) = self.create("verification.csv")?;
        export::export_verification_csv(report, writer, &path)?;
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), ExportError> {
        self.write_json("run_summary.json", summary)?;
        tracing::info!(
            dir = %self.dir.display(),
            files = self.written.len(),
            "Results written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("projects"), "projects");
        assert_eq!(file_stem("../evil/名"), "___evil__");
    }

    #[test]
    fn test_new_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let sink = DirectorySink::new(&out);
        assert!(!out.exists());
        assert!(sink.written().is_empty());
    }
}
