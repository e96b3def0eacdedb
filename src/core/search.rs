// TableSleuth - core/search.rs
//
// Pattern search engine: NormalizedSchema + PatternSet -> SearchResult.
// Core layer: no I/O.
//
// Work is split into (target, row range) chunks that run on a rayon pool.
// Each chunk returns its evidence in row, column, pattern, position order;
// chunks are collected in their original order and appended per
// ProjectKey, so the result is the same for any chunk size or thread count.

use crate::core::model::{
    CanonicalTable, MatchEvidence, NormalizedSchema, PatternCategory, SearchMode, SearchResult,
};
use crate::core::patterns::{PatternSet, SearchPattern};
use crate::core::text;
use crate::util::constants;
use crate::util::error::PatternError;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Tuning for one search run.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub mode: SearchMode,

    /// Rows per work unit.
    pub chunk_rows: usize,

    /// Stop after scanning this many rows in total. `None` scans everything.
    pub max_rows: Option<usize>,

    /// Worker threads; 0 uses the rayon default.
    pub worker_threads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            chunk_rows: constants::DEFAULT_CHUNK_ROWS,
            max_rows: None,
            worker_threads: constants::DEFAULT_WORKER_THREADS,
        }
    }
}

/// A target resolved against the normalized schema.
struct ResolvedTarget<'a> {
    table: &'a CanonicalTable,
    /// (column position, column name)
    columns: Vec<(usize, &'a str)>,
    /// Rows of this table the budget allows.
    allowance: usize,
}

/// One unit of parallel work.
#[derive(Clone, Copy)]
struct Chunk {
    target: usize,
    start: usize,
    end: usize,
}

pub struct SearchEngine<'p> {
    set: &'p PatternSet,
    /// Patterns run under the configured mode, in set order.
    active: Vec<&'p SearchPattern>,
    config: SearchConfig,
}

impl<'p> SearchEngine<'p> {
    /// Prepare a search. Patterns arrive compiled, so every regex error has
    /// already surfaced; this only checks that the mode selects something.
    pub fn new(set: &'p PatternSet, config: SearchConfig) -> Result<Self, PatternError> {
        let active: Vec<&SearchPattern> = set
            .patterns
            .iter()
            .filter(|p| config.mode.includes(p.category))
            .collect();

        if active.is_empty() {
            return Err(PatternError::MissingField {
                set_id: set.id.clone(),
                field: match config.mode {
                    SearchMode::Narrow => "patterns (narrow)",
                    SearchMode::Broad => "patterns",
                },
            });
        }

        let config = SearchConfig {
            chunk_rows: config
                .chunk_rows
                .clamp(constants::MIN_CHUNK_ROWS, constants::MAX_CHUNK_ROWS),
            worker_threads: config.worker_threads.min(constants::MAX_WORKER_THREADS),
            ..config
        };

        tracing::debug!(
            set_id = %set.id,
            mode = %config.mode,
            patterns = active.len(),
            narrow = active.iter().filter(|p| p.category == PatternCategory::Narrow).count(),
            "Search engine ready"
        );

        Ok(Self {
            set,
            active,
            config,
        })
    }

    pub fn mode(&self) -> SearchMode {
        self.config.mode
    }

    /// Scan the selected columns of `schema`.
    pub fn search(&self, schema: &NormalizedSchema) -> SearchResult {
        let (mut targets, skipped_targets) = self.resolve_targets(schema);

        let rows_total: usize = targets.iter().map(|t| t.table.rows.len()).sum();

        // Allot the budget to targets in order.
        let mut remaining = self.config.max_rows.unwrap_or(usize::MAX);
        for target in &mut targets {
            target.allowance = target.table.rows.len().min(remaining);
            remaining -= target.allowance;
        }
        let rows_scanned: usize = targets.iter().map(|t| t.allowance).sum();
        let complete = rows_scanned == rows_total;

        let chunk_rows = self.config.chunk_rows;
        let chunks: Vec<Chunk> = targets
            .iter()
            .enumerate()
            .flat_map(|(idx, t)| {
                (0..t.allowance).step_by(chunk_rows).map(move |start| Chunk {
                    target: idx,
                    start,
                    end: (start + chunk_rows).min(t.allowance),
                })
            })
            .collect();

        let scan = || -> Vec<Vec<MatchEvidence>> {
            chunks
                .par_iter()
                .map(|chunk| self.scan_chunk(&targets[chunk.target], *chunk))
                .collect()
        };

        let per_chunk = if self.config.worker_threads > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.worker_threads)
                .build()
            {
                Ok(pool) => pool.install(scan),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not build worker pool, using the global pool");
                    scan()
                }
            }
        } else {
            scan()
        };

        let mut evidence: BTreeMap<_, Vec<MatchEvidence>> = BTreeMap::new();
        for chunk_evidence in per_chunk {
            for e in chunk_evidence {
                evidence.entry(e.key).or_default().push(e);
            }
        }

        let result = SearchResult {
            pattern_set_id: self.set.id.clone(),
            mode: self.config.mode,
            evidence,
            rows_total,
            rows_scanned,
            complete,
            skipped_targets,
        };

        if complete {
            tracing::info!(
                set_id = %self.set.id,
                mode = %self.config.mode,
                rows = rows_scanned,
                chunks = chunks.len(),
                evidence = result.evidence_count(),
                projects = result.evidence.len(),
                "Search complete"
            );
        } else {
            tracing::warn!(
                set_id = %self.set.id,
                rows_scanned,
                rows_total,
                evidence = result.evidence_count(),
                "Search stopped by row budget; result is partial"
            );
        }

        result
    }

    fn resolve_targets<'s>(
        &self,
        schema: &'s NormalizedSchema,
    ) -> (Vec<ResolvedTarget<'s>>, Vec<String>) {
        let mut resolved = Vec::new();
        let mut skipped = Vec::new();

        for target in &self.set.targets {
            let Some(table) = schema.table(&target.table) else {
                tracing::warn!(table = %target.table, "Search target table not in schema, skipping");
                skipped.extend(
                    target
                        .columns
                        .iter()
                        .map(|c| format!("{}.{c}", target.table)),
                );
                continue;
            };

            let mut columns = Vec::new();
            for column in &target.columns {
                match table.column_index(column) {
                    Some(pos) => columns.push((pos, table.columns[pos].as_str())),
                    None => {
                        tracing::warn!(
                            table = %target.table,
                            column = %column,
                            "Search target column not in table, skipping"
                        );
                        skipped.push(format!("{}.{column}", target.table));
                    }
                }
            }

            if !columns.is_empty() {
                resolved.push(ResolvedTarget {
                    table,
                    columns,
                    allowance: 0,
                });
            }
        }

        (resolved, skipped)
    }

    fn scan_chunk(&self, target: &ResolvedTarget<'_>, chunk: Chunk) -> Vec<MatchEvidence> {
        let table = target.table;
        let mut out = Vec::new();

        for row_index in chunk.start..chunk.end {
            let row = &table.rows[row_index];
            for &(pos, column) in &target.columns {
                let Some(cell) = row.values.get(pos).and_then(|v| v.as_deref()) else {
                    continue;
                };
                for pattern in &self.active {
                    for (start, end) in pattern.find_all(cell) {
                        out.push(MatchEvidence {
                            key: row.key,
                            table: table.name.clone(),
                            column: column.to_string(),
                            pattern_id: pattern.id.clone(),
                            category: pattern.category,
                            matched_text: cell[start..end].to_string(),
                            row_index,
                            start,
                            end,
                            context: text::excerpt_around(
                                cell,
                                start,
                                end,
                                constants::EVIDENCE_CONTEXT_CHARS,
                            ),
                        });
                    }
                }
            }
        }

        out
    }
}
