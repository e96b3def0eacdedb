// TableSleuth - core/reconcile.rs
//
// Reference reconciler: matched projects + reference list -> report.
// Core layer: no I/O.
//
// Classification per reference record:
//   1. exact  - normalized names are equal
//   2. fuzzy  - best similarity against projects no exact outcome claimed,
//               at or above the threshold
//   3. missing
//
// Neither exact nor fuzzy matches consume a project for the records that
// follow, and every candidate list is scanned in ProjectKey order, so the
// outcome for a record never depends on input order. Equal scores go to
// the lowest ProjectKey; the others are kept in `tie`.

use crate::core::ingest::{self, CandidateEncoding};
use crate::core::model::{
    Candidate, HitStatus, HitVerification, MatchClass, MatchedProject, NormalizedSchema,
    ProjectKey, ReconciliationReport, ReconciliationSummary, ReferenceRecord, SearchResult,
    VerificationOutcome,
};
use crate::core::schema::SchemaMapping;
use crate::core::text;
use crate::util::constants;
use crate::util::error::ReferenceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// Configuration
// =============================================================================

/// String similarity in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// 1 - Levenshtein distance / longer length, over characters.
    #[default]
    NormalizedLevenshtein,
    JaroWinkler,
    /// Bigram overlap.
    SorensenDice,
}

impl SimilarityMetric {
    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self {
            SimilarityMetric::NormalizedLevenshtein => strsim::normalized_levenshtein(a, b),
            SimilarityMetric::JaroWinkler => strsim::jaro_winkler(a, b),
            SimilarityMetric::SorensenDice => strsim::sorensen_dice(a, b),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SimilarityMetric::NormalizedLevenshtein => "normalized_levenshtein",
            SimilarityMetric::JaroWinkler => "jaro_winkler",
            SimilarityMetric::SorensenDice => "sorensen_dice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "normalized_levenshtein" | "levenshtein" => Some(Self::NormalizedLevenshtein),
            "jaro_winkler" => Some(Self::JaroWinkler),
            "sorensen_dice" | "dice" => Some(Self::SorensenDice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Minimum score for a fuzzy match.
    pub threshold: f64,

    /// When one normalized name contains the other, the score is raised to
    /// at least this value. `None` disables the rule.
    pub containment_floor: Option<f64>,

    pub metric: SimilarityMetric,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            threshold: constants::DEFAULT_FUZZY_THRESHOLD,
            containment_floor: Some(constants::DEFAULT_CONTAINMENT_FLOOR),
            metric: SimilarityMetric::default(),
        }
    }
}

impl ReconcileConfig {
    /// Similarity of two already-normalized names.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let score = self.metric.score(a, b);
        match self.containment_floor {
            Some(floor) if !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a)) => {
                score.max(floor)
            }
            _ => score,
        }
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Parse a reference list: one name per line, blank lines skipped.
/// Ids are 1-based line numbers.
pub fn parse_reference_list(content: &str) -> Vec<ReferenceRecord> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let name = line.trim();
            (!name.is_empty()).then(|| ReferenceRecord {
                id: i + 1,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Decode and parse a reference list with the candidate encodings.
///
/// `path` is used for error messages only.
pub fn decode_reference_list(
    bytes: &[u8],
    candidates: &[CandidateEncoding],
    path: &Path,
) -> Result<Vec<ReferenceRecord>, ReferenceError> {
    match ingest::decode_text(bytes, candidates) {
        Ok((content, encoding)) => {
            let records = parse_reference_list(&content);
            tracing::info!(
                path = %path.display(),
                encoding = encoding.label,
                records = records.len(),
                "Reference list loaded"
            );
            Ok(records)
        }
        Err(attempts) => Err(ReferenceError::Undecodable {
            path: path.to_path_buf(),
            tried: attempts.into_iter().map(|a| a.encoding).collect(),
        }),
    }
}

/// Matched projects with their display names, ascending by key.
///
/// The name comes from the schema's display column. A project with no
/// name there is offered under its key text so it still shows up as a hit.
pub fn matched_projects(
    schema: &SchemaMapping,
    normalized: &NormalizedSchema,
    search: &SearchResult,
) -> Vec<MatchedProject> {
    let mut names: BTreeMap<ProjectKey, &str> = BTreeMap::new();

    if let Some((table_name, column)) = &schema.display {
        if let Some(table) = normalized.table(table_name) {
            if let Some(pos) = table.column_index(column) {
                for row in &table.rows {
                    if let Some(name) = row.values.get(pos).and_then(|v| v.as_deref()) {
                        names.entry(row.key).or_insert(name);
                    }
                }
            }
        }
    }

    search
        .matched_projects()
        .into_iter()
        .map(|key| {
            let name = match names.get(&key) {
                Some(name) => name.to_string(),
                None => {
                    tracing::debug!(key = %key, "Matched project has no display name");
                    key.to_string()
                }
            };
            MatchedProject { key, name }
        })
        .collect()
}

// =============================================================================
// Reconciliation
// =============================================================================

struct PreparedProject<'a> {
    key: ProjectKey,
    name: &'a str,
    normalized: String,
}

/// Classify every reference record and every matched project.
pub fn reconcile(
    projects: &[MatchedProject],
    references: &[ReferenceRecord],
    config: &ReconcileConfig,
) -> ReconciliationReport {
    // One entry per key, ascending. Duplicate keys keep the smallest name.
    let mut prepared: Vec<PreparedProject<'_>> = projects
        .iter()
        .map(|p| PreparedProject {
            key: p.key,
            name: &p.name,
            normalized: text::normalize_name(&p.name),
        })
        .collect();
    prepared.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.name.cmp(b.name)));
    prepared.dedup_by_key(|p| p.key);

    let mut by_name: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, p) in prepared.iter().enumerate() {
        by_name.entry(p.normalized.as_str()).or_default().push(idx);
    }

    let normalized_refs: Vec<String> = references
        .iter()
        .map(|r| text::normalize_name(&r.name))
        .collect();

    // Pass 1: exact.
    let mut exact: Vec<Option<&Vec<usize>>> = Vec::with_capacity(references.len());
    let mut claimed: BTreeSet<usize> = BTreeSet::new();
    for name in &normalized_refs {
        let hit = by_name.get(name.as_str());
        if let Some(indices) = hit {
            claimed.extend(indices.iter().copied());
        }
        exact.push(hit);
    }

    let fuzzy_pool: Vec<usize> = (0..prepared.len())
        .filter(|i| !claimed.contains(i))
        .collect();

    // Pass 2: fuzzy for everything exact did not settle.
    let mut outcomes = Vec::with_capacity(references.len());
    for ((reference, name), exact_hit) in references.iter().zip(&normalized_refs).zip(exact) {
        let outcome = match exact_hit {
            Some(indices) => {
                let chosen = &prepared[indices[0]];
                VerificationOutcome {
                    reference: reference.clone(),
                    classification: MatchClass::Exact,
                    matched: Some(Candidate {
                        key: chosen.key,
                        name: chosen.name.to_string(),
                        score: 1.0,
                    }),
                    best_candidate: None,
                    tie: indices[1..].iter().map(|&i| prepared[i].key).collect(),
                }
            }
            None => fuzzy_outcome(reference, name, &prepared, &fuzzy_pool, config),
        };

        tracing::debug!(
            reference = reference.id,
            class = outcome.classification.label(),
            score = ?outcome.score(),
            "Reference classified"
        );
        if outcome.is_ambiguous() {
            tracing::warn!(
                reference = reference.id,
                name = %reference.name,
                tied = outcome.tie.len() + 1,
                "Reference matched several projects equally; lowest key chosen"
            );
        }
        outcomes.push(outcome);
    }

    let hits = verify_hits(&prepared, &outcomes);
    let summary = summarize(&outcomes, &hits);

    tracing::info!(
        total = summary.total,
        exact = summary.exact,
        fuzzy = summary.fuzzy,
        missing = summary.missing,
        ambiguous = summary.ambiguous,
        coverage = summary.coverage_ratio,
        "Reconciliation complete"
    );

    ReconciliationReport {
        metric: config.metric.label().to_string(),
        threshold: config.threshold,
        containment_floor: config.containment_floor,
        outcomes,
        hits,
        summary,
    }
}

fn fuzzy_outcome(
    reference: &ReferenceRecord,
    normalized: &str,
    prepared: &[PreparedProject<'_>],
    pool: &[usize],
    config: &ReconcileConfig,
) -> VerificationOutcome {
    let scored: Vec<(usize, f64)> = pool
        .iter()
        .map(|&i| (i, config.similarity(normalized, &prepared[i].normalized)))
        .collect();

    // Strictly greater keeps the first, i.e. lowest, key among equals.
    let mut best: Option<(usize, f64)> = None;
    for &(i, score) in &scored {
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }

    let Some((best_idx, best_score)) = best else {
        return VerificationOutcome {
            reference: reference.clone(),
            classification: MatchClass::Missing,
            matched: None,
            best_candidate: None,
            tie: Vec::new(),
        };
    };

    let candidate = Candidate {
        key: prepared[best_idx].key,
        name: prepared[best_idx].name.to_string(),
        score: best_score,
    };

    if best_score >= config.threshold {
        let tie = scored
            .iter()
            .filter(|&&(i, s)| i != best_idx && s == best_score)
            .map(|&(i, _)| prepared[i].key)
            .collect();
        VerificationOutcome {
            reference: reference.clone(),
            classification: MatchClass::Fuzzy,
            matched: Some(candidate),
            best_candidate: None,
            tie,
        }
    } else {
        VerificationOutcome {
            reference: reference.clone(),
            classification: MatchClass::Missing,
            matched: None,
            best_candidate: Some(candidate),
            tie: Vec::new(),
        }
    }
}

fn verify_hits(
    prepared: &[PreparedProject<'_>],
    outcomes: &[VerificationOutcome],
) -> Vec<HitVerification> {
    let mut claims: BTreeMap<ProjectKey, Vec<usize>> = BTreeMap::new();
    for outcome in outcomes {
        if let Some(m) = &outcome.matched {
            claims.entry(m.key).or_default().push(outcome.reference.id);
        }
    }

    prepared
        .iter()
        .map(|p| {
            let reference_ids = claims.remove(&p.key).unwrap_or_default();
            HitVerification {
                key: p.key,
                name: p.name.to_string(),
                status: if reference_ids.is_empty() {
                    HitStatus::Unconfirmed
                } else {
                    HitStatus::Confirmed
                },
                reference_ids,
            }
        })
        .collect()
}

fn summarize(outcomes: &[VerificationOutcome], hits: &[HitVerification]) -> ReconciliationSummary {
    let count = |class: MatchClass| outcomes.iter().filter(|o| o.classification == class).count();
    let total = outcomes.len();
    let exact = count(MatchClass::Exact);
    let fuzzy = count(MatchClass::Fuzzy);
    let confirmed_hits = hits
        .iter()
        .filter(|h| h.status == HitStatus::Confirmed)
        .count();

    ReconciliationSummary {
        total,
        exact,
        fuzzy,
        missing: count(MatchClass::Missing),
        ambiguous: outcomes.iter().filter(|o| o.is_ambiguous()).count(),
        confirmed_hits,
        unconfirmed_hits: hits.len() - confirmed_hits,
        coverage_ratio: if total == 0 {
            1.0
        } else {
            (exact + fuzzy) as f64 / total as f64
        },
        vacuous: total == 0,
    }
}
