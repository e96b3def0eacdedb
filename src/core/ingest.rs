// TableSleuth - core/ingest.rs
//
// Encoding-resilient ingestion: raw bytes -> RawTable.
// Core layer: accepts byte slices, never touches the filesystem. The
// platform layer reads files and hands their bytes here.
//
// Each candidate encoding is tried in order with a no-replacement decoder;
// the first one that decodes without error AND yields a structurally valid
// table wins. There is no semantic validation: mojibake that happens to be
// well-formed in an earlier candidate is accepted, which is why UTF-8 comes
// first in the default order.

use crate::core::model::RawTable;
use crate::util::constants;
use crate::util::error::{ConfigError, DecodeAttempt, DecodeFailure, IngestError};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Labels accepted by the source tooling but unknown to WHATWG.
const LABEL_ALIASES: &[(&str, &str)] = &[("cp932", "windows-31j"), ("ms-kanji", "shift_jis")];

/// A resolved candidate encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateEncoding {
    /// Label as configured; recorded on the decoded table.
    pub label: &'static str,
    encoding: &'static Encoding,
    require_bom: bool,
}

impl CandidateEncoding {
    /// Resolve a configured label.
    pub fn from_label(label: &str) -> Result<Self, ConfigError> {
        let wanted = label.trim().to_ascii_lowercase();
        if wanted == constants::UTF8_SIG_LABEL {
            return Ok(Self {
                label: constants::UTF8_SIG_LABEL,
                encoding: UTF_8,
                require_bom: true,
            });
        }

        let lookup = LABEL_ALIASES
            .iter()
            .find(|(alias, _)| *alias == wanted)
            .map(|(_, target)| *target)
            .unwrap_or(wanted.as_str());

        let encoding =
            Encoding::for_label(lookup.as_bytes()).ok_or_else(|| ConfigError::UnknownEncoding {
                label: label.to_string(),
            })?;

        // Keep the configured spelling for audit output, interned as a static
        // label where a known one exists.
        let label = known_label(&wanted).unwrap_or(encoding.name());

        Ok(Self {
            label,
            encoding,
            require_bom: false,
        })
    }

    /// Decode `bytes` completely, treating malformed input as failure.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, DecodeFailure> {
        let body = if self.encoding == UTF_8 {
            match bytes.strip_prefix(UTF8_BOM) {
                Some(rest) => rest,
                None if self.require_bom => return Err(DecodeFailure::MissingBom),
                None => bytes,
            }
        } else {
            bytes
        };

        self.encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .ok_or(DecodeFailure::Malformed)
    }
}

fn known_label(wanted: &str) -> Option<&'static str> {
    constants::DEFAULT_ENCODINGS
        .iter()
        .find(|l| **l == wanted)
        .copied()
}

/// Resolve a list of labels, failing on the first unknown one.
pub fn resolve_encodings<S: AsRef<str>>(
    labels: &[S],
) -> Result<Vec<CandidateEncoding>, ConfigError> {
    if labels.is_empty() || labels.len() > constants::MAX_CANDIDATE_ENCODINGS {
        return Err(ConfigError::ValueOutOfRange {
            field: "ingest.encodings".to_string(),
            value: labels.len().to_string(),
            expected: format!("1-{} labels", constants::MAX_CANDIDATE_ENCODINGS),
        });
    }
    labels
        .iter()
        .map(|l| CandidateEncoding::from_label(l.as_ref()))
        .collect()
}

/// The built-in candidate order.
pub fn default_encodings() -> Vec<CandidateEncoding> {
    constants::DEFAULT_ENCODINGS
        .iter()
        .filter_map(|label| CandidateEncoding::from_label(label).ok())
        .collect()
}

/// Decode text with the first candidate that accepts it.
///
/// Returns the text and the winning candidate, or every rejected attempt.
pub fn decode_text<'a>(
    bytes: &'a [u8],
    candidates: &[CandidateEncoding],
) -> Result<(Cow<'a, str>, CandidateEncoding), Vec<DecodeAttempt>> {
    let mut attempts = Vec::new();
    for candidate in candidates {
        match candidate.decode(bytes) {
            Ok(text) => return Ok((text, *candidate)),
            Err(failure) => attempts.push(DecodeAttempt {
                encoding: candidate.label.to_string(),
                failure,
            }),
        }
    }
    Err(attempts)
}

/// Decode a CSV export into a `RawTable`.
///
/// Fails with `DecodeExhausted` only when every candidate either raised a
/// decode error or produced a structurally invalid table. Every rejected
/// attempt is carried in the error.
pub fn ingest_bytes(
    source_name: &str,
    bytes: &[u8],
    candidates: &[CandidateEncoding],
) -> Result<RawTable, IngestError> {
    if candidates.is_empty() {
        return Err(IngestError::NoCandidateEncodings {
            source_name: source_name.to_string(),
        });
    }

    let mut attempts = Vec::new();

    for candidate in candidates {
        let outcome = candidate
            .decode(bytes)
            .and_then(|text| parse_table(&text));

        match outcome {
            Ok((columns, rows)) => {
                tracing::debug!(
                    source = source_name,
                    encoding = candidate.label,
                    columns = columns.len(),
                    rows = rows.len(),
                    rejected = attempts.len(),
                    "Source decoded"
                );
                return Ok(RawTable {
                    source_name: source_name.to_string(),
                    encoding: candidate.label.to_string(),
                    columns,
                    rows,
                });
            }
            Err(failure) => {
                tracing::debug!(
                    source = source_name,
                    encoding = candidate.label,
                    reason = %failure,
                    "Candidate encoding rejected"
                );
                attempts.push(DecodeAttempt {
                    encoding: candidate.label.to_string(),
                    failure,
                });
            }
        }
    }

    Err(IngestError::DecodeExhausted {
        source_name: source_name.to_string(),
        attempts,
    })
}

type ParsedTable = (Vec<String>, Vec<Vec<Option<String>>>);

/// Split decoded text into a header and padded rows.
fn parse_table(text: &str) -> Result<ParsedTable, DecodeFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();

    let header = match records.next() {
        Some(Ok(record)) => record,
        Some(Err(e)) => return Err(DecodeFailure::Csv(e.to_string())),
        None => return Err(DecodeFailure::NoColumns),
    };

    if header.iter().all(|h| h.trim().is_empty()) {
        return Err(DecodeFailure::NoColumns);
    }

    let columns = unique_headers(header.iter());
    let width = columns.len();
    let mut rows = Vec::new();

    for (row_index, record) in records.enumerate() {
        let record = record.map_err(|e| DecodeFailure::Csv(e.to_string()))?;

        // Trailing empty fields past the header width are tolerated
        // (spreadsheet exports often end rows with a stray delimiter).
        if record.len() > width && record.iter().skip(width).any(|f| !f.is_empty()) {
            return Err(DecodeFailure::RowTooLong {
                row_index,
                fields: record.len(),
                columns: width,
            });
        }

        let mut row: Vec<Option<String>> = record
            .iter()
            .take(width)
            .map(|field| (!field.is_empty()).then(|| field.to_string()))
            .collect();
        row.resize(width, None);
        rows.push(row);
    }

    Ok((columns, rows))
}

/// Make header names unique: repeated names get `.1`, `.2`, ...; blank
/// names become `unnamed_<position>`.
fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (position, name) in raw.enumerate() {
        let base = if name.trim().is_empty() {
            format!("unnamed_{position}")
        } else {
            name.to_string()
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while out.contains(&candidate) {
            candidate = format!("{base}{}{n}", constants::DUPLICATE_HEADER_SEPARATOR);
            n += 1;
        }
        out.push(candidate);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(labels: &[&str]) -> Vec<CandidateEncoding> {
        resolve_encodings(labels).unwrap()
    }

    #[test]
    fn test_utf8_table() {
        let bytes = "予算事業ID,事業名\n1,AI基盤整備事業\n2,\n".as_bytes();
        let table = ingest_bytes("projects", bytes, &default_encodings()).unwrap();
        assert_eq!(table.encoding, "utf-8");
        assert_eq!(table.columns, vec!["予算事業ID", "事業名"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, 1), Some("AI基盤整備事業"));
        assert_eq!(table.value(1, 1), None);
    }

    #[test]
    fn test_shift_jis_falls_back() {
        let (bytes, _, had_errors) =
            encoding_rs::SHIFT_JIS.encode("予算事業ID,事業名\n1,人工知能研究\n");
        assert!(!had_errors);
        let table = ingest_bytes("projects", &bytes, &default_encodings()).unwrap();
        assert_eq!(table.encoding, "shift_jis");
        assert_eq!(table.value(0, 1), Some("人工知能研究"));
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("id,name\n1,x\n".as_bytes());
        let table = ingest_bytes("t", &bytes, &candidates(&["utf-8"])).unwrap();
        assert_eq!(table.columns[0], "id");
    }

    #[test]
    fn test_utf8_sig_requires_bom() {
        let err = ingest_bytes("t", b"id\n1\n", &candidates(&["utf-8-sig"])).unwrap_err();
        match err {
            IngestError::DecodeExhausted { attempts, .. } => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].failure, DecodeFailure::MissingBom);
            }
            other => panic!("Expected DecodeExhausted, got: {other:?}"),
        }
    }

    #[test]
    fn test_decode_exhausted_records_every_attempt() {
        let bytes = b"a,b\n\xFF\xFD,x\n";
        let err = ingest_bytes("broken", bytes, &candidates(&["utf-8", "shift_jis"])).unwrap_err();
        match err {
            IngestError::DecodeExhausted {
                source_name,
                attempts,
            } => {
                assert_eq!(source_name, "broken");
                let labels: Vec<_> = attempts.iter().map(|a| a.encoding.as_str()).collect();
                assert_eq!(labels, vec!["utf-8", "shift_jis"]);
                assert!(attempts
                    .iter()
                    .all(|a| a.failure == DecodeFailure::Malformed));
            }
            other => panic!("Expected DecodeExhausted, got: {other:?}"),
        }
    }

    #[test]
    fn test_empty_input_has_no_columns() {
        let err = ingest_bytes("empty", b"", &candidates(&["utf-8"])).unwrap_err();
        assert!(matches!(err, IngestError::DecodeExhausted { .. }));
    }

    #[test]
    fn test_short_rows_are_padded_and_long_rows_rejected() {
        let table = ingest_bytes("t", b"a,b,c\n1,2\n", &candidates(&["utf-8"])).unwrap();
        assert_eq!(table.rows[0], vec![Some("1".into()), Some("2".into()), None]);

        let err = ingest_bytes("t", b"a,b\n1,2,3\n", &candidates(&["utf-8"])).unwrap_err();
        match err {
            IngestError::DecodeExhausted { attempts, .. } => assert!(matches!(
                attempts[0].failure,
                DecodeFailure::RowTooLong { fields: 3, columns: 2, .. }
            )),
            other => panic!("Expected DecodeExhausted, got: {other:?}"),
        }
    }

    #[test]
    fn test_trailing_empty_field_is_tolerated() {
        let table = ingest_bytes("t", b"a,b\n1,2,\n", &candidates(&["utf-8"])).unwrap();
        assert_eq!(table.rows[0].len(), 2);
    }

    #[test]
    fn test_duplicate_headers_are_disambiguated() {
        let table =
            ingest_bytes("t", "事業名,事業名,,事業名\n".as_bytes(), &candidates(&["utf-8"]))
                .unwrap();
        assert_eq!(table.columns, vec!["事業名", "事業名.1", "unnamed_2", "事業名.2"]);
    }

    #[test]
    fn test_unknown_label_is_config_error() {
        assert!(matches!(
            CandidateEncoding::from_label("klingon"),
            Err(ConfigError::UnknownEncoding { .. })
        ));
    }

    #[test]
    fn test_cp932_alias_resolves() {
        let enc = CandidateEncoding::from_label("CP932").unwrap();
        assert_eq!(enc.label, "cp932");
        assert_eq!(default_encodings().len(), constants::DEFAULT_ENCODINGS.len());
    }

    #[test]
    fn test_decode_text_reports_winner() {
        let (text, winner) = decode_text("名前\n".as_bytes(), &default_encodings()).unwrap();
        assert_eq!(text, "名前\n");
        assert_eq!(winner.label, "utf-8");
    }
}
