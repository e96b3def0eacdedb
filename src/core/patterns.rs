// TableSleuth - core/patterns.rs
//
// Pattern set loading, validation, and compilation.
// Core layer: accepts TOML strings, never touches the filesystem.
//
// Mode membership is data: every pattern carries a category, and a search
// mode is the set of categories it runs. Adding a tier means adding a
// category, not another search function.

use crate::core::model::PatternCategory;
use crate::util::constants;
use crate::util::error::PatternError;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// =============================================================================
// TOML deserialization structures (raw input)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PatternSetDefinition {
    pub pattern_set: PatternSetMeta,
    #[serde(default)]
    pub patterns: Vec<PatternDef>,
    #[serde(default)]
    pub targets: Vec<TargetDef>,
}

#[derive(Debug, Deserialize)]
pub struct PatternSetMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct PatternDef {
    pub id: String,
    pub category: PatternCategory,
    pub regex: String,
}

#[derive(Debug, Deserialize)]
pub struct TargetDef {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

// =============================================================================
// Compiled form
// =============================================================================

/// A compiled search pattern.
#[derive(Debug, Clone)]
pub struct SearchPattern {
    pub id: String,
    pub category: PatternCategory,
    pub regex: Regex,
}

impl SearchPattern {
    /// Byte ranges of accepted matches in `text`.
    ///
    /// Narrow patterns only accept matches with no alphanumeric neighbour;
    /// the scan then resumes one character later so a rejected match does
    /// not hide an isolated one that overlaps it.
    pub fn find_all(&self, text: &str) -> Vec<(usize, usize)> {
        match self.category {
            PatternCategory::Broad => self
                .regex
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .collect(),
            PatternCategory::Narrow => {
                let mut found = Vec::new();
                let mut at = 0;
                while at <= text.len() {
                    let Some(m) = self.regex.find_at(text, at) else {
                        break;
                    };
                    if m.start() == m.end() {
                        // Empty matches carry no evidence.
                        at = next_char_boundary(text, m.end());
                        continue;
                    }
                    if crate::core::text::is_isolated(text, m.start(), m.end()) {
                        found.push((m.start(), m.end()));
                        at = m.end();
                    } else {
                        at = next_char_boundary(text, m.start());
                    }
                }
                found
            }
        }
    }
}

fn next_char_boundary(text: &str, from: usize) -> usize {
    text[from..]
        .chars()
        .next()
        .map_or(text.len() + 1, |c| from + c.len_utf8())
}

/// One (table, columns) scan selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub table: String,
    pub columns: Vec<String>,
}

/// A validated, compiled pattern set.
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub case_insensitive: bool,
    pub patterns: Vec<SearchPattern>,
    pub targets: Vec<ScanTarget>,
    pub is_builtin: bool,
}

impl PatternSet {
    pub fn patterns_in(&self, category: PatternCategory) -> impl Iterator<Item = &SearchPattern> {
        self.patterns.iter().filter(move |p| p.category == category)
    }
}

// =============================================================================
// Validation and compilation
// =============================================================================

/// Parse a TOML string into a `PatternSetDefinition`.
pub fn parse_pattern_toml(
    toml_content: &str,
    source_path: &Path,
) -> Result<PatternSetDefinition, PatternError> {
    toml::from_str(toml_content).map_err(|e| PatternError::TomlParse {
        path: source_path.to_path_buf(),
        source: e,
    })
}

/// Validate a `PatternSetDefinition` and compile every regex.
///
/// Any failure rejects the whole set, so a search never starts with a
/// partially valid pattern list.
pub fn validate_and_compile(
    def: PatternSetDefinition,
    source_path: &Path,
    is_builtin: bool,
) -> Result<PatternSet, PatternError> {
    let id = def.pattern_set.id.trim().to_string();

    if id.is_empty() {
        return Err(PatternError::MissingField {
            set_id: "(empty)".to_string(),
            field: "pattern_set.id",
        });
    }
    if def.pattern_set.name.trim().is_empty() {
        return Err(PatternError::MissingField {
            set_id: id,
            field: "pattern_set.name",
        });
    }
    if def.patterns.is_empty() {
        return Err(PatternError::MissingField {
            set_id: id,
            field: "patterns",
        });
    }
    if def.targets.is_empty() {
        return Err(PatternError::MissingField {
            set_id: id,
            field: "targets",
        });
    }
    if def.patterns.len() > constants::MAX_PATTERNS_PER_SET {
        return Err(PatternError::TooManyPatterns {
            set_id: id,
            count: def.patterns.len(),
            max: constants::MAX_PATTERNS_PER_SET,
        });
    }

    let case_insensitive = def.pattern_set.case_insensitive;
    let mut seen = HashSet::new();
    let mut patterns = Vec::with_capacity(def.patterns.len());

    for p in def.patterns {
        if p.id.trim().is_empty() {
            return Err(PatternError::MissingField {
                set_id: id,
                field: "patterns.id",
            });
        }
        if !seen.insert(p.id.clone()) {
            return Err(PatternError::DuplicatePatternId {
                set_id: id,
                pattern_id: p.id,
            });
        }
        let regex = compile_regex(&id, &p.id, &p.regex, case_insensitive)?;
        patterns.push(SearchPattern {
            id: p.id,
            category: p.category,
            regex,
        });
    }

    let mut targets = Vec::with_capacity(def.targets.len());
    for t in def.targets {
        if t.table.trim().is_empty() {
            return Err(PatternError::MissingField {
                set_id: id,
                field: "targets.table",
            });
        }
        if t.columns.is_empty() {
            return Err(PatternError::EmptyTarget {
                set_id: id,
                table: t.table,
            });
        }
        targets.push(ScanTarget {
            table: t.table,
            columns: t.columns,
        });
    }

    if !patterns.iter().any(|p| p.category == PatternCategory::Narrow) {
        tracing::warn!(
            set_id = %id,
            source = %source_path.display(),
            "Pattern set has no narrow patterns; narrow mode will match nothing"
        );
    }

    Ok(PatternSet {
        id,
        name: def.pattern_set.name,
        description: def.pattern_set.description,
        case_insensitive,
        patterns,
        targets,
        is_builtin,
    })
}

/// Compile a regex with length validation to prevent ReDoS.
fn compile_regex(
    set_id: &str,
    pattern_id: &str,
    pattern: &str,
    case_insensitive: bool,
) -> Result<Regex, PatternError> {
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(PatternError::RegexTooLong {
            set_id: set_id.to_string(),
            pattern_id: pattern_id.to_string(),
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }

    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| PatternError::PatternCompile {
            set_id: set_id.to_string(),
            pattern_id: pattern_id.to_string(),
            pattern: pattern.to_string(),
            source: e,
        })
}

// =============================================================================
// Built-in pattern sets (embedded at compile time)
// =============================================================================

/// Embedded TOML content for built-in pattern sets: (filename, content).
pub fn builtin_pattern_sources() -> Vec<(&'static str, &'static str)> {
    vec![("ai.toml", include_str!("../../patterns/ai.toml"))]
}

/// Load and validate all built-in pattern sets.
pub fn load_builtin_pattern_sets() -> Vec<PatternSet> {
    let mut sets = Vec::new();

    for (filename, content) in builtin_pattern_sources() {
        let path = PathBuf::from(format!("<builtin>/{filename}"));
        match parse_pattern_toml(content, &path)
            .and_then(|def| validate_and_compile(def, &path, true))
        {
            Ok(set) => {
                tracing::debug!(set_id = %set.id, patterns = set.patterns.len(), "Loaded built-in pattern set");
                sets.push(set);
            }
            Err(e) => {
                tracing::error!(file = filename, error = %e, "Failed to load built-in pattern set");
            }
        }
    }

    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_SET_TOML: &str = r#"
[pattern_set]
id = "test-set"
name = "Test Set"

[[patterns]]
id = "root"
category = "narrow"
regex = 'AI'

[[patterns]]
id = "compound"
category = "broad"
regex = 'AI\w*'

[[targets]]
table = "projects"
columns = ["name"]
"#;

    fn compile(toml: &str) -> Result<PatternSet, PatternError> {
        let path = PathBuf::from("test.toml");
        validate_and_compile(parse_pattern_toml(toml, &path)?, &path, false)
    }

    #[test]
    fn test_compile_valid_set() {
        let set = compile(VALID_SET_TOML).unwrap();
        assert_eq!(set.id, "test-set");
        assert!(set.case_insensitive);
        assert_eq!(set.patterns_in(PatternCategory::Narrow).count(), 1);
        assert_eq!(set.patterns_in(PatternCategory::Broad).count(), 1);
        assert_eq!(set.targets[0].columns, vec!["name"]);
    }

    #[test]
    fn test_bad_regex_is_compile_error() {
        let toml = VALID_SET_TOML.replace(r"AI\w*", "AI[");
        match compile(&toml).unwrap_err() {
            PatternError::PatternCompile { pattern_id, .. } => assert_eq!(pattern_id, "compound"),
            other => panic!("Expected PatternCompile, got: {other:?}"),
        }
    }

    #[test]
    fn test_regex_too_long() {
        let long = "a".repeat(constants::MAX_REGEX_PATTERN_LENGTH + 1);
        let toml = VALID_SET_TOML.replace(r"AI\w*", &long);
        assert!(matches!(
            compile(&toml).unwrap_err(),
            PatternError::RegexTooLong { .. }
        ));
    }

    #[test]
    fn test_duplicate_pattern_id() {
        let toml = VALID_SET_TOML.replace("id = \"compound\"", "id = \"root\"");
        assert!(matches!(
            compile(&toml).unwrap_err(),
            PatternError::DuplicatePatternId { .. }
        ));
    }

    #[test]
    fn test_empty_target() {
        let toml = VALID_SET_TOML.replace("columns = [\"name\"]", "columns = []");
        assert!(matches!(
            compile(&toml).unwrap_err(),
            PatternError::EmptyTarget { .. }
        ));
    }

    #[test]
    fn test_narrow_requires_isolation() {
        let set = compile(VALID_SET_TOML).unwrap();
        let root = &set.patterns[0];
        assert!(root.find_all("生成AIを活用").is_empty());
        assert_eq!(root.find_all("AI、IoT"), vec![(0, 2)]);
        assert!(root.find_all("email").is_empty());
        // Case-insensitive by default.
        assert_eq!(root.find_all("ai"), vec![(0, 2)]);
    }

    #[test]
    fn test_narrow_finds_isolated_after_rejected() {
        let set = compile(VALID_SET_TOML).unwrap();
        let text = "生成AIと AI";
        let start = text.rfind("AI").unwrap();
        assert_eq!(set.patterns[0].find_all(text), vec![(start, start + 2)]);
    }

    #[test]
    fn test_broad_matches_compounds() {
        let set = compile(VALID_SET_TOML).unwrap();
        let text = "生成AIを活用";
        let found = set.patterns[1].find_all(text);
        assert_eq!(found.len(), 1);
        assert_eq!(&text[found[0].0..found[0].1], "AIを活用");
    }

    #[test]
    fn test_case_sensitive_option() {
        let toml = VALID_SET_TOML.replace(
            "name = \"Test Set\"",
            "name = \"Test Set\"\ncase_insensitive = false",
        );
        let set = compile(&toml).unwrap();
        assert!(set.patterns[0].find_all("ai").is_empty());
    }

    #[test]
    fn test_load_builtin_pattern_sets() {
        let sets = load_builtin_pattern_sets();
        let ai = sets.iter().find(|s| s.id == "ai").expect("ai set not found");
        assert!(ai.is_builtin);
        assert_eq!(ai.patterns_in(PatternCategory::Narrow).count(), 4);
        assert_eq!(ai.patterns_in(PatternCategory::Broad).count(), 6);
        assert_eq!(ai.targets.len(), 5);
    }
}
