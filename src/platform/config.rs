// TableSleuth - platform/config.rs
//
// Platform-specific directory resolution and config.toml loading with
// startup validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::util::constants;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Resolved platform paths for TableSleuth configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/tablesleuth/ or %APPDATA%\TableSleuth\config\)
    pub config_dir: PathBuf,

    /// Default location of config.toml.
    pub config_file: PathBuf,

    /// User schema mapping directory.
    pub user_schemas_dir: PathBuf,

    /// User pattern set directory.
    pub user_patterns_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        let config_dir = match ProjectDirs::from("", "", constants::APP_ID) {
            Some(proj_dirs) => proj_dirs.config_dir().to_path_buf(),
            None => {
                tracing::warn!(
                    "Could not determine platform directories, using current directory"
                );
                PathBuf::from(".")
            }
        };
        let paths = Self::under(&config_dir);

        tracing::debug!(
            config = %paths.config_file.display(),
            schemas = %paths.user_schemas_dir.display(),
            patterns = %paths.user_patterns_dir.display(),
            "Platform paths resolved"
        );

        paths
    }

    /// The standard layout below a given configuration directory.
    pub fn under(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            config_file: config_dir.join(constants::CONFIG_FILE_NAME),
            user_schemas_dir: config_dir.join(constants::SCHEMAS_DIR_NAME),
            user_patterns_dir: config_dir.join(constants::PATTERNS_DIR_NAME),
        }
    }
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub ingest: IngestSection,
    pub search: SearchSection,
    pub reconcile: ReconcileSection,
    pub logging: LoggingSection,
}

/// `[ingest]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// Candidate encodings, tried in order.
    pub encodings: Option<Vec<String>>,
    /// Files above this size are memory-mapped.
    pub large_file_threshold_bytes: Option<u64>,
}

/// `[search]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// "narrow" or "broad".
    pub mode: Option<String>,
    pub chunk_rows: Option<usize>,
    /// Row budget; 0 means unlimited.
    pub max_rows: Option<usize>,
    /// Number of worker threads (0 = auto).
    pub worker_threads: Option<usize>,
}

/// `[reconcile]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ReconcileSection {
    pub threshold: Option<f64>,
    /// 0 disables the containment rule.
    pub containment_floor: Option<f64>,
    pub metric: Option<String>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

/// Validated application configuration derived from `config.toml`.
///
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    // -- Ingest --
    pub encodings: Vec<String>,
    pub large_file_threshold: u64,

    // -- Search --
    /// One of `constants::SEARCH_MODES`.
    pub search_mode: String,
    pub chunk_rows: usize,
    pub max_rows: Option<usize>,
    pub worker_threads: usize,

    // -- Reconcile --
    pub fuzzy_threshold: f64,
    pub containment_floor: Option<f64>,
    /// One of `constants::SIMILARITY_METRICS`.
    pub similarity_metric: String,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encodings: constants::DEFAULT_ENCODINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            large_file_threshold: constants::DEFAULT_LARGE_FILE_THRESHOLD,
            search_mode: constants::DEFAULT_SEARCH_MODE.to_string(),
            chunk_rows: constants::DEFAULT_CHUNK_ROWS,
            max_rows: None,
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            fuzzy_threshold: constants::DEFAULT_FUZZY_THRESHOLD,
            containment_floor: Some(constants::DEFAULT_CONTAINMENT_FLOOR),
            similarity_metric: constants::DEFAULT_SIMILARITY_METRIC.to_string(),
            log_level: None,
        }
    }
}

/// Load and validate a config file.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// A missing file yields defaults with no warnings (first run). An
/// unreadable or unparseable file yields defaults with a warning.
pub fn load_config(config_path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!(
                "Could not read config file '{}': {e}. Using defaults.",
                config_path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let (config, mut parse_warnings) = parse_config(&content);
    if parse_warnings.is_empty() {
        tracing::info!(path = %config_path.display(), "Loaded config.toml");
    } else {
        for w in &mut parse_warnings {
            *w = format!("{}: {w}", config_path.display());
        }
    }
    warnings.extend(parse_warnings);
    (config, warnings)
}

/// Validate config.toml content. Each field is checked against named
/// constants; all problems are collected rather than stopping at the first.
pub fn parse_config(content: &str) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let raw: RawConfig = match toml::from_str(content) {
        Ok(r) => r,
        Err(e) => {
            warnings.push(format!("Failed to parse config: {e}. Using defaults."));
            return (AppConfig::default(), warnings);
        }
    };

    let mut config = AppConfig::default();

    // -- Ingest: encodings --
    if let Some(encodings) = raw.ingest.encodings {
        let labels: Vec<String> = encodings
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if labels.is_empty() || labels.len() > constants::MAX_CANDIDATE_ENCODINGS {
            warnings.push(format!(
                "[ingest] encodings must list 1-{} labels. Using default ({}).",
                constants::MAX_CANDIDATE_ENCODINGS,
                constants::DEFAULT_ENCODINGS.join(", "),
            ));
        } else {
            config.encodings = labels;
        }
    }

    // -- Ingest: large_file_threshold_bytes --
    if let Some(bytes) = raw.ingest.large_file_threshold_bytes {
        if bytes >= constants::MIN_LARGE_FILE_THRESHOLD {
            config.large_file_threshold = bytes;
        } else {
            warnings.push(format!(
                "[ingest] large_file_threshold_bytes = {bytes} is below the minimum ({}). \
                 Using default ({}).",
                constants::MIN_LARGE_FILE_THRESHOLD,
                constants::DEFAULT_LARGE_FILE_THRESHOLD,
            ));
        }
    }

    // -- Search: mode --
    if let Some(ref mode) = raw.search.mode {
        let lower = mode.to_lowercase();
        if constants::SEARCH_MODES.contains(&lower.as_str()) {
            config.search_mode = lower;
        } else {
            warnings.push(format!(
                "[search] mode = \"{mode}\" is not recognised. Expected {}. Using default ({}).",
                constants::SEARCH_MODES.join(" or "),
                constants::DEFAULT_SEARCH_MODE,
            ));
        }
    }

    // -- Search: chunk_rows --
    if let Some(rows) = raw.search.chunk_rows {
        if (constants::MIN_CHUNK_ROWS..=constants::MAX_CHUNK_ROWS).contains(&rows) {
            config.chunk_rows = rows;
        } else {
            warnings.push(format!(
                "[search] chunk_rows = {rows} is out of range ({}-{}). Using default ({}).",
                constants::MIN_CHUNK_ROWS,
                constants::MAX_CHUNK_ROWS,
                constants::DEFAULT_CHUNK_ROWS,
            ));
        }
    }

    // -- Search: max_rows --
    if let Some(rows) = raw.search.max_rows {
        config.max_rows = (rows > 0).then_some(rows);
    }

    // -- Search: worker_threads --
    if let Some(threads) = raw.search.worker_threads {
        if threads <= constants::MAX_WORKER_THREADS {
            config.worker_threads = threads;
        } else {
            warnings.push(format!(
                "[search] worker_threads = {threads} exceeds the maximum ({}). Using auto.",
                constants::MAX_WORKER_THREADS,
            ));
        }
    }

    // -- Reconcile: threshold --
    if let Some(threshold) = raw.reconcile.threshold {
        if (constants::MIN_FUZZY_THRESHOLD..=constants::MAX_FUZZY_THRESHOLD).contains(&threshold)
        {
            config.fuzzy_threshold = threshold;
        } else {
            warnings.push(format!(
                "[reconcile] threshold = {threshold} is out of range ({}-{}). Using default ({}).",
                constants::MIN_FUZZY_THRESHOLD,
                constants::MAX_FUZZY_THRESHOLD,
                constants::DEFAULT_FUZZY_THRESHOLD,
            ));
        }
    }

    // -- Reconcile: containment_floor --
    if let Some(floor) = raw.reconcile.containment_floor {
        if floor == 0.0 {
            config.containment_floor = None;
        } else if (0.0..=1.0).contains(&floor) {
            config.containment_floor = Some(floor);
        } else {
            warnings.push(format!(
                "[reconcile] containment_floor = {floor} is out of range (0-1). Using default ({}).",
                constants::DEFAULT_CONTAINMENT_FLOOR,
            ));
        }
    }

    // -- Reconcile: metric --
    if let Some(ref metric) = raw.reconcile.metric {
        let lower = metric.to_lowercase().replace('-', "_");
        if constants::SIMILARITY_METRICS.contains(&lower.as_str()) {
            config.similarity_metric = lower;
        } else {
            warnings.push(format!(
                "[reconcile] metric = \"{metric}\" is not recognised. Valid values: {}. \
                 Using default ({}).",
                constants::SIMILARITY_METRICS.join(", "),
                constants::DEFAULT_SIMILARITY_METRIC,
            ));
        }
    }

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        if constants::LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: {}. Using default ({}).",
                constants::LOG_LEVELS.join(", "),
                constants::DEFAULT_LOG_LEVEL,
            ));
        }
    }

    (config, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let (config, warnings) = parse_config("");
        assert_eq!(config, AppConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_valid_values_are_applied() {
        let (config, warnings) = parse_config(
            r#"
[ingest]
encodings = ["shift_jis", "utf-8"]

[search]
mode = "Narrow"
chunk_rows = 500
max_rows = 1000
worker_threads = 2

[reconcile]
threshold = 0.9
containment_floor = 0
metric = "jaro-winkler"

[logging]
level = "DEBUG"

[unknown_section]
ignored = true
"#,
        );
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.encodings, vec!["shift_jis", "utf-8"]);
        assert_eq!(config.search_mode, "narrow");
        assert_eq!(config.chunk_rows, 500);
        assert_eq!(config.max_rows, Some(1000));
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.fuzzy_threshold, 0.9);
        assert_eq!(config.containment_floor, None);
        assert_eq!(config.similarity_metric, "jaro_winkler");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_invalid_values_warn_and_fall_back() {
        let (config, warnings) = parse_config(
            r#"
[search]
mode = "fuzzy"
chunk_rows = 0

[reconcile]
threshold = 0.1
metric = "cosine"
"#,
        );
        assert_eq!(warnings.len(), 4);
        assert_eq!(config.search_mode, constants::DEFAULT_SEARCH_MODE);
        assert_eq!(config.chunk_rows, constants::DEFAULT_CHUNK_ROWS);
        assert_eq!(config.fuzzy_threshold, constants::DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(config.similarity_metric, constants::DEFAULT_SIMILARITY_METRIC);
    }

    #[test]
    fn test_unparseable_config_uses_defaults() {
        let (config, warnings) = parse_config("[search\nmode = ");
        assert_eq!(config, AppConfig::default());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_missing_file_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (config, warnings) = load_config(&dir.path().join("config.toml"));
        assert_eq!(config, AppConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_paths_layout() {
        let paths = PlatformPaths::under(Path::new("/cfg"));
        assert_eq!(paths.config_file, Path::new("/cfg/config.toml"));
        assert_eq!(paths.user_schemas_dir, Path::new("/cfg/schemas"));
        assert_eq!(paths.user_patterns_dir, Path::new("/cfg/patterns"));
    }
}
