// TableSleuth - platform/fs.rs
//
// Filesystem access: input discovery, byte reading with retry and
// memory-mapping, size-capped reads for definition files and reference lists.
//
// Per-file access errors during discovery are non-fatal and collected as
// warnings. Exclude patterns short-circuit directory descent via
// filter_entry so excluded subtrees are never traversed.

use crate::util::constants;
use crate::util::error::DiscoveryError;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Discovery
// =============================================================================

/// Configuration for an input discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum directory recursion depth.
    pub max_depth: usize,

    /// Discovery fails once more than this many inputs match.
    pub max_files: usize,

    /// Glob patterns (file name only) an input must match.
    /// An empty list includes everything that is not excluded.
    pub include_patterns: Vec<String>,

    /// Glob patterns matched against file names and literal directory names.
    pub exclude_patterns: Vec<String>,

    /// File size (bytes) above which an input is memory-mapped.
    pub large_file_threshold: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: constants::DEFAULT_MAX_DEPTH,
            max_files: constants::MAX_INPUT_FILES,
            include_patterns: constants::DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: constants::DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            large_file_threshold: constants::DEFAULT_LARGE_FILE_THRESHOLD,
        }
    }
}

/// One discovered input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    /// File name, used as the source name during schema resolution.
    pub name: String,
    pub size: u64,
    pub is_large: bool,
}

/// Discover input files under `root`, sorted by path.
///
/// Returns the files and a list of non-fatal warnings. Fails only when the
/// root is invalid or the file count exceeds `max_files`.
pub fn discover_inputs(
    root: &Path,
    config: &DiscoveryConfig,
) -> Result<(Vec<InputFile>, Vec<String>), DiscoveryError> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DiscoveryError::NotADirectory {
                path: root.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(DiscoveryError::RootNotFound {
                path: root.to_path_buf(),
            })
        }
    }

    let max_files = config.max_files.min(constants::MAX_INPUT_FILES);

    tracing::debug!(
        root = %root.display(),
        max_depth = config.max_depth,
        max_files,
        include = ?config.include_patterns,
        exclude = ?config.exclude_patterns,
        "Discovery starting"
    );

    let include_pats = compile_patterns(&config.include_patterns, "include");
    let exclude_pats = compile_patterns(&config.exclude_patterns, "exclude");

    let mut files: Vec<InputFile> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let walker = walkdir::WalkDir::new(root)
        .max_depth(config.max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_str().unwrap_or("");
            !is_excluded_component(name, &exclude_pats)
        });

    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                let path_str = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let msg = format!("Cannot access '{path_str}': {e}");
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => {
                warnings.push(format!("Skipping '{}': non-UTF-8 filename", path.display()));
                continue;
            }
        };

        if exclude_pats.iter().any(|p| p.matches(file_name)) {
            tracing::trace!(file = file_name, "Excluded by pattern");
            continue;
        }
        if !include_pats.is_empty() && !include_pats.iter().any(|p| p.matches(file_name)) {
            tracing::trace!(file = file_name, "Not matched by include patterns");
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                let msg = format!("Cannot read metadata for '{}': {e}", path.display());
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        if files.len() == max_files {
            return Err(DiscoveryError::MaxFilesExceeded { max: max_files });
        }

        let is_large = size >= config.large_file_threshold;
        if is_large {
            tracing::debug!(
                file = %path.display(),
                size_mb = size / (1024 * 1024),
                "Large file flagged"
            );
        }

        files.push(InputFile {
            path: path.to_path_buf(),
            name: file_name.to_string(),
            size,
            is_large,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));

    tracing::debug!(
        files = files.len(),
        warnings = warnings.len(),
        "Discovery complete"
    );

    Ok((files, warnings))
}

/// Compile glob pattern strings, logging and skipping any that fail.
fn compile_patterns(patterns: &[String], kind: &str) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                tracing::warn!(pattern = p, kind, error = %e, "Invalid glob pattern, skipping");
                None
            }
        })
        .collect()
}

/// Literal exclude patterns (no wildcards) also prune directories by name.
fn is_excluded_component(dir_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| {
        let s = p.as_str();
        !s.contains('*') && !s.contains('?') && !s.contains('[') && p.matches(dir_name)
    })
}

// =============================================================================
// Reading
// =============================================================================

/// File contents, either read into memory or memory-mapped.
pub enum FileBytes {
    Owned(Vec<u8>),
    Mapped(memmap2::Mmap),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Mapped(map) => map,
        }
    }
}

/// Read a discovered input. Large inputs are memory-mapped; small ones are
/// read with transient-error retries.
pub fn read_input(file: &InputFile) -> io::Result<FileBytes> {
    if file.is_large {
        map_file(&file.path).map(FileBytes::Mapped)
    } else {
        read_with_retry(&file.path).map(FileBytes::Owned)
    }
}

fn map_file(path: &Path) -> io::Result<memmap2::Mmap> {
    let file = std::fs::File::open(path)?;
    // SAFETY: the map is read-only and dropped once the input is decoded.
    // External truncation during that window is the accepted risk of mapping
    // exports that are already written.
    unsafe { memmap2::Mmap::map(&file) }
}

/// Read a whole file, retrying transient I/O errors.
pub fn read_with_retry(path: &Path) -> io::Result<Vec<u8>> {
    let mut last_err: Option<io::Error> = None;

    for attempt in 0..constants::MAX_READ_RETRIES {
        match std::fs::read(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if is_transient_error(&e) => {
                tracing::debug!(
                    file = %path.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "Transient I/O error, retrying"
                );
                std::thread::sleep(Duration::from_millis(
                    constants::READ_RETRY_DELAYS_MS[attempt as usize],
                ));
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::other("Unknown read error")))
}

fn is_transient_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Failure of a size-capped read.
#[derive(Debug)]
pub enum BoundedReadError {
    TooLarge { size: u64 },
    Io(io::Error),
}

/// Read a file only if it is at most `max_size` bytes.
pub fn read_bounded(path: &Path, max_size: u64) -> Result<Vec<u8>, BoundedReadError> {
    let size = std::fs::metadata(path)
        .map_err(BoundedReadError::Io)?
        .len();
    if size > max_size {
        return Err(BoundedReadError::TooLarge { size });
    }
    read_with_retry(path).map_err(BoundedReadError::Io)
}

/// `.toml` files directly inside `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn list_toml_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();
    Ok(paths)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("1-2_RS_2024_基本情報_事業概要等.csv"), "a\n1\n").unwrap();
        fs::write(root.join("notes.txt"), "not a table").unwrap();
        fs::write(root.join("~$locked.csv"), "lock").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("5-1_RS_2024_支出先_支出情報.CSV"), "b\n2\n").unwrap();
        fs::create_dir(root.join("__MACOSX")).unwrap();
        fs::write(root.join("__MACOSX").join("ghost.csv"), "x").unwrap();
        dir
    }

    #[test]
    fn test_discovers_csv_inputs_sorted() {
        let dir = make_tree();
        let (files, warnings) = discover_inputs(dir.path(), &DiscoveryConfig::default()).unwrap();
        assert!(warnings.is_empty());
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["1-2_RS_2024_基本情報_事業概要等.csv", "5-1_RS_2024_支出先_支出情報.CSV"]
        );
        assert!(files.iter().all(|f| !f.is_large));
    }

    #[test]
    fn test_max_depth_limits_descent() {
        let dir = make_tree();
        let config = DiscoveryConfig {
            max_depth: 1,
            ..DiscoveryConfig::default()
        };
        let (files, _) = discover_inputs(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_too_many_inputs_is_an_error() {
        let dir = make_tree();
        let config = DiscoveryConfig {
            max_files: 1,
            ..DiscoveryConfig::default()
        };
        let err = discover_inputs(dir.path(), &config).unwrap_err();
        assert!(matches!(err, DiscoveryError::MaxFilesExceeded { max: 1 }));
    }

    #[test]
    fn test_invalid_roots() {
        let dir = make_tree();
        assert!(matches!(
            discover_inputs(&dir.path().join("missing"), &DiscoveryConfig::default()),
            Err(DiscoveryError::RootNotFound { .. })
        ));
        assert!(matches!(
            discover_inputs(&dir.path().join("notes.txt"), &DiscoveryConfig::default()),
            Err(DiscoveryError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_large_inputs_are_mapped() {
        let dir = make_tree();
        let config = DiscoveryConfig {
            large_file_threshold: 1,
            ..DiscoveryConfig::default()
        };
        let (files, _) = discover_inputs(dir.path(), &config).unwrap();
        let bytes = read_input(&files[0]).unwrap();
        assert!(matches!(bytes, FileBytes::Mapped(_)));
        assert_eq!(&*bytes, b"a\n1\n");
    }

    #[test]
    fn test_read_bounded_rejects_oversized() {
        let dir = make_tree();
        let path = dir.path().join("notes.txt");
        assert!(matches!(
            read_bounded(&path, 3),
            Err(BoundedReadError::TooLarge { size: 11 })
        ));
        assert_eq!(read_bounded(&path, 100).unwrap(), b"not a table");
    }

    #[test]
    fn test_list_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.toml"), "").unwrap();
        fs::write(dir.path().join("a.toml"), "").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();
        let paths = list_toml_files(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.toml"));
        assert!(list_toml_files(&dir.path().join("none")).unwrap().is_empty());
    }
}
