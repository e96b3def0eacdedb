// TableSleuth - app/config_mgr.rs
//
// Loads schema mappings and pattern sets from both built-in sources
// (embedded in the binary) and user-defined TOML files on disk.
// User definitions override built-in definitions with the same id.

use crate::core::patterns::{self, PatternSet};
use crate::core::schema::{self, SchemaMapping};
use crate::platform::fs::{self as pfs, BoundedReadError};
use crate::util::constants;
use crate::util::error::{PatternError, SchemaError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One kind of TOML definition document.
trait DefinitionKind {
    type Item;
    type Error: std::fmt::Display;

    const KIND: &'static str;

    fn builtin() -> Vec<Self::Item>;
    fn compile(content: &str, path: &Path) -> Result<Self::Item, Self::Error>;
    fn id(item: &Self::Item) -> &str;

    fn too_large(path: PathBuf, size: u64) -> Self::Error;
    fn io(path: PathBuf, source: std::io::Error) -> Self::Error;
    fn duplicate(id: String, path1: PathBuf, path2: PathBuf) -> Self::Error;
    fn too_many(count: usize) -> Self::Error;
}

struct Schemas;

impl DefinitionKind for Schemas {
    type Item = SchemaMapping;
    type Error = SchemaError;

    const KIND: &'static str = "schema";

    fn builtin() -> Vec<SchemaMapping> {
        schema::load_builtin_schemas()
    }

    fn compile(content: &str, path: &Path) -> Result<SchemaMapping, SchemaError> {
        schema::parse_schema_toml(content, path)
            .and_then(|def| schema::validate_and_compile(def, path, false))
    }

    fn id(item: &SchemaMapping) -> &str {
        &item.id
    }

    fn too_large(path: PathBuf, size: u64) -> SchemaError {
        SchemaError::FileTooLarge {
            path,
            size,
            max_size: constants::MAX_DEFINITION_FILE_SIZE,
        }
    }

    fn io(path: PathBuf, source: std::io::Error) -> SchemaError {
        SchemaError::Io { path, source }
    }

    fn duplicate(id: String, path1: PathBuf, path2: PathBuf) -> SchemaError {
        SchemaError::DuplicateId { id, path1, path2 }
    }

    fn too_many(count: usize) -> SchemaError {
        SchemaError::TooManyDefinitions {
            count,
            max: constants::MAX_DEFINITIONS,
        }
    }
}

struct PatternSets;

impl DefinitionKind for PatternSets {
    type Item = PatternSet;
    type Error = PatternError;

    const KIND: &'static str = "pattern set";

    fn builtin() -> Vec<PatternSet> {
        patterns::load_builtin_pattern_sets()
    }

    fn compile(content: &str, path: &Path) -> Result<PatternSet, PatternError> {
        patterns::parse_pattern_toml(content, path)
            .and_then(|def| patterns::validate_and_compile(def, path, false))
    }

    fn id(item: &PatternSet) -> &str {
        &item.id
    }

    fn too_large(path: PathBuf, size: u64) -> PatternError {
        PatternError::FileTooLarge {
            path,
            size,
            max_size: constants::MAX_DEFINITION_FILE_SIZE,
        }
    }

    fn io(path: PathBuf, source: std::io::Error) -> PatternError {
        PatternError::Io { path, source }
    }

    fn duplicate(id: String, path1: PathBuf, path2: PathBuf) -> PatternError {
        PatternError::DuplicateId { id, path1, path2 }
    }

    fn too_many(count: usize) -> PatternError {
        PatternError::TooManyDefinitions {
            count,
            max: constants::MAX_DEFINITIONS,
        }
    }
}

/// Load all schema mappings: built-in first, then user-defined overrides.
///
/// Invalid user files are skipped and returned as non-fatal errors.
pub fn load_all_schemas(user_dir: Option<&Path>) -> (Vec<SchemaMapping>, Vec<SchemaError>) {
    load_all::<Schemas>(user_dir)
}

/// Load all pattern sets: built-in first, then user-defined overrides.
pub fn load_all_pattern_sets(user_dir: Option<&Path>) -> (Vec<PatternSet>, Vec<PatternError>) {
    load_all::<PatternSets>(user_dir)
}

/// Take the schema mapping with `id` out of the loaded list.
pub fn select_schema(schemas: Vec<SchemaMapping>, id: &str) -> Result<SchemaMapping, SchemaError> {
    let available: Vec<String> = schemas.iter().map(|s| s.id.clone()).collect();
    schemas
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| SchemaError::UnknownSchema {
            id: id.to_string(),
            available,
        })
}

/// Take the pattern set with `id` out of the loaded list.
pub fn select_pattern_set(sets: Vec<PatternSet>, id: &str) -> Result<PatternSet, PatternError> {
    let available: Vec<String> = sets.iter().map(|s| s.id.clone()).collect();
    sets.into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| PatternError::UnknownPatternSet {
            id: id.to_string(),
            available,
        })
}

/// Load definitions and select the schema mapping with `id` for a run.
///
/// Any user definition that fails to load aborts: a broken file may be the
/// override the caller meant to select, and its id is unknown once parsing
/// has failed.
pub fn load_schema(user_dir: Option<&Path>, id: &str) -> Result<SchemaMapping, SchemaError> {
    load_selected::<Schemas>(user_dir, id, select_schema)
}

/// Load definitions and select the pattern set with `id` for a run.
///
/// Fails like [`load_schema`] on any invalid user definition.
pub fn load_pattern_set(user_dir: Option<&Path>, id: &str) -> Result<PatternSet, PatternError> {
    load_selected::<PatternSets>(user_dir, id, select_pattern_set)
}

fn load_selected<K: DefinitionKind>(
    user_dir: Option<&Path>,
    id: &str,
    select: fn(Vec<K::Item>, &str) -> Result<K::Item, K::Error>,
) -> Result<K::Item, K::Error> {
    let (items, errors) = load_all::<K>(user_dir);
    if let Some(first) = errors.into_iter().next() {
        tracing::error!(kind = K::KIND, id, error = %first, "User definition invalid, aborting");
        return Err(first);
    }
    select(items, id)
}

fn load_all<K: DefinitionKind>(user_dir: Option<&Path>) -> (Vec<K::Item>, Vec<K::Error>) {
    let mut items = K::builtin();
    let mut errors = Vec::new();

    tracing::info!(kind = K::KIND, builtin_count = items.len(), "Loaded built-in definitions");

    if let Some(dir) = user_dir {
        let (user_items, user_errors) = load_user::<K>(dir);
        errors.extend(user_errors);

        for user_item in user_items {
            if let Some(pos) = items.iter().position(|i| K::id(i) == K::id(&user_item)) {
                tracing::info!(kind = K::KIND, id = %K::id(&user_item), "User definition overrides built-in");
                items[pos] = user_item;
            } else {
                tracing::info!(kind = K::KIND, id = %K::id(&user_item), "Loaded user-defined definition");
                items.push(user_item);
            }
        }
    }

    if items.len() > constants::MAX_DEFINITIONS {
        tracing::warn!(
            kind = K::KIND,
            count = items.len(),
            max = constants::MAX_DEFINITIONS,
            "Too many definitions loaded, truncating"
        );
        errors.push(K::too_many(items.len()));
        items.truncate(constants::MAX_DEFINITIONS);
    }

    for e in &errors {
        tracing::warn!(kind = K::KIND, error = %e, "Skipped definition");
    }

    (items, errors)
}

fn load_user<K: DefinitionKind>(dir: &Path) -> (Vec<K::Item>, Vec<K::Error>) {
    let mut items: Vec<K::Item> = Vec::new();
    let mut errors = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    let paths = match pfs::list_toml_files(dir) {
        Ok(paths) => paths,
        Err(e) => {
            errors.push(K::io(dir.to_path_buf(), e));
            return (items, errors);
        }
    };

    if paths.is_empty() {
        tracing::debug!(dir = %dir.display(), "No user definitions found");
    }

    for path in paths {
        let content = match pfs::read_bounded(&path, constants::MAX_DEFINITION_FILE_SIZE) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(c) => c,
                Err(e) => {
                    let source = std::io::Error::new(std::io::ErrorKind::InvalidData, e);
                    errors.push(K::io(path, source));
                    continue;
                }
            },
            Err(BoundedReadError::TooLarge { size }) => {
                errors.push(K::too_large(path, size));
                continue;
            }
            Err(BoundedReadError::Io(e)) => {
                errors.push(K::io(path, e));
                continue;
            }
        };

        match K::compile(&content, &path) {
            Ok(item) => {
                let id = K::id(&item).to_string();
                if let Some(first) = seen.get(&id) {
                    errors.push(K::duplicate(id, first.clone(), path));
                    continue;
                }
                seen.insert(id, path);
                items.push(item);
            }
            Err(e) => errors.push(e),
        }
    }

    (items, errors)
}
