use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{KgError, Result};
use crate::types::{FieldConflictBehavior, MultiMatchBehavior, NoMatchBehavior, Provenance};

/// Directory used for resolver caches when no platform cache dir exists.
pub const FALLBACK_CACHE_DIR: &str = "input_files/sqlite_resolver";

/// Default number of records emitted per orchestrated batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default number of records sent per upsert statement.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 50_050;

/// Default number of ids per remote normalization request.
pub const DEFAULT_REMOTE_BATCH_SIZE: usize = 1_000;

/// Configuration for one ETL run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Records per orchestrated output batch.
    pub batch_size: usize,
    /// Records per upsert statement sent to a graph store.
    pub write_batch_size: usize,
    /// Scalar conflict policy used by the merger and the stores.
    pub field_conflict_behavior: FieldConflictBehavior,
    /// Directory holding SQLite lookup caches.
    pub cache_dir: Option<String>,
    /// Source metadata stamped onto every record as provenance.
    pub source: Provenance,
    pub inputs: Vec<InputConfig>,
    pub resolvers: Vec<ResolverConfig>,
    pub outputs: Vec<OutputConfig>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            field_conflict_behavior: FieldConflictBehavior::KeepLast,
            cache_dir: None,
            source: Provenance::new("unknown", "unknown", "", ""),
            inputs: Vec::new(),
            resolvers: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl EtlConfig {
    /// Returns the directory for resolver caches.
    ///
    /// Uses the configured `cache_dir`, then the platform cache directory,
    /// then [`FALLBACK_CACHE_DIR`].
    pub fn resolver_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return PathBuf::from(dir);
        }
        match dirs::cache_dir() {
            Some(dir) => dir.join("kgmerge").join("resolvers"),
            None => PathBuf::from(FALLBACK_CACHE_DIR),
        }
    }
}

/// A JSON-lines record file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub name: String,
    pub path: String,
}

/// Which resolution strategy serves a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStrategy {
    LookupTable,
    AliasIndex,
    PriorityAlias,
    Remote,
}

/// A column holding aliases of the row's primary id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasColumn {
    pub column: String,
    /// Context tag assigned to aliases from this column.
    pub tag: String,
    /// Optional CURIE prefix prepended as `prefix:value`.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Layout of a delimited reference file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceLayout {
    pub id_column: String,
    pub aliases: Vec<AliasColumn>,
    pub delimiter: char,
    /// Separator for multi-valued alias cells.
    pub list_separator: char,
}

impl Default for ReferenceLayout {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            aliases: Vec::new(),
            delimiter: '\t',
            list_separator: '|',
        }
    }
}

/// Resolver wiring for one node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Node type this resolver serves.
    pub label: String,
    pub strategy: ResolverStrategy,
    /// Reference files (glob patterns) for table and alias strategies.
    #[serde(default)]
    pub files: Vec<String>,
    /// Normalization service root for the remote strategy.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_remote_batch_size")]
    pub remote_batch_size: usize,
    #[serde(default)]
    pub conflate: bool,
    #[serde(default)]
    pub no_match_behavior: NoMatchBehavior,
    #[serde(default)]
    pub multi_match_behavior: MultiMatchBehavior,
    #[serde(default = "default_true")]
    pub use_equivalent_ids: bool,
    #[serde(default)]
    pub add_labels_for_resolver_events: bool,
    #[serde(default)]
    pub layout: ReferenceLayout,
}

fn default_remote_batch_size() -> usize {
    DEFAULT_REMOTE_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

/// Where merged batches are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    /// Neo4j over its HTTP transactional endpoint.
    Neo4j {
        url: String,
        #[serde(default = "default_database")]
        database: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        post_processing: Vec<String>,
    },
    /// Embedded SQLite document store with client-side re-merge.
    Sqlite {
        path: String,
        #[serde(default = "default_true")]
        sweep_dangling_edges: bool,
    },
}

fn default_database() -> String {
    "neo4j".to_string()
}

/// Loads a configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EtlConfig> {
    if !path.exists() {
        return Err(KgError::Config {
            message: format!("config file '{}' does not exist", path.display()),
        });
    }

    let contents = fs::read_to_string(path).map_err(|e| KgError::Config {
        message: format!("failed to read config file '{}': {}", path.display(), e),
    })?;

    let config: EtlConfig = toml::from_str(&contents).map_err(|e| KgError::Config {
        message: format!("failed to parse config file '{}': {}", path.display(), e),
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Saves the configuration to disk using an atomic write.
///
/// Writes to a temporary file first and then renames it into place.
pub fn save_config(path: &Path, config: &EtlConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| KgError::Config {
                message: format!(
                    "failed to create config directory '{}': {}",
                    parent.display(),
                    e
                ),
            })?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let text = toml::to_string_pretty(config).map_err(|e| KgError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&tmp_path, &text).map_err(|e| KgError::Config {
        message: format!(
            "failed to write temporary config file '{}': {}",
            tmp_path.display(),
            e
        ),
    })?;

    fs::rename(&tmp_path, path).map_err(|e| KgError::Config {
        message: format!(
            "failed to rename temporary config file '{}' to '{}': {}",
            tmp_path.display(),
            path.display(),
            e
        ),
    })?;

    Ok(())
}

/// Rejects configurations that cannot drive a run.
pub fn validate_config(config: &EtlConfig) -> Result<()> {
    if config.batch_size == 0 || config.write_batch_size == 0 {
        return Err(KgError::Config {
            message: "batch_size and write_batch_size must be positive".to_string(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for resolver in &config.resolvers {
        if !seen.insert(resolver.label.as_str()) {
            return Err(KgError::Config {
                message: format!("more than one resolver configured for '{}'", resolver.label),
            });
        }
        match resolver.strategy {
            ResolverStrategy::Remote => {
                if resolver.base_url.is_none() {
                    return Err(KgError::Config {
                        message: format!("remote resolver for '{}' needs base_url", resolver.label),
                    });
                }
                if resolver.remote_batch_size == 0 {
                    return Err(KgError::Config {
                        message: format!(
                            "remote resolver for '{}' needs a positive remote_batch_size",
                            resolver.label
                        ),
                    });
                }
            }
            _ => {
                if resolver.files.is_empty() {
                    return Err(KgError::Config {
                        message: format!("resolver for '{}' lists no files", resolver.label),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Expands glob patterns into a sorted, de-duplicated list of files.
///
/// A pattern matching nothing is an error; a misspelled path should not
/// silently produce an empty resolver.
pub fn expand_file_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let entries = glob::glob(pattern).map_err(|e| KgError::Config {
            message: format!("invalid file pattern '{}': {}", pattern, e),
        })?;
        let before = files.len();
        for entry in entries {
            let path = entry.map_err(|e| KgError::Config {
                message: format!("failed to read path for pattern '{}': {}", pattern, e),
            })?;
            if path.is_file() {
                files.push(path);
            }
        }
        if files.len() == before {
            return Err(KgError::Config {
                message: format!("file pattern '{}' matched no files", pattern),
            });
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
