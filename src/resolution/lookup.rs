use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use super::resolver::{IdResolver, ResolveCache};
use crate::db::Database;
use crate::errors::{KgError, Result};
use crate::reference::{combined_version_key, matching_pairs, ReferenceFile};
use crate::types::{IdMatch, IdRequest, MatchMap};

/// Resolves ids against a persistent SQLite `(id, match, type)` table.
///
/// The table is built from reference files on first use and reused by
/// later runs until the files' content changes.
pub struct LookupTableResolver {
    name: String,
    db: Database,
    cache: ResolveCache,
}

impl LookupTableResolver {
    /// Opens the lookup table at `db_path`, rebuilding it from `files` when
    /// it is missing or was built from different content.
    pub fn open(name: impl Into<String>, db_path: &Path, files: &[ReferenceFile]) -> Result<Self> {
        let name = name.into();
        let db = Database::open(db_path)?;
        let version = combined_version_key(files)?;

        if db.lookup_version()?.as_deref() == Some(version.as_str()) {
            info!(resolver = %name, path = %db_path.display(), "reusing lookup table");
        } else {
            let mut rows = Vec::new();
            for file in files {
                rows.extend(file.rows()?);
            }
            let pairs = matching_pairs(&rows);
            db.rebuild_lookup(&pairs, &version)?;
            info!(
                resolver = %name,
                path = %db_path.display(),
                rows = pairs.len(),
                "rebuilt lookup table"
            );
        }

        Ok(Self {
            name,
            db,
            cache: ResolveCache::new(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn lookup(&self, requests: &[IdRequest]) -> Result<MatchMap> {
        let terms: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();
        let rows = self.db.find_matches(&terms)?;

        // Group by input term, merging tags for a repeated (term, id) pair.
        let mut by_term: HashMap<String, Vec<IdMatch>> = HashMap::new();
        let mut canonical_ids: Vec<String> = Vec::new();
        for row in rows {
            let matches = by_term.entry(row.matched.clone()).or_default();
            match matches.iter_mut().find(|m| m.matched == row.id) {
                Some(existing) => {
                    if !existing.context.contains(&row.match_type) {
                        existing.context.push(row.match_type);
                    }
                }
                None => {
                    if !canonical_ids.contains(&row.id) {
                        canonical_ids.push(row.id.clone());
                    }
                    matches.push(IdMatch::new(row.matched, row.id, &row.match_type));
                }
            }
        }

        let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
        for row in self.db.find_aliases(&canonical_ids)? {
            let terms = aliases.entry(row.id).or_default();
            if !terms.contains(&row.matched) {
                terms.push(row.matched);
            }
        }

        for matches in by_term.values_mut() {
            for m in matches.iter_mut() {
                if let Some(terms) = aliases.get(&m.matched) {
                    m.equivalent_ids = terms.clone();
                }
            }
        }
        Ok(by_term)
    }
}

impl IdResolver for LookupTableResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_uncached(&mut self, requests: &[IdRequest]) -> Result<MatchMap> {
        self.lookup(requests).map_err(|e| KgError::ResolutionFailure {
            resolver: self.name.clone(),
            message: e.to_string(),
        })
    }

    fn cache(&self) -> &ResolveCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ResolveCache {
        &mut self.cache
    }
}
