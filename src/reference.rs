use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::ReferenceLayout;
use crate::errors::{KgError, Result};

/// Context tag for a primary id matching itself.
pub const EXACT: &str = "exact";

/// An alias term found on a reference row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub term: String,
    pub tag: String,
}

/// One row of a reference file: a primary id and its aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub id: String,
    pub aliases: Vec<Alias>,
}

/// A `(canonical id, alias, match type)` triple for the lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchingPair {
    pub id: String,
    pub matched: String,
    pub match_type: String,
}

/// Compute SHA-256 content hash of file content.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A delimited reference file with a header row.
#[derive(Debug, Clone)]
pub struct ReferenceFile {
    path: PathBuf,
    layout: ReferenceLayout,
}

impl ReferenceFile {
    pub fn new(path: impl Into<PathBuf>, layout: ReferenceLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `file_name:sha256`, which changes whenever the content does.
    pub fn version_key(&self) -> Result<String> {
        let bytes = fs::read(&self.path).map_err(|e| KgError::File {
            message: format!("failed to read reference file: {e}"),
            path: self.path.display().to_string(),
        })?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(format!("{}:{}", name, content_hash(&bytes)))
    }

    /// Parses every data row.
    ///
    /// Rows with an empty primary id are skipped. Missing trailing cells
    /// are treated as empty.
    pub fn rows(&self) -> Result<Vec<ReferenceRow>> {
        let text = fs::read_to_string(&self.path).map_err(|e| KgError::File {
            message: format!("failed to read reference file: {e}"),
            path: self.path.display().to_string(),
        })?;
        self.parse(&text)
    }

    fn parse(&self, text: &str) -> Result<Vec<ReferenceRow>> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let header: Vec<&str> = match lines.next() {
            Some((_, line)) => line.split(self.layout.delimiter).map(str::trim).collect(),
            None => return Ok(Vec::new()),
        };

        let id_index = self.column_index(&header, &self.layout.id_column)?;
        let mut alias_indexes = Vec::with_capacity(self.layout.aliases.len());
        for alias in &self.layout.aliases {
            alias_indexes.push((self.column_index(&header, &alias.column)?, alias));
        }

        let mut rows = Vec::new();
        for (_, line) in lines {
            let cells: Vec<&str> = line.split(self.layout.delimiter).collect();
            let id = cells.get(id_index).map(|c| c.trim()).unwrap_or_default();
            if id.is_empty() {
                continue;
            }

            let mut aliases = Vec::new();
            for (index, column) in &alias_indexes {
                let cell = cells.get(*index).copied().unwrap_or_default();
                for value in cell.split(self.layout.list_separator) {
                    let value = value.trim();
                    if value.is_empty() {
                        continue;
                    }
                    let term = match &column.prefix {
                        Some(prefix) if !value.starts_with(&format!("{prefix}:")) => {
                            format!("{prefix}:{value}")
                        }
                        _ => value.to_string(),
                    };
                    aliases.push(Alias {
                        term,
                        tag: column.tag.clone(),
                    });
                }
            }

            rows.push(ReferenceRow {
                id: id.to_string(),
                aliases,
            });
        }
        Ok(rows)
    }

    fn column_index(&self, header: &[&str], column: &str) -> Result<usize> {
        header
            .iter()
            .position(|h| *h == column)
            .ok_or_else(|| KgError::Parse {
                message: format!("missing column '{column}' in header"),
                path: self.path.display().to_string(),
                line: Some(1),
            })
    }
}

/// Combined version key for a set of reference files, in order.
pub fn combined_version_key(files: &[ReferenceFile]) -> Result<String> {
    let mut keys = Vec::with_capacity(files.len());
    for file in files {
        keys.push(file.version_key()?);
    }
    Ok(keys.join("\t"))
}

/// Flattens reference rows into lookup-table pairs: a self-match tagged
/// `exact` per primary id, then one pair per alias. Duplicates are removed
/// keeping first occurrences.
pub fn matching_pairs(rows: &[ReferenceRow]) -> Vec<MatchingPair> {
    let mut seen = std::collections::HashSet::new();
    let mut pairs = Vec::new();
    for row in rows {
        let exact = MatchingPair {
            id: row.id.clone(),
            matched: row.id.clone(),
            match_type: EXACT.to_string(),
        };
        if seen.insert(exact.clone()) {
            pairs.push(exact);
        }
        for alias in &row.aliases {
            let pair = MatchingPair {
                id: row.id.clone(),
                matched: alias.term.clone(),
                match_type: alias.tag.clone(),
            };
            if seen.insert(pair.clone()) {
                pairs.push(pair);
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AliasColumn;

    fn layout() -> ReferenceLayout {
        ReferenceLayout {
            id_column: "uniprot_id".to_string(),
            aliases: vec![
                AliasColumn {
                    column: "symbol".to_string(),
                    tag: "symbol".to_string(),
                    prefix: None,
                },
                AliasColumn {
                    column: "ncbi".to_string(),
                    tag: "NCBI Gene ID".to_string(),
                    prefix: Some("NCBIGene".to_string()),
                },
            ],
            ..ReferenceLayout::default()
        }
    }

    #[test]
    fn test_parse_rows_with_prefix_and_lists() {
        let file = ReferenceFile::new("mem.tsv", layout());
        let rows = file
            .parse("uniprot_id\tsymbol\tncbi\nP1\tABC|ABD\t42\n\t\t\nP2\t\tNCBIGene:7\n")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "P1");
        let terms: Vec<&str> = rows[0].aliases.iter().map(|a| a.term.as_str()).collect();
        assert_eq!(terms, vec!["ABC", "ABD", "NCBIGene:42"]);
        assert_eq!(rows[1].aliases.len(), 1);
        assert_eq!(rows[1].aliases[0].term, "NCBIGene:7");
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        let file = ReferenceFile::new("mem.tsv", layout());
        let err = file.parse("id\tsymbol\nP1\tABC\n").unwrap_err();
        assert!(matches!(err, KgError::Parse { .. }));
    }

    #[test]
    fn test_matching_pairs_dedup() {
        let rows = vec![ReferenceRow {
            id: "P1".to_string(),
            aliases: vec![
                Alias { term: "ABC".to_string(), tag: "symbol".to_string() },
                Alias { term: "ABC".to_string(), tag: "symbol".to_string() },
            ],
        }];
        let pairs = matching_pairs(&rows);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].match_type, EXACT);
    }
}
