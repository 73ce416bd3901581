use std::collections::HashSet;

use rusqlite::params;
use rusqlite::OptionalExtension;

use super::connection::Database;
use crate::errors::{KgError, Result};
use crate::reference::MatchingPair;

/// Upper bound on bound parameters per statement. Bundled SQLite allows
/// 32 766; stay below it.
pub const MAX_SQL_VARIABLES: usize = 30_000;

/// Key under which the lookup table records its source version.
const VERSION_KEY: &str = "version";

/// A row of the lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRow {
    /// Canonical id.
    pub id: String,
    /// Term that maps to `id`.
    pub matched: String,
    pub match_type: String,
}

/// A persisted node document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub id: String,
    pub labels: Vec<String>,
    /// Serialized merged record.
    pub body: String,
}

/// A persisted edge document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub start_id: String,
    pub label: String,
    pub end_id: String,
    pub body: String,
}

impl StoredEdge {
    pub fn key(&self) -> (String, String, String) {
        (
            self.start_id.clone(),
            self.label.clone(),
            self.end_id.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns `?1, ?2, ..., ?n`.
fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_lookup(row: &rusqlite::Row) -> rusqlite::Result<LookupRow> {
    Ok(LookupRow {
        id: row.get("id")?,
        matched: row.get("match")?,
        match_type: row.get("type")?,
    })
}

fn row_to_stored_node(row: &rusqlite::Row) -> rusqlite::Result<StoredNode> {
    let labels_json: String = row.get("labels")?;
    Ok(StoredNode {
        id: row.get("id")?,
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        body: row.get("body")?,
    })
}

fn row_to_stored_edge(row: &rusqlite::Row) -> rusqlite::Result<StoredEdge> {
    Ok(StoredEdge {
        start_id: row.get("start_id")?,
        label: row.get("label")?,
        end_id: row.get("end_id")?,
        body: row.get("body")?,
    })
}

// ---------------------------------------------------------------------------
// Lookup table
// ---------------------------------------------------------------------------

impl Database {
    /// Returns the version key the lookup table was built from, or `None`
    /// when either table is missing and a rebuild is required.
    pub fn lookup_version(&self) -> Result<Option<String>> {
        if !self.table_exists("matches")? || !self.table_exists("file_metadata")? {
            return Ok(None);
        }
        self.conn()
            .query_row(
                "SELECT value FROM file_metadata WHERE key = ?1",
                params![VERSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KgError::Database {
                message: format!("failed to read lookup version: {e}"),
                operation: "lookup_version".to_string(),
            })
    }

    /// Drops and rebuilds the lookup table from `pairs`, recording `version`.
    pub fn rebuild_lookup(&self, pairs: &[MatchingPair], version: &str) -> Result<()> {
        let tx = self
            .conn()
            .unchecked_transaction()
            .map_err(|e| KgError::Database {
                message: format!("failed to begin transaction: {e}"),
                operation: "rebuild_lookup".to_string(),
            })?;

        tx.execute_batch("DROP TABLE IF EXISTS matches; DROP TABLE IF EXISTS file_metadata;")
            .map_err(|e| KgError::Database {
                message: format!("failed to drop lookup tables: {e}"),
                operation: "rebuild_lookup".to_string(),
            })?;
        self.ensure_lookup_schema()?;

        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO matches (id, match, type) VALUES (?1, ?2, ?3)")
                .map_err(|e| KgError::Database {
                    message: format!("failed to prepare statement: {e}"),
                    operation: "rebuild_lookup".to_string(),
                })?;
            for pair in pairs {
                stmt.execute(params![pair.id, pair.matched, pair.match_type])
                    .map_err(|e| KgError::Database {
                        message: format!("failed to insert match: {e}"),
                        operation: "rebuild_lookup".to_string(),
                    })?;
            }
        }

        tx.execute(
            "INSERT INTO file_metadata (key, value) VALUES (?1, ?2)",
            params![VERSION_KEY, version],
        )
        .map_err(|e| KgError::Database {
            message: format!("failed to record lookup version: {e}"),
            operation: "rebuild_lookup".to_string(),
        })?;

        tx.commit().map_err(|e| KgError::Database {
            message: format!("failed to commit transaction: {e}"),
            operation: "rebuild_lookup".to_string(),
        })
    }

    /// Returns every row whose `match` column is one of `terms`, in table
    /// order within each chunk.
    pub fn find_matches(&self, terms: &[String]) -> Result<Vec<LookupRow>> {
        self.lookup_rows_where("match", terms, "find_matches")
    }

    /// Returns every row whose canonical `id` is one of `ids`.
    pub fn find_aliases(&self, ids: &[String]) -> Result<Vec<LookupRow>> {
        self.lookup_rows_where("id", ids, "find_aliases")
    }

    /// Number of rows in the lookup table.
    pub fn lookup_row_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))
            .map_err(|e| KgError::Database {
                message: format!("failed to count matches: {e}"),
                operation: "lookup_row_count".to_string(),
            })?;
        Ok(count as u64)
    }

    fn lookup_rows_where(
        &self,
        column: &str,
        values: &[String],
        operation: &str,
    ) -> Result<Vec<LookupRow>> {
        let mut rows = Vec::new();
        for chunk in values.chunks(MAX_SQL_VARIABLES) {
            let sql = format!(
                "SELECT id, match, type FROM matches WHERE {column} IN ({}) ORDER BY rowid",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn().prepare(&sql).map_err(|e| KgError::Database {
                message: format!("failed to prepare query: {e}"),
                operation: operation.to_string(),
            })?;
            let mapped = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), row_to_lookup)
                .map_err(|e| KgError::Database {
                    message: format!("failed to query matches: {e}"),
                    operation: operation.to_string(),
                })?;
            for row in mapped {
                rows.push(row.map_err(|e| KgError::Database {
                    message: format!("failed to read match row: {e}"),
                    operation: operation.to_string(),
                })?);
            }
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Document store: nodes
// ---------------------------------------------------------------------------

impl Database {
    /// Fetches stored nodes by id. Missing ids are ignored.
    pub fn get_nodes(&self, ids: &[String]) -> Result<Vec<StoredNode>> {
        let mut nodes = Vec::new();
        for chunk in ids.chunks(MAX_SQL_VARIABLES) {
            let sql = format!(
                "SELECT id, labels, body FROM nodes WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn().prepare(&sql).map_err(|e| KgError::Database {
                message: format!("failed to prepare query: {e}"),
                operation: "get_nodes".to_string(),
            })?;
            let mapped = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), row_to_stored_node)
                .map_err(|e| KgError::Database {
                    message: format!("failed to query nodes: {e}"),
                    operation: "get_nodes".to_string(),
                })?;
            for row in mapped {
                nodes.push(row.map_err(|e| KgError::Database {
                    message: format!("failed to read node row: {e}"),
                    operation: "get_nodes".to_string(),
                })?);
            }
        }
        Ok(nodes)
    }

    /// Inserts or replaces node documents inside a single transaction.
    pub fn upsert_nodes(&self, nodes: &[StoredNode]) -> Result<()> {
        let tx = self
            .conn()
            .unchecked_transaction()
            .map_err(|e| KgError::Database {
                message: format!("failed to begin transaction: {e}"),
                operation: "upsert_nodes".to_string(),
            })?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO nodes (id, labels, body) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET labels = excluded.labels, body = excluded.body",
                )
                .map_err(|e| KgError::Database {
                    message: format!("failed to prepare statement: {e}"),
                    operation: "upsert_nodes".to_string(),
                })?;

            for node in nodes {
                let labels = serde_json::to_string(&node.labels)?;
                stmt.execute(params![node.id, labels, node.body])
                    .map_err(|e| KgError::Database {
                        message: format!("failed to upsert node: {e}"),
                        operation: "upsert_nodes".to_string(),
                    })?;
            }
        }

        tx.commit().map_err(|e| KgError::Database {
            message: format!("failed to commit transaction: {e}"),
            operation: "upsert_nodes".to_string(),
        })
    }

    /// Returns the subset of `ids` that are stored as nodes.
    pub fn existing_node_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(MAX_SQL_VARIABLES) {
            let sql = format!(
                "SELECT id FROM nodes WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn().prepare(&sql).map_err(|e| KgError::Database {
                message: format!("failed to prepare query: {e}"),
                operation: "existing_node_ids".to_string(),
            })?;
            let mapped = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| KgError::Database {
                    message: format!("failed to query node ids: {e}"),
                    operation: "existing_node_ids".to_string(),
                })?;
            for row in mapped {
                found.insert(row.map_err(|e| KgError::Database {
                    message: format!("failed to read node id: {e}"),
                    operation: "existing_node_ids".to_string(),
                })?);
            }
        }
        Ok(found)
    }

    pub fn node_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .map_err(|e| KgError::Database {
                message: format!("failed to count nodes: {e}"),
                operation: "node_count".to_string(),
            })?;
        Ok(count as u64)
    }
}

// ---------------------------------------------------------------------------
// Document store: edges
// ---------------------------------------------------------------------------

impl Database {
    /// Fetches stored edges by `(start_id, label, end_id)` key. Each key is
    /// a primary-key lookup.
    pub fn get_edges(&self, keys: &[(String, String, String)]) -> Result<Vec<StoredEdge>> {
        let mut edges = Vec::new();
        for chunk in keys.chunks(MAX_SQL_VARIABLES / 3) {
            let rows = (0..chunk.len())
                .map(|i| format!("(?{}, ?{}, ?{})", 3 * i + 1, 3 * i + 2, 3 * i + 3))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT start_id, label, end_id, body FROM edges
                 WHERE (start_id, label, end_id) IN (VALUES {rows})"
            );
            let mut stmt = self.conn().prepare(&sql).map_err(|e| KgError::Database {
                message: format!("failed to prepare query: {e}"),
                operation: "get_edges".to_string(),
            })?;
            let values = chunk
                .iter()
                .flat_map(|(start, label, end)| [start, label, end]);
            let mapped = stmt
                .query_map(rusqlite::params_from_iter(values), row_to_stored_edge)
                .map_err(|e| KgError::Database {
                    message: format!("failed to query edges: {e}"),
                    operation: "get_edges".to_string(),
                })?;
            for row in mapped {
                edges.push(row.map_err(|e| KgError::Database {
                    message: format!("failed to read edge row: {e}"),
                    operation: "get_edges".to_string(),
                })?);
            }
        }
        Ok(edges)
    }

    /// Inserts or replaces edge documents inside a single transaction.
    pub fn upsert_edges(&self, edges: &[StoredEdge]) -> Result<()> {
        let tx = self
            .conn()
            .unchecked_transaction()
            .map_err(|e| KgError::Database {
                message: format!("failed to begin transaction: {e}"),
                operation: "upsert_edges".to_string(),
            })?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO edges (start_id, label, end_id, body) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(start_id, label, end_id) DO UPDATE SET body = excluded.body",
                )
                .map_err(|e| KgError::Database {
                    message: format!("failed to prepare statement: {e}"),
                    operation: "upsert_edges".to_string(),
                })?;

            for edge in edges {
                stmt.execute(params![edge.start_id, edge.label, edge.end_id, edge.body])
                    .map_err(|e| KgError::Database {
                        message: format!("failed to upsert edge: {e}"),
                        operation: "upsert_edges".to_string(),
                    })?;
            }
        }

        tx.commit().map_err(|e| KgError::Database {
            message: format!("failed to commit transaction: {e}"),
            operation: "upsert_edges".to_string(),
        })
    }

    /// Returns up to `limit` edge keys with rowid greater than `after`,
    /// ordered by rowid, for paging through the edge table.
    pub fn edge_keys_after(
        &self,
        after: i64,
        limit: usize,
    ) -> Result<Vec<(i64, String, String, String)>> {
        let mut stmt = self
            .conn()
            .prepare(
                "SELECT rowid, start_id, label, end_id FROM edges
                 WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            )
            .map_err(|e| KgError::Database {
                message: format!("failed to prepare query: {e}"),
                operation: "edge_keys_after".to_string(),
            })?;
        let mapped = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map_err(|e| KgError::Database {
                message: format!("failed to query edge keys: {e}"),
                operation: "edge_keys_after".to_string(),
            })?;

        let mut keys = Vec::new();
        for row in mapped {
            keys.push(row.map_err(|e| KgError::Database {
                message: format!("failed to read edge key: {e}"),
                operation: "edge_keys_after".to_string(),
            })?);
        }
        Ok(keys)
    }

    /// Deletes edges by key inside a single transaction.
    pub fn delete_edges(&self, keys: &[(String, String, String)]) -> Result<usize> {
        let tx = self
            .conn()
            .unchecked_transaction()
            .map_err(|e| KgError::Database {
                message: format!("failed to begin transaction: {e}"),
                operation: "delete_edges".to_string(),
            })?;

        let mut deleted = 0;
        {
            let mut stmt = tx
                .prepare_cached("DELETE FROM edges WHERE start_id = ?1 AND label = ?2 AND end_id = ?3")
                .map_err(|e| KgError::Database {
                    message: format!("failed to prepare statement: {e}"),
                    operation: "delete_edges".to_string(),
                })?;
            for (start, label, end) in keys {
                deleted += stmt
                    .execute(params![start, label, end])
                    .map_err(|e| KgError::Database {
                        message: format!("failed to delete edge: {e}"),
                        operation: "delete_edges".to_string(),
                    })?;
            }
        }

        tx.commit().map_err(|e| KgError::Database {
            message: format!("failed to commit transaction: {e}"),
            operation: "delete_edges".to_string(),
        })?;
        Ok(deleted)
    }

    pub fn edge_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))
            .map_err(|e| KgError::Database {
                message: format!("failed to count edges: {e}"),
                operation: "edge_count".to_string(),
            })?;
        Ok(count as u64)
    }
}

// ---------------------------------------------------------------------------
// Truncate
// ---------------------------------------------------------------------------

impl Database {
    /// Removes every stored node and edge.
    pub fn truncate_store(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "DELETE FROM edges;
                 DELETE FROM nodes;",
            )
            .map_err(|e| KgError::Database {
                message: format!("failed to truncate store: {e}"),
                operation: "truncate_store".to_string(),
            })
    }
}
