use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use super::{OutputAdapter, WriteSummary};
use crate::db::{Database, StoredEdge, StoredNode, MAX_SQL_VARIABLES};
use crate::errors::{KgError, Result};
use crate::merge::{MergeAccumulator, MergeKey, MergedRecord, RecordMerger};
use crate::types::FieldConflictBehavior;

/// Edges examined per dangling-edge sweep page.
const SWEEP_PAGE_SIZE: usize = MAX_SQL_VARIABLES / 2;

/// Embedded document store.
///
/// Stored records are loaded, re-merged with the incoming batch on the
/// client, and written back with `INSERT .. ON CONFLICT DO UPDATE`.
pub struct SqliteOutputAdapter {
    name: String,
    db: Database,
    merger: RecordMerger,
    sweep_dangling_edges: bool,
}

impl SqliteOutputAdapter {
    pub fn open(
        name: impl Into<String>,
        path: &Path,
        behavior: FieldConflictBehavior,
        sweep_dangling_edges: bool,
    ) -> Result<Self> {
        let db = Database::open(path)?;
        db.ensure_store_schema()?;
        Ok(Self {
            name: name.into(),
            db,
            merger: RecordMerger::new(behavior),
            sweep_dangling_edges,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Loads a stored record by key.
    pub fn get(&self, key: &MergeKey) -> Result<Option<MergedRecord>> {
        match key {
            MergeKey::Node { id } => match self.db.get_nodes(&[id.clone()])?.into_iter().next() {
                Some(stored) => Ok(Some(decode(&stored.body)?)),
                None => Ok(None),
            },
            MergeKey::Edge {
                start_id,
                end_id,
                label,
                ..
            } => {
                let keys = [(start_id.clone(), label.clone(), end_id.clone())];
                match self.db.get_edges(&keys)?.into_iter().next() {
                    Some(stored) => Ok(Some(decode(&stored.body)?)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Re-merges `records` with their stored versions.
    fn remerge(&self, records: &[MergedRecord]) -> Result<Vec<MergedRecord>> {
        let mut node_ids = Vec::new();
        let mut edge_keys = Vec::new();
        for record in records {
            match &record.key {
                MergeKey::Node { id } => node_ids.push(id.clone()),
                MergeKey::Edge {
                    start_id,
                    end_id,
                    label,
                    ..
                } => edge_keys.push((start_id.clone(), label.clone(), end_id.clone())),
            }
        }

        let mut acc = MergeAccumulator::new();
        for stored in self.db.get_nodes(&node_ids)? {
            acc.seed(decode(&stored.body)?);
        }
        let mut stored_edges: HashMap<(String, String, String), MergedRecord> = HashMap::new();
        for stored in self.db.get_edges(&edge_keys)? {
            stored_edges.insert(stored.key(), decode(&stored.body)?);
        }
        // A stored edge's endpoint labels may differ from the incoming
        // group; key it by the incoming record so the merge lines up.
        for record in records {
            if let MergeKey::Edge { start_id, end_id, label, .. } = &record.key {
                let key = (start_id.clone(), label.clone(), end_id.clone());
                if let Some(mut existing) = stored_edges.remove(&key) {
                    existing.key = record.key.clone();
                    acc.seed(existing);
                }
            }
        }

        for record in records {
            self.merger.merge_merged(&mut acc, record)?;
        }

        let touched: HashSet<&MergeKey> = records.iter().map(|r| &r.key).collect();
        Ok(acc
            .into_records()
            .into_iter()
            .filter(|r| touched.contains(&r.key))
            .collect())
    }

    /// Deletes edges whose start or end node is not stored. Endpoints are
    /// checked a page of edges at a time.
    pub fn sweep_dangling_edges(&self) -> Result<usize> {
        let mut removed = 0;
        let mut after = 0i64;
        loop {
            let page = self.db.edge_keys_after(after, SWEEP_PAGE_SIZE)?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.0;

            let mut endpoints: Vec<String> = page
                .iter()
                .flat_map(|(_, start, _, end)| [start.clone(), end.clone()])
                .collect();
            endpoints.sort();
            endpoints.dedup();
            let existing = self.db.existing_node_ids(&endpoints)?;

            let dangling: Vec<(String, String, String)> = page
                .into_iter()
                .filter(|(_, start, _, end)| !existing.contains(start) || !existing.contains(end))
                .map(|(_, start, label, end)| (start, label, end))
                .collect();
            if !dangling.is_empty() {
                removed += self.db.delete_edges(&dangling)?;
            }
        }
        if removed > 0 {
            warn!(adapter = %self.name, removed, "deleted dangling edges");
        }
        Ok(removed)
    }
}

fn decode(body: &str) -> Result<MergedRecord> {
    serde_json::from_str(body).map_err(|e| KgError::Database {
        message: format!("failed to decode stored record: {e}"),
        operation: "decode".to_string(),
    })
}

impl OutputAdapter for SqliteOutputAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&mut self, records: &[MergedRecord]) -> Result<WriteSummary> {
        let merged = self.remerge(records)?;

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for record in &merged {
            let body = serde_json::to_string(record)?;
            match &record.key {
                MergeKey::Node { id } => nodes.push(StoredNode {
                    id: id.clone(),
                    labels: record.labels.clone(),
                    body,
                }),
                MergeKey::Edge {
                    start_id,
                    end_id,
                    label,
                    ..
                } => edges.push(StoredEdge {
                    start_id: start_id.clone(),
                    label: label.clone(),
                    end_id: end_id.clone(),
                    body,
                }),
            }
        }

        let mut summary = WriteSummary {
            nodes: nodes.len(),
            edges: edges.len(),
            writes: 0,
        };
        if !nodes.is_empty() {
            self.db.upsert_nodes(&nodes)?;
            summary.writes += 1;
        }
        if !edges.is_empty() {
            self.db.upsert_edges(&edges)?;
            summary.writes += 1;
        }
        info!(
            adapter = %self.name,
            nodes = summary.nodes,
            edges = summary.edges,
            "stored batch"
        );
        Ok(summary)
    }

    fn create_or_truncate_datastore(&mut self) -> Result<()> {
        self.db.ensure_store_schema()?;
        self.db.truncate_store()?;
        info!(adapter = %self.name, "truncated document store");
        Ok(())
    }

    fn do_post_processing(&mut self) -> Result<()> {
        if self.sweep_dangling_edges {
            self.sweep_dangling_edges()?;
        }
        Ok(())
    }
}
