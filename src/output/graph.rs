use std::collections::HashSet;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::cypher;
use super::store::GraphStore;
use super::{group_by_label, OutputAdapter, WriteSummary};
use crate::errors::{KgError, Result};
use crate::merge::{LabelGroup, MergedRecord};
use crate::types::FieldConflictBehavior;

/// Writes merged batches to a Cypher graph store.
///
/// Each label group becomes one generated upsert per field-shape layout,
/// sent in chunks of `write_batch_size` records. Every chunk is first checked
/// against the shapes already stored. An `id` index is created the first
/// time a label is written.
pub struct GraphOutputAdapter<S: GraphStore> {
    name: String,
    store: S,
    behavior: FieldConflictBehavior,
    write_batch_size: usize,
    post_processing: Vec<String>,
    indexed: HashSet<(String, String)>,
}

impl<S: GraphStore> GraphOutputAdapter<S> {
    pub fn new(
        name: impl Into<String>,
        store: S,
        behavior: FieldConflictBehavior,
        write_batch_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            behavior,
            write_batch_size: write_batch_size.max(1),
            post_processing: Vec::new(),
            indexed: HashSet::new(),
        }
    }

    pub fn with_post_processing(mut self, statements: Vec<String>) -> Self {
        self.post_processing = statements;
        self
    }

    pub fn store_ref(&self) -> &S {
        &self.store
    }

    /// Creates the index for a label/field pair unless this adapter already
    /// did. Returns `true` if a statement was issued.
    pub fn ensure_index(&mut self, label: &str, field: &str) -> Result<bool> {
        let key = (label.to_string(), field.to_string());
        if self.indexed.contains(&key) {
            return Ok(false);
        }
        self.store
            .execute(&cypher::create_index_statement(label, field), json!({}))?;
        self.indexed.insert(key);
        Ok(true)
    }

    fn write_group(&mut self, group: &LabelGroup, records: &[MergedRecord]) -> Result<usize> {
        let labels: Vec<String> = match group {
            LabelGroup::Node { labels } => labels.clone(),
            LabelGroup::Edge {
                start_labels,
                end_labels,
                ..
            } => start_labels.iter().chain(end_labels).cloned().collect(),
        };
        for label in &labels {
            self.ensure_index(label, "id")?;
        }

        let mut writes = 0;
        for (shapes, members) in cypher::shape_groups(records) {
            let statement = cypher::upsert_statement(group, &shapes, self.behavior);
            let check = cypher::shape_check_statement(group, &shapes);
            for chunk in members.chunks(self.write_batch_size) {
                let rows: Vec<Value> = chunk
                    .iter()
                    .map(|r| Value::Object(r.to_flat_map()))
                    .collect();
                let parameters = json!({ "records": rows });
                if let Some(check) = &check {
                    let conflicts = self.store.execute(check, parameters.clone())?;
                    if let Some(first) = conflicts.first() {
                        return Err(stored_shape_conflict(first, &shapes, conflicts.len()));
                    }
                }
                self.store.execute(&statement, parameters)?;
                writes += 1;
            }
        }
        Ok(writes)
    }

    /// Runs a counting delete statement until it reports nothing deleted.
    fn delete_in_batches(&mut self, statement: &str) -> Result<u64> {
        let mut total = 0;
        loop {
            let rows = self.store.execute(statement, json!({}))?;
            let deleted = rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if deleted == 0 {
                return Ok(total);
            }
            total += deleted;
        }
    }
}

/// Builds the error for a `[key, field, stored type]` row of a shape check.
fn stored_shape_conflict(row: &Value, shapes: &cypher::FieldShapes, total: usize) -> KgError {
    let text = |i: usize| row.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
    let field = text(1);
    if total > 1 {
        warn!(conflicts = total, "stored field shapes differ from incoming records");
    }
    KgError::SchemaConflict {
        key: text(0),
        incoming: shapes
            .get(&field)
            .map(|shape| shape.as_str().to_string())
            .unwrap_or_default(),
        existing: text(2),
        field,
    }
}

impl<S: GraphStore> OutputAdapter for GraphOutputAdapter<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&mut self, records: &[MergedRecord]) -> Result<WriteSummary> {
        let start = Instant::now();
        let mut summary = WriteSummary::default();
        for (group, members) in group_by_label(records) {
            summary.writes += self.write_group(&group, &members)?;
            match group {
                LabelGroup::Node { .. } => summary.nodes += members.len(),
                LabelGroup::Edge { .. } => summary.edges += members.len(),
            }
        }
        info!(
            adapter = %self.name,
            nodes = summary.nodes,
            edges = summary.edges,
            statements = summary.writes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "stored batch"
        );
        Ok(summary)
    }

    fn create_or_truncate_datastore(&mut self) -> Result<()> {
        let edges = self.delete_in_batches(&cypher::delete_relationships_statement())?;
        let nodes = self.delete_in_batches(&cypher::delete_nodes_statement())?;
        self.indexed.clear();
        info!(adapter = %self.name, nodes, edges, "truncated graph store");
        Ok(())
    }

    fn do_post_processing(&mut self) -> Result<()> {
        let statements = self.post_processing.clone();
        for statement in &statements {
            self.store.execute(statement, json!({}))?;
        }
        if !statements.is_empty() {
            info!(adapter = %self.name, statements = statements.len(), "post-processing done");
        }
        Ok(())
    }
}
