/// Graph output adapters.
///
/// Merged batches are grouped by label set and persisted with idempotent
/// upserts that re-merge against what a store already holds.
pub mod cypher;
mod graph;
mod sqlite;
mod store;

use std::collections::BTreeMap;

use crate::errors::Result;
use crate::merge::{LabelGroup, MergedRecord};

pub use graph::GraphOutputAdapter;
pub use sqlite::SqliteOutputAdapter;
pub use store::{basic_auth, commit_endpoint, parse_commit_response, GraphStore, Neo4jHttpStore};

/// Counts for one `store` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes: usize,
    pub edges: usize,
    /// Upsert statements or table writes issued.
    pub writes: usize,
}

impl WriteSummary {
    pub fn absorb(&mut self, other: &WriteSummary) {
        self.nodes += other.nodes;
        self.edges += other.edges;
        self.writes += other.writes;
    }
}

/// A destination for merged batches.
pub trait OutputAdapter {
    fn name(&self) -> &str;

    /// Persists one merged batch.
    fn store(&mut self, records: &[MergedRecord]) -> Result<WriteSummary>;

    /// Empties the destination, creating it if needed.
    fn create_or_truncate_datastore(&mut self) -> Result<()>;

    /// Runs once after every batch of a run has been stored.
    fn do_post_processing(&mut self) -> Result<()>;
}

/// Groups records by label set. Node groups come before edge groups so
/// endpoints exist before relationships are written; within each kind,
/// groups are ordered by label and records keep their batch order.
pub fn group_by_label(records: &[MergedRecord]) -> Vec<(LabelGroup, Vec<MergedRecord>)> {
    let mut groups: BTreeMap<LabelGroup, Vec<MergedRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group()).or_default().push(record.clone());
    }
    // `LabelGroup::Node` sorts before `LabelGroup::Edge`.
    groups.into_iter().collect()
}
