use std::collections::HashMap;

use tracing::{debug, info};

use crate::errors::Result;
use crate::resolution::{resolve_id_map, resolve_nodes, ResolutionStats, ResolverRegistry};
use crate::types::{Node, Provenance, Record, Relationship};

/// Counters for everything an orchestrator has processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub resolution: ResolutionStats,
    pub nodes_in: usize,
    pub nodes_out: usize,
    pub relationships_in: usize,
    pub relationships_out: usize,
    /// Relationships dropped because an endpoint resolved to nothing.
    pub relationships_dropped: usize,
}

/// Turns raw source batches into resolved, stamped batches.
///
/// Borrows the resolver registry so resolver caches outlive any single
/// orchestrator.
pub struct Orchestrator<'a> {
    registry: &'a mut ResolverRegistry,
    provenance: String,
    source: String,
    adapter: String,
    batch_size: usize,
    stats: OrchestratorStats,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        registry: &'a mut ResolverRegistry,
        provenance: &Provenance,
        adapter: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            provenance: provenance.to_string(),
            source: provenance.source.clone(),
            adapter: adapter.into(),
            batch_size: batch_size.max(1),
            stats: OrchestratorStats::default(),
        }
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    /// Resolves one source batch and returns it as output batches of at
    /// most `batch_size` records, nodes first.
    pub fn process(&mut self, records: Vec<Record>) -> Result<Vec<Vec<Record>>> {
        let mut nodes = Vec::new();
        let mut relationships = Vec::new();
        for record in records {
            match record {
                Record::Node(mut node) => {
                    node.provenance = Some(self.provenance.clone());
                    nodes.push(node);
                }
                Record::Relationship(mut rel) => {
                    rel.provenance = Some(self.provenance.clone());
                    relationships.push(rel);
                }
            }
        }

        let mut output: Vec<Record> = Vec::with_capacity(nodes.len() + relationships.len());
        output.extend(self.process_nodes(nodes)?.into_iter().map(Record::Node));
        output.extend(
            self.process_relationships(relationships)?
                .into_iter()
                .map(Record::Relationship),
        );

        info!(
            adapter = %self.adapter,
            records = output.len(),
            updated = self.stats.resolution.updated,
            validated = self.stats.resolution.validated,
            newborn = self.stats.resolution.newborn,
            unmatched = self.stats.resolution.unmatched,
            "orchestrated batch"
        );

        let mut batches = Vec::new();
        let mut iter = output.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(self.batch_size).collect());
        }
        Ok(batches)
    }

    fn node_stamp(&self, original_id: &str) -> String {
        format!("{}\t{}\t{}", self.source, self.adapter, original_id)
    }

    fn relationship_stamp(&self, start_id: &str, end_id: &str) -> String {
        format!("{}\t{}\t{}\t{}", self.source, self.adapter, start_id, end_id)
    }

    /// Resolves nodes per type. Types without a resolver pass through.
    pub fn process_nodes(&mut self, nodes: Vec<Node>) -> Result<Vec<Node>> {
        self.stats.nodes_in += nodes.len();

        let mut kinds: Vec<String> = Vec::new();
        let mut by_kind: HashMap<String, Vec<Node>> = HashMap::new();
        for node in nodes {
            if !by_kind.contains_key(&node.kind) {
                kinds.push(node.kind.clone());
            }
            by_kind.entry(node.kind.clone()).or_default().push(node);
        }

        let mut output = Vec::new();
        for kind in kinds {
            let group = by_kind.remove(&kind).unwrap_or_default();
            match self.registry.get_mut(&kind) {
                Some(entry) => {
                    let settings = entry.settings;
                    let mut stats = ResolutionStats::default();
                    let resolved =
                        resolve_nodes(entry.resolver.as_mut(), &settings, &kind, group, &mut stats)?;
                    self.stats.resolution.absorb(&stats);
                    for resolved_node in resolved {
                        let mut node = resolved_node.node;
                        let original = resolved_node.original_id.unwrap_or_else(|| node.id.clone());
                        node.entity_resolution = Some(self.node_stamp(&original));
                        output.push(node);
                    }
                }
                None => {
                    debug!(kind = %kind, count = group.len(), "no resolver, passing through");
                    for mut node in group {
                        node.entity_resolution = Some(self.node_stamp(&node.id));
                        output.push(node);
                    }
                }
            }
        }

        self.stats.nodes_out += output.len();
        Ok(output)
    }

    /// Resolves relationship endpoints and expands each relationship into
    /// the cross product of its resolved start and end ids.
    pub fn process_relationships(
        &mut self,
        relationships: Vec<Relationship>,
    ) -> Result<Vec<Relationship>> {
        self.stats.relationships_in += relationships.len();

        let mut ids_by_kind: HashMap<String, Vec<String>> = HashMap::new();
        for rel in &relationships {
            for endpoint in [&rel.start, &rel.end] {
                if self.registry.contains(&endpoint.kind) {
                    ids_by_kind
                        .entry(endpoint.kind.clone())
                        .or_default()
                        .push(endpoint.id.clone());
                }
            }
        }

        let mut kinds: Vec<&String> = ids_by_kind.keys().collect();
        kinds.sort();
        let mut id_maps: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        for kind in kinds {
            let Some(entry) = self.registry.get_mut(kind) else {
                continue;
            };
            let settings = entry.settings;
            let mut stats = ResolutionStats::default();
            let map = resolve_id_map(
                entry.resolver.as_mut(),
                &settings,
                kind,
                &ids_by_kind[kind],
                &mut stats,
            )?;
            self.stats.resolution.absorb(&stats);
            id_maps.insert(kind.clone(), map);
        }

        let mut output = Vec::new();
        for rel in relationships {
            let starts = endpoint_ids(&id_maps, &rel.start.kind, &rel.start.id);
            let ends = endpoint_ids(&id_maps, &rel.end.kind, &rel.end.id);
            if starts.is_empty() || ends.is_empty() {
                self.stats.relationships_dropped += 1;
                debug!(
                    start = %rel.start.id,
                    end = %rel.end.id,
                    label = %rel.label,
                    "dropping relationship with unresolved endpoint"
                );
                continue;
            }
            let stamp = self.relationship_stamp(&rel.start.id, &rel.end.id);
            for start in &starts {
                for end in &ends {
                    let mut expanded = rel.with_endpoint_ids(start, end);
                    expanded.entity_resolution = Some(stamp.clone());
                    output.push(expanded);
                }
            }
        }

        self.stats.relationships_out += output.len();
        Ok(output)
    }
}

/// Canonical ids for one endpoint; unconfigured types map to themselves.
fn endpoint_ids(
    id_maps: &HashMap<String, HashMap<String, Vec<String>>>,
    kind: &str,
    id: &str,
) -> Vec<String> {
    match id_maps.get(kind) {
        Some(map) => map.get(id).cloned().unwrap_or_default(),
        None => vec![id.to_string()],
    }
}
