use std::path::Path;
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::{EtlConfig, OutputConfig};
use crate::errors::Result;
use crate::input::{InputAdapter, JsonLinesInput};
use crate::merge::RecordMerger;
use crate::orchestrator::{Orchestrator, OrchestratorStats};
use crate::output::{GraphOutputAdapter, Neo4jHttpStore, OutputAdapter, SqliteOutputAdapter, WriteSummary};
use crate::resolution::ResolverRegistry;
use crate::types::Provenance;

/// Totals for one ETL run.
#[derive(Debug, Clone, Default)]
pub struct EtlSummary {
    pub records_read: usize,
    pub batches_written: usize,
    pub records_merged: usize,
    pub orchestration: OrchestratorStats,
    pub writes: WriteSummary,
    pub elapsed: Duration,
}

/// Drives records from every input through resolution and merging into
/// every output.
pub struct Etl {
    registry: ResolverRegistry,
    inputs: Vec<Box<dyn InputAdapter>>,
    outputs: Vec<Box<dyn OutputAdapter>>,
    provenance: Provenance,
    batch_size: usize,
    merger: RecordMerger,
}

impl Etl {
    pub fn new(registry: ResolverRegistry, provenance: Provenance, merger: RecordMerger, batch_size: usize) -> Self {
        Self {
            registry,
            inputs: Vec::new(),
            outputs: Vec::new(),
            provenance,
            batch_size: batch_size.max(1),
            merger,
        }
    }

    /// Wires resolvers, inputs, and outputs from a configuration.
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        let registry = ResolverRegistry::from_config(config)?;
        let merger = RecordMerger::new(config.field_conflict_behavior);
        let mut etl = Self::new(registry, config.source.clone(), merger, config.batch_size);

        for input in &config.inputs {
            etl.add_input(Box::new(JsonLinesInput::open(&input.name, Path::new(&input.path))?));
        }

        for (i, output) in config.outputs.iter().enumerate() {
            match output {
                OutputConfig::Neo4j {
                    url,
                    database,
                    user,
                    password,
                    post_processing,
                } => {
                    let store =
                        Neo4jHttpStore::new(url, database, user.as_deref(), password.as_deref());
                    etl.add_output(Box::new(
                        GraphOutputAdapter::new(
                            format!("neo4j[{i}]"),
                            store,
                            config.field_conflict_behavior,
                            config.write_batch_size,
                        )
                        .with_post_processing(post_processing.clone()),
                    ));
                }
                OutputConfig::Sqlite {
                    path,
                    sweep_dangling_edges,
                } => {
                    etl.add_output(Box::new(SqliteOutputAdapter::open(
                        format!("sqlite[{i}]"),
                        Path::new(path),
                        config.field_conflict_behavior,
                        *sweep_dangling_edges,
                    )?));
                }
            }
        }
        Ok(etl)
    }

    pub fn add_input(&mut self, input: Box<dyn InputAdapter>) {
        self.inputs.push(input);
    }

    pub fn add_output(&mut self, output: Box<dyn OutputAdapter>) {
        self.outputs.push(output);
    }

    pub fn registry_mut(&mut self) -> &mut ResolverRegistry {
        &mut self.registry
    }

    /// Empties every output.
    pub fn truncate_outputs(&mut self) -> Result<()> {
        for output in self.outputs.iter_mut() {
            output.create_or_truncate_datastore()?;
        }
        Ok(())
    }

    /// Runs every input to exhaustion, then post-processes each output.
    pub fn run(&mut self) -> Result<EtlSummary> {
        let start = Instant::now();
        let mut summary = EtlSummary::default();

        for input in self.inputs.iter_mut() {
            let adapter = input.name().to_string();
            info!(adapter = %adapter, "starting input");
            let mut orchestrator =
                Orchestrator::new(&mut self.registry, &self.provenance, &adapter, self.batch_size);

            while let Some(batch) = input.next_batch(self.batch_size)? {
                summary.records_read += batch.len();
                for resolved in orchestrator.process(batch)? {
                    let merged = self.merger.merge_batch(&resolved)?;
                    summary.records_merged += merged.len();
                    for output in self.outputs.iter_mut() {
                        let written = output.store(&merged)?;
                        summary.writes.absorb(&written);
                    }
                    summary.batches_written += 1;
                }
            }

            let stats = *orchestrator.stats();
            summary.orchestration.resolution.absorb(&stats.resolution);
            summary.orchestration.nodes_in += stats.nodes_in;
            summary.orchestration.nodes_out += stats.nodes_out;
            summary.orchestration.relationships_in += stats.relationships_in;
            summary.orchestration.relationships_out += stats.relationships_out;
            summary.orchestration.relationships_dropped += stats.relationships_dropped;
        }

        for output in self.outputs.iter_mut() {
            output.do_post_processing()?;
        }

        summary.elapsed = start.elapsed();
        info!(
            records_read = summary.records_read,
            records_merged = summary.records_merged,
            nodes_written = summary.writes.nodes,
            edges_written = summary.writes.edges,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "etl run complete"
        );
        Ok(summary)
    }
}
