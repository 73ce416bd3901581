use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{KgError, Result};
use crate::types::{is_reserved_key, AttributeBag, Endpoint, FieldValue, Node, Record, Relationship};

/// A source of raw record batches.
pub trait InputAdapter {
    /// Adapter name, stamped into `entity_resolution`.
    fn name(&self) -> &str;

    /// Returns the next batch of at most `batch_size` records, or `None`
    /// when the source is exhausted.
    fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Record>>>;
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    id: String,
    kind: String,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum RawRecord {
    Node {
        id: String,
        kind: String,
        #[serde(default)]
        labels: Vec<String>,
        #[serde(default)]
        xref: Vec<String>,
        #[serde(default)]
        attributes: Map<String, Value>,
    },
    Relationship {
        start: RawEndpoint,
        end: RawEndpoint,
        label: String,
        #[serde(default)]
        attributes: Map<String, Value>,
    },
}

/// Reads one record per line:
///
/// ```text
/// {"record":"node","id":"P1","kind":"Protein","attributes":{"name":"x","tags":["a"]}}
/// {"record":"relationship","start":{"id":"P1","kind":"Protein"},"label":"binds","end":{"id":"P2","kind":"Protein"}}
/// ```
///
/// Attribute shapes are fixed here: scalars, lists of scalars (string
/// lists) or lists of objects (struct lists). Blank lines are skipped.
pub struct JsonLinesInput {
    name: String,
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl JsonLinesInput {
    pub fn open(name: impl Into<String>, path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| KgError::File {
            message: format!("failed to open input: {e}"),
            path: path.display().to_string(),
        })?;
        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    fn parse_error(&self, message: String) -> KgError {
        KgError::Parse {
            message,
            path: self.path.display().to_string(),
            line: Some(self.line_number),
        }
    }

    fn parse_line(&self, line: &str) -> Result<Record> {
        let raw: RawRecord =
            serde_json::from_str(line).map_err(|e| self.parse_error(format!("invalid record: {e}")))?;
        match raw {
            RawRecord::Node {
                id,
                kind,
                labels,
                xref,
                attributes,
            } => {
                let mut node = Node::new(id, kind).with_labels(labels);
                node.xref = xref;
                node.attributes = self.attributes(attributes)?;
                Ok(Record::Node(node))
            }
            RawRecord::Relationship {
                start,
                end,
                label,
                attributes,
            } => {
                let mut rel = Relationship::new(endpoint(start), label, endpoint(end));
                rel.attributes = self.attributes(attributes)?;
                Ok(Record::Relationship(rel))
            }
        }
    }

    fn attributes(&self, raw: Map<String, Value>) -> Result<AttributeBag> {
        let mut bag = AttributeBag::new();
        for (key, value) in raw {
            if is_reserved_key(&key) {
                return Err(self.parse_error(format!("attribute '{key}' uses a reserved name")));
            }
            let parsed = FieldValue::from_json(&value)
                .map_err(|e| self.parse_error(format!("attribute '{key}': {e}")))?;
            if let Some(value) = parsed {
                bag.insert(key, value);
            }
        }
        Ok(bag)
    }
}

fn endpoint(raw: RawEndpoint) -> Endpoint {
    let mut endpoint = Endpoint::new(raw.id, raw.kind);
    for label in raw.labels {
        if !endpoint.labels.contains(&label) {
            endpoint.labels.push(label);
        }
    }
    endpoint
}

impl InputAdapter for JsonLinesInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Record>>> {
        let mut batch = Vec::new();
        while batch.len() < batch_size.max(1) {
            let Some(line) = self.lines.next() else {
                break;
            };
            self.line_number += 1;
            let line = line.map_err(|e| self.parse_error(format!("failed to read line: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            batch.push(self.parse_line(&line)?);
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Serves records already in memory.
pub struct RecordsInput {
    name: String,
    records: VecDeque<Record>,
}

impl RecordsInput {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records: records.into(),
        }
    }
}

impl InputAdapter for RecordsInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Record>>> {
        if self.records.is_empty() {
            return Ok(None);
        }
        let take = batch_size.max(1).min(self.records.len());
        Ok(Some(self.records.drain(..take).collect()))
    }
}
