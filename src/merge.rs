use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{KgError, Result};
use crate::types::{AttributeBag, FieldConflictBehavior, FieldValue, Record};

/// Placeholder written into update-log entries for an absent old value.
pub const NULL_VALUE: &str = "NULL";

// ---------------------------------------------------------------------------
// Keys and label groups
// ---------------------------------------------------------------------------

/// Identity of an accumulated record.
///
/// Nodes are keyed by canonical id. Edges are keyed by their endpoint ids
/// within one `(start labels, label, end labels)` group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeKey {
    Node {
        id: String,
    },
    Edge {
        start_id: String,
        end_id: String,
        label: String,
        start_labels: Vec<String>,
        end_labels: Vec<String>,
    },
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeKey::Node { id } => write!(f, "node {id}"),
            MergeKey::Edge {
                start_id,
                end_id,
                label,
                ..
            } => write!(f, "edge {start_id}-[{label}]->{end_id}"),
        }
    }
}

/// Records sharing a label group are written by one upsert statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelGroup {
    Node {
        labels: Vec<String>,
    },
    Edge {
        start_labels: Vec<String>,
        label: String,
        end_labels: Vec<String>,
    },
}

fn sorted(labels: &[String]) -> Vec<String> {
    let mut labels = labels.to_vec();
    labels.sort();
    labels.dedup();
    labels
}

// ---------------------------------------------------------------------------
// Merged records
// ---------------------------------------------------------------------------

/// The accumulated state of one canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub key: MergeKey,
    /// Node labels; empty for edges.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub fields: AttributeBag,
    #[serde(default)]
    pub xref: Vec<String>,
    /// Provenance of the first contributing record.
    #[serde(default)]
    pub creation: Option<String>,
    /// Append-only log of `field\told\tnew\tprovenance[\tpolicy]` lines.
    #[serde(default)]
    pub updates: Vec<String>,
    /// Every `entity_resolution` stamp that contributed, de-duplicated.
    #[serde(default)]
    pub resolved_ids: Vec<String>,
    /// Provenance of the record that supplied each scalar field's current
    /// value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_sources: BTreeMap<String, String>,
}

impl MergedRecord {
    pub fn group(&self) -> LabelGroup {
        match &self.key {
            MergeKey::Node { .. } => LabelGroup::Node {
                labels: sorted(&self.labels),
            },
            MergeKey::Edge {
                label,
                start_labels,
                end_labels,
                ..
            } => LabelGroup::Edge {
                start_labels: sorted(start_labels),
                label: label.clone(),
                end_labels: sorted(end_labels),
            },
        }
    }

    /// Flattens the record into the map a graph store receives: identity
    /// keys, reserved bookkeeping keys, then attributes.
    pub fn to_flat_map(&self) -> serde_json::Map<String, serde_json::Value> {
        use serde_json::Value;

        let mut map = serde_json::Map::new();
        match &self.key {
            MergeKey::Node { id } => {
                map.insert("id".to_string(), Value::String(id.clone()));
            }
            MergeKey::Edge {
                start_id, end_id, ..
            } => {
                map.insert("start_id".to_string(), Value::String(start_id.clone()));
                map.insert("end_id".to_string(), Value::String(end_id.clone()));
            }
        }
        if !self.xref.is_empty() {
            map.insert("xref".to_string(), Value::from(self.xref.clone()));
        }
        if let Some(creation) = &self.creation {
            map.insert("creation".to_string(), Value::String(creation.clone()));
        }
        map.insert("updates".to_string(), Value::from(self.updates.clone()));
        map.insert(
            "resolved_ids".to_string(),
            Value::from(self.resolved_ids.clone()),
        );
        if !self.field_sources.is_empty() {
            let sources = self
                .field_sources
                .iter()
                .map(|(name, source)| (name.clone(), Value::String(source.clone())))
                .collect();
            map.insert("field_sources".to_string(), Value::Object(sources));
        }
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_property());
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Insertion-ordered map from merge key to accumulated record.
///
/// Lives for one merge pass. It may be seeded with persisted records so
/// that a batch re-merges against what is already stored.
#[derive(Debug, Default)]
pub struct MergeAccumulator {
    records: Vec<MergedRecord>,
    index: HashMap<MergeKey, usize>,
}

impl MergeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an already-merged record, replacing any record with the same key.
    pub fn seed(&mut self, record: MergedRecord) {
        match self.index.get(&record.key) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.index.insert(record.key.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, key: &MergeKey) -> Option<&MergedRecord> {
        self.index.get(key).map(|&pos| &self.records[pos])
    }

    fn get_mut(&mut self, key: &MergeKey) -> Option<&mut MergedRecord> {
        match self.index.get(key) {
            Some(&pos) => self.records.get_mut(pos),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MergedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MergedRecord> {
        self.records
    }
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// A record flattened into the parts the merger folds.
struct Incoming<'a> {
    key: MergeKey,
    labels: &'a [String],
    fields: &'a AttributeBag,
    xref: &'a [String],
    provenance: Option<&'a str>,
    stamps: Vec<&'a str>,
    updates: &'a [String],
    /// Set for already-merged records.
    field_sources: Option<&'a BTreeMap<String, String>>,
}

impl<'a> Incoming<'a> {
    fn from_record(record: &'a Record) -> Self {
        match record {
            Record::Node(node) => Incoming {
                key: MergeKey::Node {
                    id: node.id.clone(),
                },
                labels: &node.labels,
                fields: &node.attributes,
                xref: &node.xref,
                provenance: node.provenance.as_deref(),
                stamps: node.entity_resolution.as_deref().into_iter().collect(),
                updates: &[],
                field_sources: None,
            },
            Record::Relationship(rel) => Incoming {
                key: MergeKey::Edge {
                    start_id: rel.start.id.clone(),
                    end_id: rel.end.id.clone(),
                    label: rel.label.clone(),
                    start_labels: sorted(&rel.start.labels),
                    end_labels: sorted(&rel.end.labels),
                },
                labels: &[],
                fields: &rel.attributes,
                xref: &[],
                provenance: rel.provenance.as_deref(),
                stamps: rel.entity_resolution.as_deref().into_iter().collect(),
                updates: &[],
                field_sources: None,
            },
        }
    }

    fn from_merged(record: &'a MergedRecord) -> Self {
        Incoming {
            key: record.key.clone(),
            labels: &record.labels,
            fields: &record.fields,
            xref: &record.xref,
            provenance: record.creation.as_deref(),
            stamps: record.resolved_ids.iter().map(String::as_str).collect(),
            updates: &record.updates,
            field_sources: Some(&record.field_sources),
        }
    }

    /// Provenance credited for a change to `field`.
    fn source_of(&self, field: &str) -> &'a str {
        self.field_sources
            .and_then(|sources| sources.get(field))
            .map(String::as_str)
            .or(self.provenance)
            .unwrap_or_default()
    }
}

/// Folds records into one accumulated record per canonical key.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMerger {
    behavior: FieldConflictBehavior,
}

impl RecordMerger {
    pub fn new(behavior: FieldConflictBehavior) -> Self {
        Self { behavior }
    }

    pub fn behavior(&self) -> FieldConflictBehavior {
        self.behavior
    }

    /// Merges a batch into a fresh accumulator and returns the merged
    /// records in first-seen order.
    pub fn merge_batch(&self, records: &[Record]) -> Result<Vec<MergedRecord>> {
        let mut acc = MergeAccumulator::new();
        self.merge_into(&mut acc, records)?;
        Ok(acc.into_records())
    }

    pub fn merge_into(&self, acc: &mut MergeAccumulator, records: &[Record]) -> Result<()> {
        for record in records {
            self.merge_record(acc, record)?;
        }
        Ok(())
    }

    /// Folds one record into the accumulator.
    ///
    /// A record whose `entity_resolution` stamp is already recorded is a
    /// no-op.
    pub fn merge_record(&self, acc: &mut MergeAccumulator, record: &Record) -> Result<()> {
        self.merge_incoming(acc, Incoming::from_record(record))
    }

    /// Folds an already-merged record, e.g. a freshly merged batch record
    /// into one loaded from storage.
    ///
    /// A record whose stamps are all known is a no-op. Log entries the
    /// accumulated record already holds are not carried again, scalar
    /// changes are credited to the source that supplied the incoming value,
    /// and collection unions are not logged a second time.
    pub fn merge_merged(&self, acc: &mut MergeAccumulator, record: &MergedRecord) -> Result<()> {
        self.merge_incoming(acc, Incoming::from_merged(record))
    }

    fn merge_incoming(&self, acc: &mut MergeAccumulator, incoming: Incoming<'_>) -> Result<()> {
        let Some(existing) = acc.get_mut(&incoming.key) else {
            acc.seed(self.first_occurrence(&incoming));
            return Ok(());
        };

        if !incoming.stamps.is_empty()
            && incoming
                .stamps
                .iter()
                .all(|stamp| existing.resolved_ids.iter().any(|r| r == stamp))
        {
            debug!(key = %incoming.key, "record already merged, skipping");
            return Ok(());
        }

        self.fold(existing, &incoming)
    }

    fn first_occurrence(&self, incoming: &Incoming<'_>) -> MergedRecord {
        let mut fields = AttributeBag::new();
        for (name, value) in incoming.fields {
            if value.is_empty() {
                continue;
            }
            let mut value = value.clone();
            value.dedup();
            fields.insert(name.clone(), value);
        }

        let mut xref = Vec::new();
        for x in incoming.xref {
            if !xref.contains(x) {
                xref.push(x.clone());
            }
        }

        let mut resolved_ids: Vec<String> = Vec::new();
        for stamp in &incoming.stamps {
            if !resolved_ids.iter().any(|r| r == stamp) {
                resolved_ids.push(stamp.to_string());
            }
        }

        let field_sources = match incoming.field_sources {
            Some(sources) => sources.clone(),
            None => fields
                .iter()
                .filter(|(_, value)| !value.shape().is_collection())
                .filter_map(|(name, _)| Some((name.clone(), incoming.provenance?.to_string())))
                .collect(),
        };

        MergedRecord {
            key: incoming.key.clone(),
            labels: incoming.labels.to_vec(),
            fields,
            xref,
            creation: incoming.provenance.map(str::to_string),
            updates: incoming.updates.to_vec(),
            resolved_ids,
            field_sources,
        }
    }

    fn fold(&self, existing: &mut MergedRecord, incoming: &Incoming<'_>) -> Result<()> {
        // Shape check first so a conflict leaves the record untouched.
        for (name, value) in incoming.fields {
            if let Some(current) = existing.fields.get(name) {
                if !value.is_empty() && current.shape() != value.shape() {
                    return Err(KgError::SchemaConflict {
                        key: existing.key.to_string(),
                        field: name.clone(),
                        existing: current.shape().as_str().to_string(),
                        incoming: value.shape().as_str().to_string(),
                    });
                }
            }
        }

        for stamp in &incoming.stamps {
            if !existing.resolved_ids.iter().any(|r| r == stamp) {
                existing.resolved_ids.push(stamp.to_string());
            }
        }
        let pre_merged = incoming.field_sources.is_some();
        for entry in incoming.updates {
            if !existing.updates.contains(entry) {
                existing.updates.push(entry.clone());
            }
        }
        for label in incoming.labels {
            if !existing.labels.contains(label) {
                existing.labels.push(label.clone());
            }
        }
        if existing.xref.is_empty() && !incoming.xref.is_empty() {
            for x in incoming.xref {
                if !existing.xref.contains(x) {
                    existing.xref.push(x.clone());
                }
            }
        }
        if existing.creation.is_none() {
            existing.creation = incoming.provenance.map(str::to_string);
        }

        let policy = self.behavior.as_str();

        for (name, value) in incoming.fields {
            if value.is_empty() {
                continue;
            }
            let mut value = value.clone();
            value.dedup();
            let source = incoming.source_of(name);

            match existing.fields.get_mut(name) {
                None => {
                    let entry = match &value {
                        FieldValue::Scalar(s) => {
                            existing.field_sources.insert(name.clone(), source.to_string());
                            Some(format!("{name}\t{NULL_VALUE}\t{s}\t{source}\t{policy}"))
                        }
                        _ if pre_merged => None,
                        collection => Some(format!(
                            "{name}\t{NULL_VALUE}\t{} entries being merged\t{source}",
                            collection.len()
                        )),
                    };
                    existing.fields.insert(name.clone(), value);
                    if let Some(entry) = entry {
                        log_change(&mut existing.updates, entry, pre_merged);
                    }
                }
                Some(current) if !current.shape().is_collection() => {
                    if *current != value {
                        let entry = format!(
                            "{name}\t{}\t{}\t{source}\t{policy}",
                            scalar_text(current),
                            scalar_text(&value)
                        );
                        if self.behavior == FieldConflictBehavior::KeepLast {
                            *current = value;
                            existing.field_sources.insert(name.clone(), source.to_string());
                        }
                        log_change(&mut existing.updates, entry, pre_merged);
                    }
                }
                Some(current) => {
                    if !pre_merged {
                        existing.updates.push(format!(
                            "{name}\t{} entries already there\t{} entries being merged\t{source}",
                            current.len(),
                            value.len()
                        ));
                    }
                    current.union_with(&value);
                }
            }
        }
        Ok(())
    }
}

/// Appends a log entry. For already-merged input an entry that is already
/// logged describes the same change and is dropped.
fn log_change(updates: &mut Vec<String>, entry: String, pre_merged: bool) {
    if pre_merged && updates.contains(&entry) {
        return;
    }
    updates.push(entry);
}

fn scalar_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Scalar(s) => s.to_string(),
        other => format!("{} entries", other.len()),
    }
}
