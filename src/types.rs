use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Keys with fixed meaning in stored records; never treated as attributes.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "start_id",
    "end_id",
    "labels",
    "xref",
    "provenance",
    "creation",
    "updates",
    "resolved_ids",
    "field_sources",
    "entity_resolution",
];

/// Returns `true` if `key` is one of the reserved record keys.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// A single scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Returns `true` for the empty string; other scalars are never empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Scalar::Text(s) if s.is_empty())
    }

    /// Converts the scalar into its JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Boolean(b) => serde_json::Value::Bool(*b),
            Scalar::Integer(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Value::from(*f),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Boolean(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Scalar::Integer(i)),
                None => n.as_f64().map(Scalar::Float),
            },
            serde_json::Value::String(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Boolean(b) => write!(f, "{b}"),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Integer(i)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Boolean(b)
    }
}

/// One element of a struct-shaped collection field.
pub type StructElement = BTreeMap<String, Scalar>;

/// The shape of a field, fixed at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldShape {
    Scalar,
    StringList,
    StructList,
}

impl FieldShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldShape::Scalar => "scalar",
            FieldShape::StringList => "string list",
            FieldShape::StructList => "struct list",
        }
    }

    pub fn is_collection(&self) -> bool {
        !matches!(self, FieldShape::Scalar)
    }
}

/// An attribute value tagged with its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Scalar(Scalar),
    StringList(Vec<String>),
    StructList(Vec<StructElement>),
}

impl FieldValue {
    /// Convenience constructor for a text scalar.
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Scalar(Scalar::Text(s.into()))
    }

    /// Convenience constructor for a string list.
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::StringList(items.into_iter().map(Into::into).collect())
    }

    pub fn shape(&self) -> FieldShape {
        match self {
            FieldValue::Scalar(_) => FieldShape::Scalar,
            FieldValue::StringList(_) => FieldShape::StringList,
            FieldValue::StructList(_) => FieldShape::StructList,
        }
    }

    /// Empty strings and empty collections carry no information and are
    /// dropped before merging.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Scalar(s) => s.is_empty(),
            FieldValue::StringList(v) => v.is_empty(),
            FieldValue::StructList(v) => v.is_empty(),
        }
    }

    /// Number of elements; a scalar counts as one.
    pub fn len(&self) -> usize {
        match self {
            FieldValue::Scalar(_) => 1,
            FieldValue::StringList(v) => v.len(),
            FieldValue::StructList(v) => v.len(),
        }
    }

    /// Removes duplicate collection elements, keeping first occurrences.
    pub fn dedup(&mut self) {
        match self {
            FieldValue::Scalar(_) => {}
            FieldValue::StringList(v) => {
                let mut seen = HashSet::new();
                v.retain(|s| seen.insert(s.clone()));
            }
            FieldValue::StructList(v) => {
                let mut kept: Vec<StructElement> = Vec::with_capacity(v.len());
                for element in v.drain(..) {
                    if !kept.contains(&element) {
                        kept.push(element);
                    }
                }
                *v = kept;
            }
        }
    }

    /// Appends the elements of `other` that are not already present.
    ///
    /// Returns `false` without touching `self` when the shapes differ or
    /// either side is a scalar.
    pub fn union_with(&mut self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::StringList(mine), FieldValue::StringList(theirs)) => {
                let mut seen: HashSet<String> = mine.iter().cloned().collect();
                for s in theirs {
                    if seen.insert(s.clone()) {
                        mine.push(s.clone());
                    }
                }
                true
            }
            (FieldValue::StructList(mine), FieldValue::StructList(theirs)) => {
                for element in theirs {
                    if !mine.contains(element) {
                        mine.push(element.clone());
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Converts a JSON attribute into a tagged value.
    ///
    /// `null` and empty arrays yield `None`. Arrays of objects become struct
    /// lists; arrays of scalars become string lists of their textual form.
    pub fn from_json(value: &serde_json::Value) -> std::result::Result<Option<FieldValue>, String> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(_) => {
                Err("nested objects are only supported inside lists".to_string())
            }
            serde_json::Value::Array(items) => {
                let items: Vec<&serde_json::Value> =
                    items.iter().filter(|v| !v.is_null()).collect();
                if items.is_empty() {
                    return Ok(None);
                }
                if items.iter().all(|v| v.is_object()) {
                    let mut elements = Vec::with_capacity(items.len());
                    for item in items {
                        let mut element = StructElement::new();
                        if let Some(map) = item.as_object() {
                            for (k, v) in map {
                                if v.is_null() {
                                    continue;
                                }
                                let scalar = Scalar::from_json(v).ok_or_else(|| {
                                    format!("struct element field '{k}' must be a scalar")
                                })?;
                                element.insert(k.clone(), scalar);
                            }
                        }
                        elements.push(element);
                    }
                    return Ok(Some(FieldValue::StructList(elements)));
                }
                let mut strings = Vec::with_capacity(items.len());
                for item in items {
                    let scalar = Scalar::from_json(item)
                        .ok_or_else(|| "lists must hold only scalars or only objects".to_string())?;
                    strings.push(scalar.to_string());
                }
                Ok(Some(FieldValue::StringList(strings)))
            }
            other => Ok(Scalar::from_json(other).map(FieldValue::Scalar)),
        }
    }

    /// Converts the value into a property a graph store can hold. Struct
    /// elements are serialized as JSON strings.
    pub fn to_property(&self) -> serde_json::Value {
        match self {
            FieldValue::Scalar(s) => s.to_json(),
            FieldValue::StringList(v) => serde_json::Value::from(v.clone()),
            FieldValue::StructList(v) => serde_json::Value::Array(
                v.iter()
                    .map(|element| {
                        let obj: serde_json::Map<String, serde_json::Value> = element
                            .iter()
                            .map(|(k, s)| (k.clone(), s.to_json()))
                            .collect();
                        serde_json::Value::String(serde_json::Value::Object(obj).to_string())
                    })
                    .collect(),
            ),
        }
    }
}

/// Attribute bag keyed by field name, ordered for deterministic output.
pub type AttributeBag = BTreeMap<String, FieldValue>;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Source, version, and dates for a contributed value.
///
/// Serialized on the wire as `source\tversion\tversion_date\tdownload_date`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub version: String,
    pub version_date: String,
    pub download_date: String,
}

impl Provenance {
    pub fn new(
        source: impl Into<String>,
        version: impl Into<String>,
        version_date: impl Into<String>,
        download_date: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            version: version.into(),
            version_date: version_date.into(),
            download_date: download_date.into(),
        }
    }

    /// Parses the tab-separated wire form. Returns `None` unless there are
    /// exactly four fields.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('\t').collect();
        match parts.as_slice() {
            [source, version, version_date, download_date] => Some(Self::new(
                *source,
                *version,
                *version_date,
                *download_date,
            )),
            _ => None,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.source, self.version, self.version_date, self.download_date
        )
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A graph node as it flows through resolution and merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier; replaced by the canonical id during resolution.
    pub id: String,
    /// Concrete type used to pick a resolver.
    pub kind: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub attributes: AttributeBag,
    #[serde(default)]
    pub xref: Vec<String>,
    #[serde(default)]
    pub provenance: Option<String>,
    #[serde(default)]
    pub entity_resolution: Option<String>,
}

impl Node {
    /// Creates a node whose only label is its kind.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            id: id.into(),
            labels: vec![kind.clone()],
            kind,
            attributes: AttributeBag::new(),
            xref: Vec::new(),
            provenance: None,
            entity_resolution: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for label in labels {
            self.add_label(label);
        }
        self
    }

    /// Adds a label if not already present.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }
}

/// One end of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub kind: String,
    pub labels: Vec<String>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            id: id.into(),
            labels: vec![kind.clone()],
            kind,
        }
    }
}

/// A directed, labelled relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub start: Endpoint,
    pub end: Endpoint,
    pub label: String,
    #[serde(default)]
    pub attributes: AttributeBag,
    #[serde(default)]
    pub provenance: Option<String>,
    #[serde(default)]
    pub entity_resolution: Option<String>,
}

impl Relationship {
    pub fn new(start: Endpoint, label: impl Into<String>, end: Endpoint) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            attributes: AttributeBag::new(),
            provenance: None,
            entity_resolution: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Builds a copy of this relationship pointing at different endpoint ids.
    /// Labels, attributes, and stamps are cloned unchanged.
    pub fn with_endpoint_ids(&self, start_id: &str, end_id: &str) -> Self {
        let mut copy = self.clone();
        copy.start.id = start_id.to_string();
        copy.end.id = end_id.to_string();
        copy
    }
}

/// A record from a source batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Node(Node),
    Relationship(Relationship),
}

impl Record {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Record::Node(n) => Some(n),
            Record::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Record::Node(_) => None,
            Record::Relationship(r) => Some(r),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// One raw id to resolve, with the type it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
    pub kind: String,
}

impl IdRequest {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// A candidate canonical id for an input id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMatch {
    pub input: String,
    #[serde(rename = "match")]
    pub matched: String,
    #[serde(default)]
    pub equivalent_ids: Vec<String>,
    /// Confidence signals, strongest first once sorted.
    #[serde(default)]
    pub context: Vec<String>,
}

impl IdMatch {
    pub fn new(input: impl Into<String>, matched: impl Into<String>, context: &str) -> Self {
        Self {
            input: input.into(),
            matched: matched.into(),
            equivalent_ids: Vec::new(),
            context: vec![context.to_string()],
        }
    }

    pub fn with_equivalents(mut self, equivalent_ids: Vec<String>) -> Self {
        self.equivalent_ids = equivalent_ids;
        self
    }
}

/// Raw id → ordered candidate matches (possibly empty).
pub type MatchMap = HashMap<String, Vec<IdMatch>>;

/// What to do with an id that matched nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoMatchBehavior {
    Skip,
    #[default]
    Allow,
    Error,
}

impl NoMatchBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "Skip",
            Self::Allow => "Allow",
            Self::Error => "Error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Skip" => Some(Self::Skip),
            "Allow" => Some(Self::Allow),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// What to do with matches beyond the first for one input id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiMatchBehavior {
    First,
    #[default]
    All,
    Error,
}

impl MultiMatchBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "First",
            Self::All => "All",
            Self::Error => "Error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "First" => Some(Self::First),
            "All" => Some(Self::All),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// How a differing scalar value is reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldConflictBehavior {
    KeepFirst,
    #[default]
    KeepLast,
}

impl FieldConflictBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepFirst => "KeepFirst",
            Self::KeepLast => "KeepLast",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "KeepFirst" => Some(Self::KeepFirst),
            "KeepLast" => Some(Self::KeepLast),
            _ => None,
        }
    }
}
