use std::collections::BTreeSet;

use kgmerge::errors::KgError;
use kgmerge::merge::*;
use kgmerge::types::*;
use serde_json::json;

const PROV_A: &str = "uniprot\t1\t2024-01-01\t2024-01-02";
const PROV_B: &str = "chembl\t2\t2024-03-01\t2024-03-02";

fn node(id: &str, prov: &str, stamp: &str) -> Node {
    let mut node = Node::new(id, "Protein");
    node.provenance = Some(prov.to_string());
    node.entity_resolution = Some(stamp.to_string());
    node
}

fn merger(behavior: FieldConflictBehavior) -> RecordMerger {
    RecordMerger::new(behavior)
}

fn node_key(id: &str) -> MergeKey {
    MergeKey::Node { id: id.to_string() }
}

#[test]
fn test_first_occurrence_has_no_log() {
    let record = Record::Node(
        node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("kinase")),
    );
    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&[record])
        .unwrap();
    assert_eq!(merged.len(), 1);
    let m = &merged[0];
    assert_eq!(m.key, node_key("P1"));
    assert_eq!(m.creation.as_deref(), Some(PROV_A));
    assert!(m.updates.is_empty());
    assert_eq!(m.resolved_ids, vec!["s1"]);
    assert_eq!(m.labels, vec!["Protein"]);
}

#[test]
fn test_scalar_conflict_keep_last_and_keep_first() {
    let records = vec![
        Record::Node(node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("old"))),
        Record::Node(node("P1", PROV_B, "s2").with_attribute("name", FieldValue::text("new"))),
    ];

    let last = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&records)
        .unwrap();
    assert_eq!(last[0].fields["name"], FieldValue::text("new"));
    assert_eq!(
        last[0].updates,
        vec![format!("name\told\tnew\t{PROV_B}\tKeepLast")]
    );

    let first = merger(FieldConflictBehavior::KeepFirst)
        .merge_batch(&records)
        .unwrap();
    assert_eq!(first[0].fields["name"], FieldValue::text("old"));
    assert_eq!(
        first[0].updates,
        vec![format!("name\told\tnew\t{PROV_B}\tKeepFirst")]
    );

    assert_eq!(first[0].creation.as_deref(), Some(PROV_A));
    assert_eq!(first[0].resolved_ids, vec!["s1", "s2"]);
}

#[test]
fn test_equal_scalars_are_not_logged() {
    let records = vec![
        Record::Node(node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("same"))),
        Record::Node(node("P1", PROV_B, "s2").with_attribute("name", FieldValue::text("same"))),
    ];
    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&records)
        .unwrap();
    assert!(merged[0].updates.is_empty());
}

#[test]
fn test_new_fields_are_logged_against_null() {
    let records = vec![
        Record::Node(node("P1", PROV_A, "s1")),
        Record::Node(
            node("P1", PROV_B, "s2")
                .with_attribute("name", FieldValue::text("kinase"))
                .with_attribute("tags", FieldValue::strings(["a", "b", "a"])),
        ),
    ];
    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&records)
        .unwrap();
    assert_eq!(
        merged[0].updates,
        vec![
            format!("name\t{NULL_VALUE}\tkinase\t{PROV_B}\tKeepLast"),
            format!("tags\t{NULL_VALUE}\t2 entries being merged\t{PROV_B}"),
        ]
    );
    assert_eq!(merged[0].fields["tags"], FieldValue::strings(["a", "b"]));
}

#[test]
fn test_collections_union() {
    let records = vec![
        Record::Node(node("P1", PROV_A, "s1").with_attribute("tags", FieldValue::strings(["a", "b"]))),
        Record::Node(node("P1", PROV_B, "s2").with_attribute("tags", FieldValue::strings(["b", "c"]))),
    ];
    let merged = merger(FieldConflictBehavior::KeepFirst)
        .merge_batch(&records)
        .unwrap();
    assert_eq!(merged[0].fields["tags"], FieldValue::strings(["a", "b", "c"]));
    assert_eq!(
        merged[0].updates,
        vec![format!(
            "tags\t2 entries already there\t2 entries being merged\t{PROV_B}"
        )]
    );
}

#[test]
fn test_empty_values_are_ignored() {
    let records = vec![
        Record::Node(node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("kept"))),
        Record::Node(node("P1", PROV_B, "s2").with_attribute("name", FieldValue::text(""))),
    ];
    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&records)
        .unwrap();
    assert_eq!(merged[0].fields["name"], FieldValue::text("kept"));
    assert!(merged[0].updates.is_empty());
}

#[test]
fn test_merge_is_idempotent_per_stamp() {
    let record = Record::Node(
        node("P1", PROV_A, "s1")
            .with_attribute("name", FieldValue::text("x"))
            .with_attribute("tags", FieldValue::strings(["a"])),
    );
    let m = merger(FieldConflictBehavior::KeepLast);
    let once = m.merge_batch(std::slice::from_ref(&record)).unwrap();
    let twice = m.merge_batch(&[record.clone(), record]).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_collection_merge_commutes_as_sets() {
    let a = Record::Node(node("P1", PROV_A, "s1").with_attribute("tags", FieldValue::strings(["a", "b"])));
    let b = Record::Node(node("P1", PROV_B, "s2").with_attribute("tags", FieldValue::strings(["c", "a"])));
    let m = merger(FieldConflictBehavior::KeepLast);

    let ab = m.merge_batch(&[a.clone(), b.clone()]).unwrap();
    let ba = m.merge_batch(&[b, a]).unwrap();

    let set = |r: &MergedRecord| -> BTreeSet<String> {
        match &r.fields["tags"] {
            FieldValue::StringList(v) => v.iter().cloned().collect(),
            other => panic!("unexpected shape {other:?}"),
        }
    };
    assert_eq!(set(&ab[0]), set(&ba[0]));
    let ids = |r: &MergedRecord| -> BTreeSet<String> { r.resolved_ids.iter().cloned().collect() };
    assert_eq!(ids(&ab[0]), ids(&ba[0]));
}

#[test]
fn test_schema_conflict_leaves_record_untouched() {
    let m = merger(FieldConflictBehavior::KeepLast);
    let mut acc = MergeAccumulator::new();
    m.merge_record(
        &mut acc,
        &Record::Node(node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("x"))),
    )
    .unwrap();
    let before = acc.get(&node_key("P1")).cloned();

    let err = m
        .merge_record(
            &mut acc,
            &Record::Node(
                node("P1", PROV_B, "s2").with_attribute("name", FieldValue::strings(["x"])),
            ),
        )
        .unwrap_err();
    assert!(matches!(err, KgError::SchemaConflict { ref field, .. } if field == "name"));
    assert_eq!(acc.get(&node_key("P1")).cloned(), before);
}

#[test]
fn test_labels_union_and_first_xref_wins() {
    let mut first = node("P1", PROV_A, "s1");
    first.xref = vec!["UniProtKB:P1".to_string()];
    let mut second = node("P1", PROV_B, "s2").with_labels(["Biomolecule"]);
    second.xref = vec!["CHEMBL:9".to_string()];

    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&[Record::Node(first), Record::Node(second)])
        .unwrap();
    assert_eq!(merged[0].labels, vec!["Protein", "Biomolecule"]);
    assert_eq!(merged[0].xref, vec!["UniProtKB:P1"]);
}

#[test]
fn test_relationships_merge_on_endpoints_and_label() {
    let make = |stamp: &str, score: &str| {
        let mut rel = Relationship::new(
            Endpoint::new("P1", "Protein"),
            "binds",
            Endpoint::new("P2", "Protein"),
        )
        .with_attribute("score", FieldValue::text(score));
        rel.provenance = Some(PROV_A.to_string());
        rel.entity_resolution = Some(stamp.to_string());
        Record::Relationship(rel)
    };
    let mut other_label = Relationship::new(
        Endpoint::new("P1", "Protein"),
        "inhibits",
        Endpoint::new("P2", "Protein"),
    );
    other_label.entity_resolution = Some("s3".to_string());

    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&[make("s1", "0.1"), make("s2", "0.9"), Record::Relationship(other_label)])
        .unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].fields["score"], FieldValue::text("0.9"));
    assert_eq!(merged[0].resolved_ids, vec!["s1", "s2"]);
    assert_eq!(
        merged[0].group(),
        LabelGroup::Edge {
            start_labels: vec!["Protein".to_string()],
            label: "binds".to_string(),
            end_labels: vec!["Protein".to_string()],
        }
    );
}

#[test]
fn test_merge_merged_carries_log_and_skips_known_stamps() {
    let m = merger(FieldConflictBehavior::KeepLast);
    let stored = m
        .merge_batch(&[
            Record::Node(node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("a"))),
            Record::Node(node("P1", PROV_A, "s2").with_attribute("name", FieldValue::text("b"))),
        ])
        .unwrap()
        .remove(0);
    assert_eq!(stored.updates.len(), 1);

    let incoming = m
        .merge_batch(&[Record::Node(
            node("P1", PROV_B, "s3").with_attribute("name", FieldValue::text("c")),
        )])
        .unwrap()
        .remove(0);

    let mut acc = MergeAccumulator::new();
    acc.seed(stored.clone());
    m.merge_merged(&mut acc, &incoming).unwrap();
    let result = acc.get(&node_key("P1")).unwrap().clone();
    assert_eq!(result.fields["name"], FieldValue::text("c"));
    assert_eq!(result.updates.len(), 2);
    assert_eq!(result.updates[1], format!("name\tb\tc\t{PROV_B}\tKeepLast"));
    assert_eq!(result.resolved_ids, vec!["s1", "s2", "s3"]);
    assert_eq!(result.creation.as_deref(), Some(PROV_A));

    m.merge_merged(&mut acc, &incoming).unwrap();
    assert_eq!(acc.get(&node_key("P1")).unwrap(), &result);
}

#[test]
fn test_field_sources_follow_the_kept_value() {
    let records = [
        Record::Node(
            node("P1", PROV_A, "s1")
                .with_attribute("name", FieldValue::text("a"))
                .with_attribute("tags", FieldValue::strings(["t"])),
        ),
        Record::Node(node("P1", PROV_B, "s2").with_attribute("name", FieldValue::text("b"))),
    ];
    let last = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&records)
        .unwrap()
        .remove(0);
    assert_eq!(last.field_sources["name"], PROV_B);
    assert!(!last.field_sources.contains_key("tags"));

    let first = merger(FieldConflictBehavior::KeepFirst)
        .merge_batch(&records)
        .unwrap()
        .remove(0);
    assert_eq!(first.field_sources["name"], PROV_A);
}

#[test]
fn test_merge_merged_does_not_relog_changes_from_known_records() {
    let m = merger(FieldConflictBehavior::KeepLast);
    let stored = m
        .merge_batch(&[Record::Node(
            node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("old")),
        )])
        .unwrap()
        .remove(0);
    let batch = m
        .merge_batch(&[
            Record::Node(node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("old"))),
            Record::Node(node("P1", PROV_B, "s2").with_attribute("name", FieldValue::text("new"))),
        ])
        .unwrap()
        .remove(0);

    let mut acc = MergeAccumulator::new();
    acc.seed(stored);
    m.merge_merged(&mut acc, &batch).unwrap();
    let result = acc.get(&node_key("P1")).unwrap();
    assert_eq!(result.updates, vec![format!("name\told\tnew\t{PROV_B}\tKeepLast")]);
    assert_eq!(result.resolved_ids, vec!["s1", "s2"]);
}

#[test]
fn test_merge_merged_credits_the_source_of_the_incoming_value() {
    const PROV_C: &str = "gtex\t8\t2024-05-01\t2024-05-02";
    let m = merger(FieldConflictBehavior::KeepLast);
    let stored = m
        .merge_batch(&[Record::Node(
            node("P1", PROV_A, "s1").with_attribute("name", FieldValue::text("x")),
        )])
        .unwrap()
        .remove(0);
    let batch = m
        .merge_batch(&[
            Record::Node(node("P1", PROV_B, "s2").with_attribute("name", FieldValue::text("y"))),
            Record::Node(node("P1", PROV_C, "s3").with_attribute("name", FieldValue::text("z"))),
        ])
        .unwrap()
        .remove(0);

    let mut acc = MergeAccumulator::new();
    acc.seed(stored);
    m.merge_merged(&mut acc, &batch).unwrap();
    let result = acc.get(&node_key("P1")).unwrap();
    assert_eq!(result.fields["name"], FieldValue::text("z"));
    assert_eq!(result.field_sources["name"], PROV_C);
    assert_eq!(
        result.updates,
        vec![
            format!("name\ty\tz\t{PROV_C}\tKeepLast"),
            format!("name\tx\tz\t{PROV_C}\tKeepLast"),
        ]
    );
}

#[test]
fn test_merge_merged_does_not_relog_collection_unions() {
    let m = merger(FieldConflictBehavior::KeepLast);
    let stored = m
        .merge_batch(&[Record::Node(
            node("P1", PROV_A, "s1").with_attribute("tags", FieldValue::strings(["a"])),
        )])
        .unwrap()
        .remove(0);
    let batch = m
        .merge_batch(&[Record::Node(
            node("P1", PROV_B, "s2").with_attribute("tags", FieldValue::strings(["b"])),
        )])
        .unwrap()
        .remove(0);

    let mut acc = MergeAccumulator::new();
    acc.seed(stored);
    m.merge_merged(&mut acc, &batch).unwrap();
    let result = acc.get(&node_key("P1")).unwrap();
    assert_eq!(result.fields["tags"], FieldValue::strings(["a", "b"]));
    assert!(result.updates.is_empty());
}

#[test]
fn test_flat_map_layout() {
    let merged = merger(FieldConflictBehavior::KeepLast)
        .merge_batch(&[Record::Node({
            let mut n = node("P1", PROV_A, "s1")
                .with_attribute("name", FieldValue::text("kinase"))
                .with_attribute("length", FieldValue::Scalar(Scalar::Integer(120)));
            n.xref = vec!["X:1".to_string()];
            n
        })])
        .unwrap();
    let flat = merged[0].to_flat_map();
    assert_eq!(flat["id"], json!("P1"));
    assert_eq!(flat["xref"], json!(["X:1"]));
    assert_eq!(flat["creation"], json!(PROV_A));
    assert_eq!(flat["updates"], json!([]));
    assert_eq!(flat["resolved_ids"], json!(["s1"]));
    assert_eq!(flat["name"], json!("kinase"));
    assert_eq!(flat["length"], json!(120));
    assert_eq!(
        flat["field_sources"],
        json!({"length": PROV_A, "name": PROV_A})
    );
    assert!(!flat.contains_key("start_id"));
}

#[test]
fn test_merge_key_display() {
    assert_eq!(node_key("P1").to_string(), "node P1");
    let edge = MergeKey::Edge {
        start_id: "A".to_string(),
        end_id: "B".to_string(),
        label: "binds".to_string(),
        start_labels: Vec::new(),
        end_labels: Vec::new(),
    };
    assert_eq!(edge.to_string(), "edge A-[binds]->B");
}
