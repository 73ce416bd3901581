use kgmerge::merge::*;
use kgmerge::output::{OutputAdapter, SqliteOutputAdapter};
use kgmerge::types::*;
use tempfile::TempDir;

const PROV_A: &str = "uniprot\t1\t2024-01-01\t2024-01-02";
const PROV_B: &str = "chembl\t2\t2024-03-01\t2024-03-02";
const PROV_C: &str = "gtex\t8\t2024-05-01\t2024-05-02";

fn setup(sweep: bool) -> (SqliteOutputAdapter, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("store").join("graph.sqlite");
    let adapter = SqliteOutputAdapter::open("sqlite", &path, FieldConflictBehavior::KeepLast, sweep)
        .expect("failed to open store");
    (adapter, dir)
}

fn node(id: &str, prov: &str, stamp: &str, name: &str) -> Record {
    let mut node = Node::new(id, "Protein").with_attribute("name", FieldValue::text(name));
    node.provenance = Some(prov.to_string());
    node.entity_resolution = Some(stamp.to_string());
    Record::Node(node)
}

fn edge(start: &str, end: &str, stamp: &str) -> Record {
    let mut rel = Relationship::new(
        Endpoint::new(start, "Protein"),
        "binds",
        Endpoint::new(end, "Protein"),
    );
    rel.provenance = Some(PROV_A.to_string());
    rel.entity_resolution = Some(stamp.to_string());
    Record::Relationship(rel)
}

fn merged(records: &[Record]) -> Vec<MergedRecord> {
    RecordMerger::new(FieldConflictBehavior::KeepLast)
        .merge_batch(records)
        .expect("failed to merge")
}

fn node_key(id: &str) -> MergeKey {
    MergeKey::Node { id: id.to_string() }
}

#[test]
fn test_store_and_get() {
    let (mut store, _dir) = setup(false);
    let summary = store
        .store(&merged(&[node("P1", PROV_A, "s1", "kinase")]))
        .unwrap();
    assert_eq!(summary.nodes, 1);
    assert_eq!(store.database().node_count().unwrap(), 1);

    let fetched = store.get(&node_key("P1")).unwrap().expect("P1 stored");
    assert_eq!(fetched.fields["name"], FieldValue::text("kinase"));
    assert_eq!(fetched.creation.as_deref(), Some(PROV_A));
    assert!(store.get(&node_key("P9")).unwrap().is_none());
}

#[test]
fn test_later_batches_merge_with_stored_records() {
    let (mut store, _dir) = setup(false);
    store.store(&merged(&[node("P1", PROV_A, "s1", "old")])).unwrap();
    store.store(&merged(&[node("P1", PROV_B, "s2", "new")])).unwrap();

    let fetched = store.get(&node_key("P1")).unwrap().unwrap();
    assert_eq!(fetched.fields["name"], FieldValue::text("new"));
    assert_eq!(fetched.creation.as_deref(), Some(PROV_A));
    assert_eq!(fetched.resolved_ids, vec!["s1", "s2"]);
    assert_eq!(
        fetched.updates,
        vec![format!("name\told\tnew\t{PROV_B}\tKeepLast")]
    );
    assert_eq!(store.database().node_count().unwrap(), 1);
}

#[test]
fn test_restoring_same_batch_is_idempotent() {
    let (mut store, _dir) = setup(false);
    let batch = merged(&[
        node("P1", PROV_A, "s1", "kinase"),
        node("P2", PROV_A, "s2", "ligase"),
        edge("P1", "P2", "e1"),
    ]);
    store.store(&batch).unwrap();
    let first = store.get(&node_key("P1")).unwrap();
    let first_edge = store.get(&batch[2].key).unwrap();

    store.store(&batch).unwrap();
    assert_eq!(store.get(&node_key("P1")).unwrap(), first);
    assert_eq!(store.get(&batch[2].key).unwrap(), first_edge);
    assert_eq!(store.database().edge_count().unwrap(), 1);
}

#[test]
fn test_partial_rerun_logs_each_change_once() {
    let (mut store, _dir) = setup(false);
    store.store(&merged(&[node("P1", PROV_A, "s1", "old")])).unwrap();

    let batch = merged(&[node("P1", PROV_A, "s1", "old"), node("P1", PROV_B, "s2", "new")]);
    store.store(&batch).unwrap();
    let fetched = store.get(&node_key("P1")).unwrap().unwrap();
    assert_eq!(fetched.fields["name"], FieldValue::text("new"));
    assert_eq!(
        fetched.updates,
        vec![format!("name\told\tnew\t{PROV_B}\tKeepLast")]
    );
    assert_eq!(fetched.resolved_ids, vec!["s1", "s2"]);

    store.store(&batch).unwrap();
    assert_eq!(store.get(&node_key("P1")).unwrap().unwrap(), fetched);
}

#[test]
fn test_incremental_batch_credits_the_supplying_source() {
    let (mut store, _dir) = setup(false);
    store.store(&merged(&[node("P1", PROV_A, "s1", "x")])).unwrap();
    store
        .store(&merged(&[
            node("P1", PROV_B, "s2", "y"),
            node("P1", PROV_C, "s3", "z"),
        ]))
        .unwrap();

    let fetched = store.get(&node_key("P1")).unwrap().unwrap();
    assert_eq!(fetched.fields["name"], FieldValue::text("z"));
    assert_eq!(fetched.field_sources["name"], PROV_C);
    for entry in fetched.updates.iter().filter(|u| u.contains("\tz\t")) {
        assert!(entry.ends_with(&format!("{PROV_C}\tKeepLast")), "{entry}");
    }
    assert_eq!(fetched.updates.len(), 2);
}

#[test]
fn test_edges_in_one_batch_merge_with_their_own_stored_versions() {
    let (mut store, _dir) = setup(false);
    store
        .store(&merged(&[edge("P1", "P2", "e1"), edge("P1", "P3", "e2"), edge("P2", "P3", "e3")]))
        .unwrap();
    let batch = merged(&[edge("P2", "P3", "e6"), edge("P1", "P3", "e5"), edge("P1", "P2", "e4")]);
    store.store(&batch).unwrap();

    assert_eq!(store.database().edge_count().unwrap(), 3);
    for (record, first) in batch.iter().zip(["e3", "e2", "e1"]) {
        let fetched = store.get(&record.key).unwrap().expect("edge stored");
        assert_eq!(fetched.resolved_ids, vec![first, record.resolved_ids[0].as_str()]);
    }
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("graph.sqlite");
    {
        let mut store =
            SqliteOutputAdapter::open("sqlite", &path, FieldConflictBehavior::KeepLast, false)
                .unwrap();
        store.store(&merged(&[node("P1", PROV_A, "s1", "a")])).unwrap();
    }
    let mut store =
        SqliteOutputAdapter::open("sqlite", &path, FieldConflictBehavior::KeepLast, false).unwrap();
    store.store(&merged(&[node("P1", PROV_B, "s2", "b")])).unwrap();
    let fetched = store.get(&node_key("P1")).unwrap().unwrap();
    assert_eq!(fetched.resolved_ids, vec!["s1", "s2"]);
}

#[test]
fn test_sweep_removes_dangling_edges() {
    let (mut store, _dir) = setup(true);
    store
        .store(&merged(&[
            node("P1", PROV_A, "s1", "a"),
            node("P2", PROV_A, "s2", "b"),
            edge("P1", "P2", "e1"),
            edge("P1", "P404", "e2"),
        ]))
        .unwrap();
    assert_eq!(store.database().edge_count().unwrap(), 2);

    assert_eq!(store.sweep_dangling_edges().unwrap(), 1);
    assert_eq!(store.database().edge_count().unwrap(), 1);

    store
        .store(&merged(&[edge("P2", "P405", "e3")]))
        .unwrap();
    store.do_post_processing().unwrap();
    assert_eq!(store.database().edge_count().unwrap(), 1);
}

#[test]
fn test_truncate_empties_store() {
    let (mut store, _dir) = setup(false);
    store
        .store(&merged(&[node("P1", PROV_A, "s1", "a"), edge("P1", "P1", "e1")]))
        .unwrap();
    store.create_or_truncate_datastore().unwrap();
    assert_eq!(store.database().node_count().unwrap(), 0);
    assert_eq!(store.database().edge_count().unwrap(), 0);
}
