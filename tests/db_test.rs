use kgmerge::db::{Database, StoredEdge, StoredNode};
use kgmerge::reference::MatchingPair;
use tempfile::TempDir;

fn setup_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db = Database::open(&dir.path().join("test.db")).expect("failed to open database");
    (db, dir)
}

fn pair(id: &str, matched: &str, match_type: &str) -> MatchingPair {
    MatchingPair {
        id: id.to_string(),
        matched: matched.to_string(),
        match_type: match_type.to_string(),
    }
}

fn stored_node(id: &str) -> StoredNode {
    StoredNode {
        id: id.to_string(),
        labels: vec!["Protein".to_string()],
        body: format!("{{\"id\":\"{id}\"}}"),
    }
}

fn stored_edge(start: &str, end: &str, body: &str) -> StoredEdge {
    StoredEdge {
        start_id: start.to_string(),
        label: "binds".to_string(),
        end_id: end.to_string(),
        body: body.to_string(),
    }
}

#[test]
fn test_open_creates_parent_dirs() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("a").join("b").join("lookup.sqlite");
    let _db = Database::open(&path).expect("failed to open database");
    assert!(path.exists());
}

#[test]
fn test_lookup_version_missing_until_built() {
    let (db, _dir) = setup_db();
    assert_eq!(db.lookup_version().unwrap(), None);

    db.rebuild_lookup(&[pair("G1", "G1", "exact")], "v1").unwrap();
    assert_eq!(db.lookup_version().unwrap().as_deref(), Some("v1"));

    db.rebuild_lookup(&[pair("G2", "G2", "exact")], "v2").unwrap();
    assert_eq!(db.lookup_version().unwrap().as_deref(), Some("v2"));
    assert_eq!(db.lookup_row_count().unwrap(), 1);
}

#[test]
fn test_find_matches_and_aliases() {
    let (db, _dir) = setup_db();
    db.rebuild_lookup(
        &[
            pair("G1", "G1", "exact"),
            pair("G1", "BRCA1", "symbol"),
            pair("G2", "G2", "exact"),
            pair("G2", "BRCA1", "synonym"),
        ],
        "v1",
    )
    .unwrap();

    let rows = db.find_matches(&["BRCA1".to_string()]).unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["G1", "G2"]);

    let aliases = db.find_aliases(&["G1".to_string()]).unwrap();
    let terms: Vec<&str> = aliases.iter().map(|r| r.matched.as_str()).collect();
    assert_eq!(terms, vec!["G1", "BRCA1"]);
    assert!(db.find_matches(&[]).unwrap().is_empty());
}

#[test]
fn test_store_nodes_upsert() {
    let (db, _dir) = setup_db();
    db.ensure_store_schema().unwrap();
    db.upsert_nodes(&[stored_node("P1"), stored_node("P2")]).unwrap();

    let mut updated = stored_node("P1");
    updated.body = "{\"v\":2}".to_string();
    db.upsert_nodes(&[updated]).unwrap();

    assert_eq!(db.node_count().unwrap(), 2);
    let fetched = db.get_nodes(&["P1".to_string(), "P9".to_string()]).unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].body, "{\"v\":2}");
    assert_eq!(fetched[0].labels, vec!["Protein"]);

    let existing = db
        .existing_node_ids(&["P1".to_string(), "P3".to_string()])
        .unwrap();
    assert!(existing.contains("P1"));
    assert!(!existing.contains("P3"));
}

#[test]
fn test_store_edges_keyed_by_endpoints_and_label() {
    let (db, _dir) = setup_db();
    db.ensure_store_schema().unwrap();
    db.upsert_edges(&[stored_edge("A", "B", "1"), stored_edge("A", "C", "1")])
        .unwrap();
    db.upsert_edges(&[stored_edge("A", "B", "2")]).unwrap();
    assert_eq!(db.edge_count().unwrap(), 2);

    let key = ("A".to_string(), "binds".to_string(), "B".to_string());
    let fetched = db.get_edges(std::slice::from_ref(&key)).unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].body, "2");
    assert_eq!(fetched[0].key(), key);

    let page = db.edge_keys_after(0, 1).unwrap();
    assert_eq!(page.len(), 1);
    let rest = db.edge_keys_after(page[0].0, 10).unwrap();
    assert_eq!(rest.len(), 1);

    assert_eq!(db.delete_edges(&[key]).unwrap(), 1);
    assert_eq!(db.edge_count().unwrap(), 1);

    db.truncate_store().unwrap();
    assert_eq!(db.edge_count().unwrap(), 0);
}

#[test]
fn test_get_edges_returns_only_requested_keys_of_hub_node() {
    let (db, _dir) = setup_db();
    db.ensure_store_schema().unwrap();
    let mut edges: Vec<StoredEdge> = (0..50)
        .map(|i| stored_edge("HUB", &format!("T{i}"), "x"))
        .collect();
    edges.push(StoredEdge {
        label: "inhibits".to_string(),
        ..stored_edge("HUB", "T1", "y")
    });
    db.upsert_edges(&edges).unwrap();

    let key = |start: &str, label: &str, end: &str| {
        (start.to_string(), label.to_string(), end.to_string())
    };
    let wanted = vec![
        key("HUB", "binds", "T7"),
        key("HUB", "inhibits", "T1"),
        key("HUB", "inhibits", "T2"),
        key("NONE", "binds", "T7"),
        key("HUB", "binds", "T7"),
    ];
    let mut fetched: Vec<(String, String, String)> =
        db.get_edges(&wanted).unwrap().iter().map(StoredEdge::key).collect();
    fetched.sort();
    assert_eq!(
        fetched,
        vec![key("HUB", "binds", "T7"), key("HUB", "inhibits", "T1")]
    );
}
