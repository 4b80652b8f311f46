mod common;

use std::fs::OpenOptions;
use std::io::Write;

use common::*;
use quiver_storage::{
    GraphStore, PropertyValue, StorageResult, View,
};
use serial_test::serial;

// ========== WAL-ONLY RECOVERY ==========

#[test]
#[serial]
fn committed_state_survives_a_reopen() -> StorageResult<()> {
    let (store, config, ids, (alice, bob, edge), _scratch) = social_store("wal_reopen");
    drop(store);

    let store = GraphStore::open(config)?;
    let reader = store.access(None)?;

    let found_alice = reader.find_vertex(alice, View::New)?.expect("alice");
    assert!(found_alice.has_label(ids.person));
    assert_eq!(
        found_alice.property(ids.name),
        Some(&PropertyValue::String("alice".into()))
    );
    assert!(reader.find_vertex(bob, View::New)?.is_some());

    let found_edge = reader.find_edge(edge, View::New)?.expect("edge");
    assert_eq!(found_edge.src_id(), alice);
    assert_eq!(found_edge.dst_id(), bob);

    // Adjacency was rebuilt through the replayed create.
    let out: Vec<_> = reader
        .out_edges(alice, View::New)
        .collect::<StorageResult<_>>()?;
    assert_eq!(out.len(), 1);
    reader.abort()?;
    Ok(())
}

#[test]
#[serial]
fn aborted_and_unfinished_transactions_do_not_recover() -> StorageResult<()> {
    let (store, config, ids, (alice, _bob, _edge), _scratch) = social_store("wal_aborts");

    // Explicit abort.
    let aborted = store.access(None)?;
    aborted.set_vertex_property(alice, ids.age, PropertyValue::Int(99))?;
    aborted.abort()?;

    // Simulated crash mid-transaction: a begin record reaches the log
    // but no commit ever does.
    let unfinished = store.access(None)?;
    let orphan = unfinished.create_vertex()?;
    let orphan_gid = orphan.vid();
    let committer = store.access(None)?;
    let keeper = committer.create_vertex()?;
    let keeper_gid = keeper.vid();
    committer.commit()?;
    std::mem::forget(unfinished);
    drop(store);

    let store = GraphStore::open(config)?;
    let reader = store.access(None)?;
    let vertex = reader.find_vertex(alice, View::New)?.unwrap();
    assert_eq!(vertex.property(ids.age), Some(&PropertyValue::Int(25)));
    assert!(reader.find_vertex(keeper_gid, View::New)?.is_some());
    assert_eq!(reader.find_vertex(orphan_gid, View::New)?, None);
    reader.abort()?;
    Ok(())
}

#[test]
#[serial]
fn torn_wal_tail_is_cut_and_the_rest_replays() -> StorageResult<()> {
    let (store, config, _ids, (alice, _bob, _edge), _scratch) = social_store("wal_torn");
    drop(store);

    // Garbage at the end of the active segment simulates a crash mid
    // append.
    let open_segment = std::fs::read_dir(config.wal_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_open.wal"))
                .unwrap_or(false)
        })
        .expect("active wal segment");
    let mut file = OpenOptions::new().append(true).open(&open_segment).unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]).unwrap();
    file.sync_data().unwrap();

    let store = GraphStore::open(config)?;
    let reader = store.access(None)?;
    assert!(reader.find_vertex(alice, View::New)?.is_some());
    reader.abort()?;
    Ok(())
}

#[test]
#[serial]
fn recovery_reproduces_many_commits_exactly() -> StorageResult<()> {
    let (store, config, ids, _scratch) = {
        let (store, config, scratch) = empty_store("wal_many");
        let ids = intern_social_ids(&store);
        (store, config, ids, scratch)
    };

    let mut vertex_gids = Vec::new();
    for i in 0..50i64 {
        let accessor = store.access(None)?;
        let vertex = accessor.create_vertex()?;
        accessor.add_label(vertex.vid(), ids.person)?;
        accessor.set_vertex_property(vertex.vid(), ids.age, PropertyValue::Int(i))?;
        vertex_gids.push(vertex.vid());
        accessor.commit()?;
    }
    // Chain the vertices with edges, one commit per edge.
    for pair in vertex_gids.windows(2) {
        let accessor = store.access(None)?;
        accessor.create_edge(pair[0], pair[1], ids.knows)?;
        accessor.commit()?;
    }
    drop(store);

    let store = GraphStore::open(config)?;
    let reader = store.access(None)?;

    let vertices: Vec<_> = reader
        .vertices(View::New)
        .collect::<StorageResult<Vec<_>>>()?;
    assert_eq!(vertices.len(), 50);

    let edges: Vec<_> = reader.edges(View::New).collect::<StorageResult<Vec<_>>>()?;
    assert_eq!(edges.len(), 49);

    // Edge count must match the adjacency sums.
    let mut out_sum = 0;
    let mut in_sum = 0;
    for gid in &vertex_gids {
        out_sum += reader.out_edges(*gid, View::New).count();
        in_sum += reader.in_edges(*gid, View::New).count();
    }
    assert_eq!(out_sum, 49);
    assert_eq!(in_sum, 49);

    // Values came back, not just shapes.
    for (i, gid) in vertex_gids.iter().enumerate() {
        let vertex = reader.find_vertex(*gid, View::New)?.unwrap();
        assert_eq!(
            vertex.property(ids.age),
            Some(&PropertyValue::Int(i as i64))
        );
    }
    reader.abort()?;
    Ok(())
}

// ========== SNAPSHOT + WAL TAIL ==========

#[test]
#[serial]
fn snapshot_plus_wal_tail_recovers_both_sides() -> StorageResult<()> {
    let (store, config, ids, (alice, _bob, _edge), _scratch) = social_store("snap_tail");

    store.create_snapshot()?;

    // Post-snapshot commit lands only in the WAL tail.
    let accessor = store.access(None)?;
    let carol = accessor.create_vertex()?;
    accessor.add_label(carol.vid(), ids.person)?;
    accessor.set_vertex_property(carol.vid(), ids.name, PropertyValue::String("carol".into()))?;
    let carol_gid = carol.vid();
    accessor.commit()?;
    drop(store);

    let store = GraphStore::open(config)?;
    let reader = store.access(None)?;
    // From the snapshot:
    assert!(reader.find_vertex(alice, View::New)?.is_some());
    // From the tail:
    let carol = reader.find_vertex(carol_gid, View::New)?.expect("carol");
    assert_eq!(
        carol.property(ids.name),
        Some(&PropertyValue::String("carol".into()))
    );
    // Name tables survived through the snapshot.
    assert_eq!(store.label_name(ids.person).as_deref(), Some("Person"));
    reader.abort()?;
    Ok(())
}

#[test]
#[serial]
fn wal_segments_rotate_at_snapshots_and_get_pruned() -> StorageResult<()> {
    let (store, _config, ids, (alice, _bob, _edge), _scratch) = social_store("wal_prune");

    for round in 0..4i64 {
        let accessor = store.access(None)?;
        accessor.set_vertex_property(alice, ids.age, PropertyValue::Int(round))?;
        accessor.commit()?;
        store.create_snapshot()?;
    }

    // Retention keeps 3 snapshots; WAL segments entirely below the
    // oldest retained snapshot are gone, except the straddling one.
    let snapshots = store.snapshots();
    assert_eq!(snapshots.len(), 3);

    let reader = store.access(None)?;
    let vertex = reader.find_vertex(alice, View::New)?.unwrap();
    assert_eq!(vertex.property(ids.age), Some(&PropertyValue::Int(3)));
    reader.abort()?;
    Ok(())
}

#[test]
#[serial]
fn indexes_and_constraints_recover() -> StorageResult<()> {
    let (store, config, ids, (alice, _bob, _edge), _scratch) = social_store("ddl_recover");

    store.create_label_index(ids.person)?;
    store.create_label_property_index(ids.person, ids.age)?;
    store.create_unique_constraint(ids.person, vec![ids.name])?;
    store.create_snapshot()?;

    // DDL after the snapshot exercises the WAL path too.
    store.create_existence_constraint(ids.person, ids.name)?;
    drop(store);

    let store = GraphStore::open(config)?;

    // Index scans work and the unique registry is back: a duplicate
    // name must be rejected.
    let accessor = store.access(None)?;
    let by_label: Vec<_> = accessor
        .vertices_by_label(ids.person, View::New)
        .collect::<StorageResult<_>>()?;
    assert_eq!(by_label.len(), 2);

    let dupe = accessor.create_vertex()?;
    accessor.add_label(dupe.vid(), ids.person)?;
    accessor.set_vertex_property(dupe.vid(), ids.name, PropertyValue::String("alice".into()))?;
    assert!(accessor.commit().is_err());

    // The existence constraint also came back.
    let accessor = store.access(None)?;
    let incomplete = accessor.create_vertex()?;
    accessor.add_label(incomplete.vid(), ids.person)?;
    assert!(accessor.commit().is_err());

    // And a well-formed insert still passes.
    let accessor = store.access(None)?;
    let valid = accessor.create_vertex()?;
    accessor.add_label(valid.vid(), ids.person)?;
    accessor.set_vertex_property(valid.vid(), ids.name, PropertyValue::String("dora".into()))?;
    accessor.commit()?;

    let _ = alice;
    Ok(())
}
