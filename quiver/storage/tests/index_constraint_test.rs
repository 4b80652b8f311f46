mod common;

use std::ops::Bound;

use common::*;
use quiver_storage::{
    PropertyValue, StorageError, StorageResult, View,
};

// ========== LABEL INDEX ==========

#[test]
fn label_index_scans_are_mvcc_filtered() -> StorageResult<()> {
    let (store, _config, ids, (alice, bob, _edge), _scratch) = social_store("label_index");
    store.create_label_index(ids.person)?;

    // An uncommitted labeled vertex has a prospective entry but must
    // not surface for other readers.
    let writer = store.access(None)?;
    let carol = writer.create_vertex()?;
    writer.add_label(carol.vid(), ids.person)?;

    let reader = store.access(None)?;
    let seen: Vec<u64> = reader
        .vertices_by_label(ids.person, View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(seen, vec![alice, bob]);
    reader.abort()?;

    writer.commit()?;

    let reader = store.access(None)?;
    assert_eq!(
        reader.vertices_by_label(ids.person, View::New).count(),
        3
    );
    reader.abort()?;
    Ok(())
}

#[test]
fn removing_a_label_removes_the_vertex_from_scans() -> StorageResult<()> {
    let (store, _config, ids, (alice, bob, _edge), _scratch) = social_store("label_remove");
    store.create_label_index(ids.person)?;

    let accessor = store.access(None)?;
    assert!(accessor.remove_label(alice, ids.person)?);
    accessor.commit()?;

    let reader = store.access(None)?;
    let seen: Vec<u64> = reader
        .vertices_by_label(ids.person, View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(seen, vec![bob]);
    reader.abort()?;
    Ok(())
}

#[test]
fn label_scans_fall_back_to_full_scan_without_an_index() -> StorageResult<()> {
    let (store, _config, ids, (alice, bob, _edge), _scratch) = social_store("label_fallback");

    let reader = store.access(None)?;
    let seen: Vec<u64> = reader
        .vertices_by_label(ids.person, View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(seen, vec![alice, bob]);
    reader.abort()?;
    Ok(())
}

#[test]
fn index_ddl_rejects_duplicates_and_unknowns() -> StorageResult<()> {
    let (store, _config, ids, _gids, _scratch) = social_store("index_ddl");

    store.create_label_index(ids.person)?;
    assert!(matches!(
        store.create_label_index(ids.person),
        Err(StorageError::IndexDefinition(_))
    ));
    store.drop_label_index(ids.person)?;
    assert!(matches!(
        store.drop_label_index(ids.person),
        Err(StorageError::IndexDefinition(_))
    ));

    store.create_label_property_index(ids.person, ids.age)?;
    assert!(matches!(
        store.create_label_property_index(ids.person, ids.age),
        Err(StorageError::IndexDefinition(_))
    ));
    Ok(())
}

// ========== LABEL + PROPERTY INDEX ==========

#[test]
fn property_index_equality_and_range_lookups() -> StorageResult<()> {
    let (store, _config, ids, _scratch) = {
        let (store, config, scratch) = empty_store("prop_index");
        let ids = intern_social_ids(&store);
        (store, config, ids, scratch)
    };
    store.create_label_property_index(ids.person, ids.age)?;

    let accessor = store.access(None)?;
    let mut gids = Vec::new();
    for age in [25i64, 30, 35, 40] {
        let vertex = accessor.create_vertex()?;
        accessor.add_label(vertex.vid(), ids.person)?;
        accessor.set_vertex_property(vertex.vid(), ids.age, PropertyValue::Int(age))?;
        gids.push(vertex.vid());
    }
    accessor.commit()?;

    let reader = store.access(None)?;

    let exactly_30: Vec<u64> = reader
        .vertices_by_label_property_value(ids.person, ids.age, &PropertyValue::Int(30), View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(exactly_30, vec![gids[1]]);

    // Inclusive lower, exclusive upper: [30, 40).
    let mid: Vec<u64> = reader
        .vertices_by_label_property_range(
            ids.person,
            ids.age,
            Bound::Included(PropertyValue::Int(30)),
            Bound::Excluded(PropertyValue::Int(40)),
            View::New,
        )
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(mid, vec![gids[1], gids[2]]);

    // Doubles compare in the same numeric class as ints.
    let above: Vec<u64> = reader
        .vertices_by_label_property_range(
            ids.person,
            ids.age,
            Bound::Excluded(PropertyValue::Double(34.5)),
            Bound::Unbounded,
            View::New,
        )
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(above, vec![gids[2], gids[3]]);

    reader.abort()?;
    Ok(())
}

#[test]
fn property_index_tracks_value_updates() -> StorageResult<()> {
    let (store, _config, ids, (alice, _bob, _edge), _scratch) = social_store("prop_update");
    store.create_label_property_index(ids.person, ids.age)?;

    let accessor = store.access(None)?;
    accessor.set_vertex_property(alice, ids.age, PropertyValue::Int(26))?;
    accessor.commit()?;

    let reader = store.access(None)?;
    let at_old: Vec<u64> = reader
        .vertices_by_label_property_value(ids.person, ids.age, &PropertyValue::Int(25), View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert!(at_old.is_empty());

    let at_new: Vec<u64> = reader
        .vertices_by_label_property_value(ids.person, ids.age, &PropertyValue::Int(26), View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(at_new, vec![alice]);
    reader.abort()?;
    Ok(())
}

#[test]
fn null_valued_properties_never_match_index_lookups() -> StorageResult<()> {
    let (store, _config, ids, (alice, _bob, _edge), _scratch) = social_store("null_index");
    store.create_label_property_index(ids.person, ids.name)?;

    let accessor = store.access(None)?;
    accessor.set_vertex_property(alice, ids.name, PropertyValue::Null)?;
    accessor.commit()?;

    let reader = store.access(None)?;
    let with_name: Vec<u64> = reader
        .vertices_by_label_property(ids.person, ids.name, View::New)
        .map(|v| v.map(|v| v.vid()))
        .collect::<StorageResult<_>>()?;
    assert_eq!(with_name.len(), 1); // only bob
    reader.abort()?;
    Ok(())
}

// ========== EXISTENCE CONSTRAINTS ==========

#[test]
fn existence_constraint_fails_commits_that_violate_it() -> StorageResult<()> {
    let (store, _config, ids, _gids, _scratch) = social_store("existence");
    store.create_existence_constraint(ids.person, ids.name)?;

    let accessor = store.access(None)?;
    let vertex = accessor.create_vertex()?;
    accessor.add_label(vertex.vid(), ids.person)?;
    let gid = vertex.vid();
    match accessor.commit() {
        Err(StorageError::Constraint(violation)) => {
            let text = violation.to_string();
            assert!(text.contains(&gid.to_string()));
        }
        other => panic!("expected constraint violation, got {:?}", other.map(|_| ())),
    }

    // The failed commit aborted the transaction: nothing landed.
    let reader = store.access(None)?;
    assert_eq!(reader.find_vertex(gid, View::New)?, None);
    reader.abort()?;
    Ok(())
}

#[test]
fn existence_constraint_creation_validates_existing_data() -> StorageResult<()> {
    let (store, _config, ids, (alice, _bob, _edge), _scratch) = social_store("existence_seed");

    let accessor = store.access(None)?;
    accessor.set_vertex_property(alice, ids.name, PropertyValue::Null)?;
    accessor.commit()?;

    assert!(matches!(
        store.create_existence_constraint(ids.person, ids.name),
        Err(StorageError::Constraint(_))
    ));
    Ok(())
}

// ========== UNIQUE CONSTRAINTS ==========

#[test]
fn unique_constraint_first_committer_wins() -> StorageResult<()> {
    let (store, _config, ids, _gids, _scratch) = social_store("unique_email");
    let email = store.property_id("email")?;
    store.create_unique_constraint(ids.person, vec![email])?;

    let t1 = store.access(None)?;
    let v1 = t1.create_vertex()?;
    t1.add_label(v1.vid(), ids.person)?;
    t1.set_vertex_property(v1.vid(), email, PropertyValue::String("x@example.com".into()))?;

    let t2 = store.access(None)?;
    let v2 = t2.create_vertex()?;
    t2.add_label(v2.vid(), ids.person)?;
    t2.set_vertex_property(v2.vid(), email, PropertyValue::String("x@example.com".into()))?;

    // Both staged the same tuple; whoever commits second loses.
    t1.commit()?;
    match t2.commit() {
        Err(StorageError::Constraint(_)) => {}
        other => panic!("expected unique violation, got {:?}", other.map(|_| ())),
    }

    let reader = store.access(None)?;
    assert!(reader.find_vertex(v1.vid(), View::New)?.is_some());
    assert_eq!(reader.find_vertex(v2.vid(), View::New)?, None);
    reader.abort()?;
    Ok(())
}

#[test]
fn unique_tuple_is_released_by_delete() -> StorageResult<()> {
    let (store, _config, ids, (alice, _bob, _edge), _scratch) = social_store("unique_release");
    store.create_unique_constraint(ids.person, vec![ids.name])?;

    let deleter = store.access(None)?;
    deleter.detach_delete_vertex(alice)?;
    deleter.commit()?;

    // The name "alice" is free again.
    let accessor = store.access(None)?;
    let vertex = accessor.create_vertex()?;
    accessor.add_label(vertex.vid(), ids.person)?;
    accessor.set_vertex_property(vertex.vid(), ids.name, PropertyValue::String("alice".into()))?;
    accessor.commit()?;
    Ok(())
}

#[test]
fn unique_constraint_creation_detects_existing_duplicates() -> StorageResult<()> {
    let (store, _config, ids, (alice, bob, _edge), _scratch) = social_store("unique_seed");

    let accessor = store.access(None)?;
    accessor.set_vertex_property(bob, ids.name, PropertyValue::String("alice".into()))?;
    accessor.commit()?;

    assert!(matches!(
        store.create_unique_constraint(ids.person, vec![ids.name]),
        Err(StorageError::Constraint(_))
    ));

    // After fixing the duplicate, creation succeeds.
    let accessor = store.access(None)?;
    accessor.set_vertex_property(bob, ids.name, PropertyValue::String("bob".into()))?;
    accessor.commit()?;
    store.create_unique_constraint(ids.person, vec![ids.name])?;

    let _ = alice;
    Ok(())
}

// ========== APPROXIMATE COUNTS ==========

#[test]
fn approximate_counts_come_from_the_indexes() -> StorageResult<()> {
    let (store, _config, ids, _gids, _scratch) = social_store("approx_counts");
    store.create_label_index(ids.person)?;
    store.create_label_property_index(ids.person, ids.age)?;

    let reader = store.access(None)?;
    assert_eq!(reader.approximate_vertex_count(), 2);
    assert_eq!(reader.approximate_label_count(ids.person), 2);
    assert_eq!(
        reader.approximate_label_property_count(ids.person, ids.age),
        2
    );
    reader.abort()?;
    Ok(())
}
