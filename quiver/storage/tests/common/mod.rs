#![allow(dead_code)]

use std::sync::Arc;

use quiver_storage::{
    EdgeTypeId, GraphStore, LabelId, PropertyId, PropertyValue, StorageConfig,
};
use temp_dir::TempDir;

/// A config rooted in a self-cleaning scratch directory. Hold the
/// returned [`TempDir`] for the lifetime of the test; dropping it
/// removes the data directory.
pub fn test_config(tag: &str) -> (StorageConfig, TempDir) {
    let scratch = TempDir::with_prefix(format!("quiver_it_{tag}_")).unwrap();
    let config = StorageConfig {
        data_dir: scratch.path().to_path_buf(),
        snapshot_interval_sec: 0,
        gc_interval_sec: 0,
        ..Default::default()
    };
    (config, scratch)
}

pub fn empty_store(tag: &str) -> (Arc<GraphStore>, StorageConfig, TempDir) {
    let (config, scratch) = test_config(tag);
    let store = GraphStore::fresh(config.clone()).unwrap();
    (store, config, scratch)
}

/// Interned identifiers shared by the social-graph fixtures.
#[derive(Debug, Clone, Copy)]
pub struct SocialIds {
    pub person: LabelId,
    pub name: PropertyId,
    pub age: PropertyId,
    pub knows: EdgeTypeId,
}

pub fn intern_social_ids(store: &Arc<GraphStore>) -> SocialIds {
    SocialIds {
        person: store.label_id("Person").unwrap(),
        name: store.property_id("name").unwrap(),
        age: store.property_id("age").unwrap(),
        knows: store.edge_type_id("KNOWS").unwrap(),
    }
}

/// A store seeded with alice -[KNOWS]-> bob, committed. Returns the
/// gids as (alice, bob, edge).
pub fn social_store(
    tag: &str,
) -> (
    Arc<GraphStore>,
    StorageConfig,
    SocialIds,
    (u64, u64, u64),
    TempDir,
) {
    let (store, config, scratch) = empty_store(tag);
    let ids = intern_social_ids(&store);

    let accessor = store.access(None).unwrap();
    let alice = accessor.create_vertex().unwrap();
    accessor.add_label(alice.vid(), ids.person).unwrap();
    accessor
        .set_vertex_property(alice.vid(), ids.name, PropertyValue::String("alice".into()))
        .unwrap();
    accessor
        .set_vertex_property(alice.vid(), ids.age, PropertyValue::Int(25))
        .unwrap();

    let bob = accessor.create_vertex().unwrap();
    accessor.add_label(bob.vid(), ids.person).unwrap();
    accessor
        .set_vertex_property(bob.vid(), ids.name, PropertyValue::String("bob".into()))
        .unwrap();
    accessor
        .set_vertex_property(bob.vid(), ids.age, PropertyValue::Int(30))
        .unwrap();

    let edge = accessor
        .create_edge(alice.vid(), bob.vid(), ids.knows)
        .unwrap();

    accessor.commit().unwrap();
    let gids = (alice.vid(), bob.vid(), edge.eid());
    (store, config, ids, gids, scratch)
}
