//! Label and label+property secondary indices.
//!
//! Both indices are ordered concurrent skip-lists of prospective
//! entries. An entry is inserted the moment a writer gives a vertex the
//! label or property value, before that write commits; readers
//! re-check the entry against their own MVCC view of the vertex, so a
//! stale or uncommitted entry is filtered, never wrong. Entries are
//! removed when the writing transaction aborts or when GC proves no
//! reader below the watermark can still match them.

use std::ops::Bound;

use crossbeam_skiplist::SkipSet;
use dashmap::DashSet;
use quiver_common::{LabelId, PropertyId, PropertyValue, VertexId};

use crate::error::{IndexDefinitionError, StorageResult};
use crate::model::Vertex;

/// Entry of the label index, ordered by `(label, vid)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LabelEntry {
    pub label: LabelId,
    pub vid: VertexId,
}

/// Entry of the label+property index, ordered by
/// `(label, property, value, vid)` using the property-value total
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PropertyEntry {
    pub label: LabelId,
    pub property: PropertyId,
    pub value: PropertyValue,
    pub vid: VertexId,
}

/// All registered secondary indices of one storage instance.
#[derive(Debug, Default)]
pub struct IndexSet {
    label_registry: DashSet<LabelId>,
    label_entries: SkipSet<LabelEntry>,
    property_registry: DashSet<(LabelId, PropertyId)>,
    property_entries: SkipSet<PropertyEntry>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== definitions =====

    pub fn register_label(&self, label: LabelId) -> StorageResult<()> {
        if !self.label_registry.insert(label) {
            return Err(
                IndexDefinitionError::AlreadyExists(format!("label index on {label}")).into(),
            );
        }
        Ok(())
    }

    pub fn unregister_label(&self, label: LabelId) -> StorageResult<()> {
        if self.label_registry.remove(&label).is_none() {
            return Err(
                IndexDefinitionError::DoesNotExist(format!("label index on {label}")).into(),
            );
        }
        let entries: Vec<LabelEntry> = self.label_range_entries(label).collect();
        for entry in entries {
            self.label_entries.remove(&entry);
        }
        Ok(())
    }

    pub fn has_label_index(&self, label: LabelId) -> bool {
        self.label_registry.contains(&label)
    }

    pub fn register_property(&self, label: LabelId, property: PropertyId) -> StorageResult<()> {
        if !self.property_registry.insert((label, property)) {
            return Err(IndexDefinitionError::AlreadyExists(format!(
                "label+property index on ({label}, {property})"
            ))
            .into());
        }
        Ok(())
    }

    pub fn unregister_property(&self, label: LabelId, property: PropertyId) -> StorageResult<()> {
        if self.property_registry.remove(&(label, property)).is_none() {
            return Err(IndexDefinitionError::DoesNotExist(format!(
                "label+property index on ({label}, {property})"
            ))
            .into());
        }
        let entries: Vec<PropertyEntry> = self
            .property_range_entries(label, property, Bound::Unbounded, Bound::Unbounded)
            .collect();
        for entry in entries {
            self.property_entries.remove(&entry);
        }
        Ok(())
    }

    pub fn has_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        self.property_registry.contains(&(label, property))
    }

    pub fn label_indexes(&self) -> Vec<LabelId> {
        let mut labels: Vec<LabelId> = self.label_registry.iter().map(|l| *l).collect();
        labels.sort();
        labels
    }

    pub fn property_indexes(&self) -> Vec<(LabelId, PropertyId)> {
        let mut pairs: Vec<(LabelId, PropertyId)> =
            self.property_registry.iter().map(|p| *p).collect();
        pairs.sort();
        pairs
    }

    // ===== entry maintenance =====

    /// Inserts prospective entries for every label and indexed property
    /// of a freshly written vertex.
    pub fn note_vertex(&self, vertex: &Vertex) {
        for label in vertex.labels() {
            self.note_label_added(vertex, *label);
        }
    }

    /// Prospective entries for one newly added label.
    pub fn note_label_added(&self, vertex: &Vertex, label: LabelId) {
        if self.label_registry.contains(&label) {
            self.label_entries.insert(LabelEntry {
                label,
                vid: vertex.vid(),
            });
        }
        for (property, value) in vertex.properties().iter() {
            if self.property_registry.contains(&(label, property)) && value.is_indexable() {
                self.property_entries.insert(PropertyEntry {
                    label,
                    property,
                    value: value.clone(),
                    vid: vertex.vid(),
                });
            }
        }
    }

    /// Prospective entries for one newly written property value, under
    /// every label the vertex currently carries.
    pub fn note_property_set(&self, vertex: &Vertex, property: PropertyId, value: &PropertyValue) {
        if !value.is_indexable() {
            return;
        }
        for label in vertex.labels() {
            if self.property_registry.contains(&(*label, property)) {
                self.property_entries.insert(PropertyEntry {
                    label: *label,
                    property,
                    value: value.clone(),
                    vid: vertex.vid(),
                });
            }
        }
    }

    pub fn remove_label_entry(&self, label: LabelId, vid: VertexId) {
        self.label_entries.remove(&LabelEntry { label, vid });
    }

    pub fn remove_property_entry(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        vid: VertexId,
    ) {
        self.property_entries.remove(&PropertyEntry {
            label,
            property,
            value: value.clone(),
            vid,
        });
    }

    /// Removes every entry derivable from this vertex payload. Used on
    /// abort of a create and on physical removal by GC.
    pub fn purge_vertex(&self, vertex: &Vertex) {
        for label in vertex.labels() {
            self.remove_label_entry(*label, vertex.vid());
            for (property, value) in vertex.properties().iter() {
                if value.is_indexable() {
                    self.remove_property_entry(*label, property, value, vertex.vid());
                }
            }
        }
    }

    /// Point-in-time copy of every label entry, for the GC vacuum.
    pub(crate) fn label_entries_snapshot(&self) -> Vec<LabelEntry> {
        self.label_entries.iter().map(|e| *e.value()).collect()
    }

    /// Point-in-time copy of every property entry, for the GC vacuum.
    pub(crate) fn property_entries_snapshot(&self) -> Vec<PropertyEntry> {
        self.property_entries
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    // ===== scans =====

    fn label_range_entries(&self, label: LabelId) -> impl Iterator<Item = LabelEntry> + '_ {
        let low = LabelEntry { label, vid: 0 };
        let high = LabelEntry {
            label,
            vid: VertexId::MAX,
        };
        self.label_entries.range(low..=high).map(|e| *e.value())
    }

    /// Vertex ids with a prospective entry for `label`, in id order.
    pub fn scan_label(&self, label: LabelId) -> impl Iterator<Item = VertexId> + '_ {
        self.label_range_entries(label).map(|e| e.vid)
    }

    fn property_range_entries(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
    ) -> impl Iterator<Item = PropertyEntry> + '_ {
        let start: Bound<PropertyEntry> = match lower {
            Bound::Included(value) => Bound::Included(PropertyEntry {
                label,
                property,
                value,
                vid: 0,
            }),
            Bound::Excluded(value) => Bound::Excluded(PropertyEntry {
                label,
                property,
                value,
                vid: VertexId::MAX,
            }),
            // Null sorts below every indexable value and is itself
            // never indexed, so this lands at the start of the block.
            Bound::Unbounded => Bound::Included(PropertyEntry {
                label,
                property,
                value: PropertyValue::Null,
                vid: 0,
            }),
        };
        self.property_entries
            .range((start, Bound::Unbounded))
            .map(|e| e.value().clone())
            .take_while(move |e| {
                if e.label != label || e.property != property {
                    return false;
                }
                match &upper {
                    Bound::Included(value) => e.value <= *value,
                    Bound::Excluded(value) => e.value < *value,
                    Bound::Unbounded => true,
                }
            })
    }

    /// Prospective `(value, vid)` pairs for `(label, property)` within
    /// the given bounds. A NaN bound matches nothing.
    pub fn scan_property(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
    ) -> Box<dyn Iterator<Item = PropertyEntry> + '_> {
        let nan = |b: &Bound<PropertyValue>| {
            matches!(b, Bound::Included(PropertyValue::Double(d)) | Bound::Excluded(PropertyValue::Double(d)) if d.is_nan())
        };
        if nan(&lower) || nan(&upper) {
            return Box::new(std::iter::empty());
        }
        Box::new(self.property_range_entries(label, property, lower, upper))
    }

    // ===== approximate cardinalities =====

    /// Number of prospective entries for `label`. Approximate: includes
    /// uncommitted and not-yet-collected entries.
    pub fn approximate_label_count(&self, label: LabelId) -> u64 {
        self.label_range_entries(label).count() as u64
    }

    pub fn approximate_property_count(&self, label: LabelId, property: PropertyId) -> u64 {
        self.property_range_entries(label, property, Bound::Unbounded, Bound::Unbounded)
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::model::PropertyRecord;

    const NAME: PropertyId = 1;

    fn label(id: u32) -> LabelId {
        NonZeroU32::new(id).unwrap()
    }

    fn vertex(vid: VertexId, l: LabelId, name: &str) -> Vertex {
        let mut props = PropertyRecord::new();
        props.set(NAME, PropertyValue::String(name.into()));
        Vertex::new(vid, vec![l], props)
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let indexes = IndexSet::new();
        indexes.register_label(label(1)).unwrap();
        assert!(indexes.register_label(label(1)).is_err());
        assert!(indexes.unregister_label(label(2)).is_err());
        indexes.unregister_label(label(1)).unwrap();
        assert!(!indexes.has_label_index(label(1)));
    }

    #[test]
    fn label_scan_returns_ids_in_order() {
        let indexes = IndexSet::new();
        let person = label(1);
        let city = label(2);
        indexes.register_label(person).unwrap();
        indexes.register_label(city).unwrap();

        indexes.note_vertex(&vertex(3, person, "c"));
        indexes.note_vertex(&vertex(1, person, "a"));
        indexes.note_vertex(&vertex(2, city, "b"));

        let ids: Vec<VertexId> = indexes.scan_label(person).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(indexes.approximate_label_count(person), 2);
        assert_eq!(indexes.approximate_label_count(city), 1);
    }

    #[test]
    fn property_scan_respects_bounds() {
        let indexes = IndexSet::new();
        let person = label(1);
        indexes.register_property(person, NAME).unwrap();

        for (vid, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            indexes.note_vertex(&vertex(vid, person, name));
        }

        let all: Vec<VertexId> = indexes
            .scan_property(person, NAME, Bound::Unbounded, Bound::Unbounded)
            .map(|e| e.vid)
            .collect();
        assert_eq!(all, vec![1, 2, 3]);

        let from_bob: Vec<VertexId> = indexes
            .scan_property(
                person,
                NAME,
                Bound::Included(PropertyValue::String("bob".into())),
                Bound::Unbounded,
            )
            .map(|e| e.vid)
            .collect();
        assert_eq!(from_bob, vec![2, 3]);

        let below_carol: Vec<VertexId> = indexes
            .scan_property(
                person,
                NAME,
                Bound::Unbounded,
                Bound::Excluded(PropertyValue::String("carol".into())),
            )
            .map(|e| e.vid)
            .collect();
        assert_eq!(below_carol, vec![1, 2]);
    }

    #[test]
    fn null_and_nan_never_enter_the_index() {
        let indexes = IndexSet::new();
        let person = label(1);
        indexes.register_property(person, NAME).unwrap();

        let mut props = PropertyRecord::new();
        props.set(NAME, PropertyValue::Double(f64::NAN));
        indexes.note_vertex(&Vertex::new(1, vec![person], props));
        assert_eq!(indexes.approximate_property_count(person, NAME), 0);

        let v = vertex(2, person, "x");
        indexes.note_property_set(&v, NAME, &PropertyValue::Null);
        assert_eq!(indexes.approximate_property_count(person, NAME), 0);
    }

    #[test]
    fn purge_removes_all_entries() {
        let indexes = IndexSet::new();
        let person = label(1);
        indexes.register_label(person).unwrap();
        indexes.register_property(person, NAME).unwrap();

        let v = vertex(1, person, "alice");
        indexes.note_vertex(&v);
        assert_eq!(indexes.approximate_label_count(person), 1);
        assert_eq!(indexes.approximate_property_count(person, NAME), 1);

        indexes.purge_vertex(&v);
        assert_eq!(indexes.approximate_label_count(person), 0);
        assert_eq!(indexes.approximate_property_count(person, NAME), 0);
    }
}
