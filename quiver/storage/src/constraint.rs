//! Existence and unique constraints.
//!
//! Both kinds are enforced on the commit path, under the engine-wide
//! commit lock, so validation always runs against the latest committed
//! state plus the committing transaction's own writes. The unique
//! registry maps value tuples to the vertex that committed them; since
//! commits are serialized, checking and updating the registry in the
//! same critical section gives first-committer-wins exactly.

use std::sync::{Arc, RwLock};

use crossbeam_skiplist::SkipMap;
use quiver_common::{LabelId, PropertyId, PropertyValue, VertexId};

use crate::error::{ConstraintViolation, IndexDefinitionError, StorageResult};
use crate::model::Vertex;

/// `(label, property)`: every committed vertex with the label must
/// carry the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistenceConstraint {
    pub label: LabelId,
    pub property: PropertyId,
}

/// `(label, property-set)`: at most one committed vertex with the
/// label may carry any given value tuple. Tuples with a Null member are
/// exempt.
#[derive(Debug)]
pub struct UniqueConstraint {
    pub label: LabelId,
    pub properties: Vec<PropertyId>,
    registry: SkipMap<Vec<PropertyValue>, VertexId>,
}

impl UniqueConstraint {
    fn new(label: LabelId, properties: Vec<PropertyId>) -> Self {
        Self {
            label,
            properties,
            registry: SkipMap::new(),
        }
    }

    /// The value tuple of `vertex` under this constraint, or `None`
    /// when the vertex lacks the label or any of the properties.
    pub fn tuple_of(&self, vertex: &Vertex) -> Option<Vec<PropertyValue>> {
        if !vertex.has_label(self.label) {
            return None;
        }
        self.properties
            .iter()
            .map(|property| vertex.property(*property).cloned())
            .collect()
    }

    /// The committed owner of `tuple`, if any.
    pub fn owner_of(&self, tuple: &Vec<PropertyValue>) -> Option<VertexId> {
        self.registry.get(tuple).map(|e| *e.value())
    }

    fn insert(&self, tuple: Vec<PropertyValue>, vid: VertexId) {
        self.registry.insert(tuple, vid);
    }

    fn remove_if_owned(&self, tuple: &Vec<PropertyValue>, vid: VertexId) {
        if self.owner_of(tuple) == Some(vid) {
            self.registry.remove(tuple);
        }
    }

    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }
}

/// A registry mutation staged during validation and applied only once
/// the commit is durable.
#[derive(Debug)]
pub struct StagedUnique {
    constraint: Arc<UniqueConstraint>,
    vid: VertexId,
    remove: Option<Vec<PropertyValue>>,
    insert: Option<Vec<PropertyValue>>,
}

/// All constraints of one storage instance.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    existence: RwLock<Vec<ExistenceConstraint>>,
    unique: RwLock<Vec<Arc<UniqueConstraint>>>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== definitions =====

    pub fn register_existence(&self, label: LabelId, property: PropertyId) -> StorageResult<()> {
        let mut existence = self.existence.write().unwrap();
        if existence
            .iter()
            .any(|c| c.label == label && c.property == property)
        {
            return Err(IndexDefinitionError::AlreadyExists(format!(
                "existence constraint on ({label}, {property})"
            ))
            .into());
        }
        existence.push(ExistenceConstraint { label, property });
        Ok(())
    }

    pub fn unregister_existence(&self, label: LabelId, property: PropertyId) -> StorageResult<()> {
        let mut existence = self.existence.write().unwrap();
        match existence
            .iter()
            .position(|c| c.label == label && c.property == property)
        {
            Some(idx) => {
                existence.remove(idx);
                Ok(())
            }
            None => Err(IndexDefinitionError::DoesNotExist(format!(
                "existence constraint on ({label}, {property})"
            ))
            .into()),
        }
    }

    pub fn register_unique(
        &self,
        label: LabelId,
        properties: Vec<PropertyId>,
    ) -> StorageResult<Arc<UniqueConstraint>> {
        let mut unique = self.unique.write().unwrap();
        if unique
            .iter()
            .any(|c| c.label == label && c.properties == properties)
        {
            return Err(IndexDefinitionError::AlreadyExists(format!(
                "unique constraint on ({label}, {properties:?})"
            ))
            .into());
        }
        let constraint = Arc::new(UniqueConstraint::new(label, properties));
        unique.push(constraint.clone());
        Ok(constraint)
    }

    pub fn unregister_unique(
        &self,
        label: LabelId,
        properties: &[PropertyId],
    ) -> StorageResult<()> {
        let mut unique = self.unique.write().unwrap();
        match unique
            .iter()
            .position(|c| c.label == label && c.properties == properties)
        {
            Some(idx) => {
                unique.remove(idx);
                Ok(())
            }
            None => Err(IndexDefinitionError::DoesNotExist(format!(
                "unique constraint on ({label}, {properties:?})"
            ))
            .into()),
        }
    }

    pub fn existence_constraints(&self) -> Vec<ExistenceConstraint> {
        self.existence.read().unwrap().clone()
    }

    pub fn unique_constraints(&self) -> Vec<Arc<UniqueConstraint>> {
        self.unique.read().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.existence.read().unwrap().is_empty() && self.unique.read().unwrap().is_empty()
    }

    // ===== commit-path validation =====

    /// Checks every existence constraint against one vertex state.
    pub fn check_existence(&self, vertex: &Vertex) -> Result<(), ConstraintViolation> {
        for constraint in self.existence.read().unwrap().iter() {
            if vertex.has_label(constraint.label) && vertex.property(constraint.property).is_none()
            {
                return Err(ConstraintViolation::Existence {
                    label: constraint.label,
                    property: constraint.property,
                    gid: vertex.vid(),
                });
            }
        }
        Ok(())
    }

    /// Validates the unique constraints for one touched vertex and
    /// stages the registry updates its commit will need. `old_state` is
    /// the vertex's last committed version, `new_state` the version the
    /// transaction is about to commit (`None` = deleted / nonexistent).
    pub fn check_unique(
        &self,
        vid: VertexId,
        old_state: Option<&Vertex>,
        new_state: Option<&Vertex>,
        staged: &mut Vec<StagedUnique>,
    ) -> Result<(), ConstraintViolation> {
        for constraint in self.unique.read().unwrap().iter() {
            let old_tuple = old_state.and_then(|v| constraint.tuple_of(v));
            let new_tuple = new_state.and_then(|v| constraint.tuple_of(v));
            if old_tuple == new_tuple {
                continue;
            }
            if let Some(tuple) = &new_tuple {
                if let Some(owner) = constraint.owner_of(tuple) {
                    if owner != vid {
                        return Err(ConstraintViolation::Unique {
                            label: constraint.label,
                            properties: constraint.properties.clone(),
                            gid: vid,
                        });
                    }
                }
            }
            staged.push(StagedUnique {
                constraint: constraint.clone(),
                vid,
                remove: old_tuple,
                insert: new_tuple,
            });
        }
        Ok(())
    }

    /// Applies staged registry updates. Called after the commit is
    /// durable, still under the commit lock.
    pub fn apply_staged(&self, staged: Vec<StagedUnique>) {
        for entry in staged {
            if let Some(tuple) = entry.remove {
                entry.constraint.remove_if_owned(&tuple, entry.vid);
            }
            if let Some(tuple) = entry.insert {
                entry.constraint.insert(tuple, entry.vid);
            }
        }
    }

    /// Seeds a unique registry entry during snapshot load or constraint
    /// creation.
    pub fn seed_unique(&self, constraint: &UniqueConstraint, vertex: &Vertex) -> bool {
        match constraint.tuple_of(vertex) {
            Some(tuple) => {
                if constraint.owner_of(&tuple).is_some() {
                    return false;
                }
                constraint.insert(tuple, vertex.vid());
                true
            }
            None => true,
        }
    }
}
