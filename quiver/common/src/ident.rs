//! Bidirectional string ↔ small-integer interning.
//!
//! The storage engine keeps three independent mappers: one for label
//! names, one for property-key names, and one for edge-type names. Ids
//! are issued monotonically starting from 1 and a mapping is immutable
//! once issued; the full table is persisted in snapshots.

use std::sync::RwLock;

use dashmap::DashMap;

/// Interns names to dense `u32` ids and resolves them back.
///
/// Lookups by name are lock-free in the common case; issuing a new id
/// takes the table lock once per distinct name.
#[derive(Debug, Default)]
pub struct NameIdMapper {
    ids: DashMap<String, u32>,
    names: RwLock<Vec<String>>,
}

impl NameIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, issuing a fresh one if the name has
    /// never been seen. The second element is `true` when the mapping
    /// was created by this call.
    pub fn intern(&self, name: &str) -> (u32, bool) {
        if let Some(id) = self.ids.get(name) {
            return (*id, false);
        }
        let mut names = self.names.write().unwrap();
        // A racing intern of the same name may have won the lock first.
        if let Some(id) = self.ids.get(name) {
            return (*id, false);
        }
        names.push(name.to_string());
        let id = names.len() as u32;
        self.ids.insert(name.to_string(), id);
        (id, true)
    }

    /// Resolves a name to its id without creating a mapping.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).map(|id| *id)
    }

    /// Resolves an id back to its name.
    pub fn name_of(&self, id: u32) -> Option<String> {
        let names = self.names.read().unwrap();
        names.get(id.checked_sub(1)? as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.names.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full id-ordered name table, for persistence.
    pub fn to_table(&self) -> Vec<String> {
        self.names.read().unwrap().clone()
    }

    /// Rebuilds the mapper from a persisted table. Existing state is
    /// replaced.
    pub fn load_table(&self, table: Vec<String>) {
        let mut names = self.names.write().unwrap();
        self.ids.clear();
        for (idx, name) in table.iter().enumerate() {
            self.ids.insert(name.clone(), idx as u32 + 1);
        }
        *names = table;
    }

    /// Registers a single recovered mapping. Ids replayed from the log
    /// arrive in issue order, so the table grows densely.
    pub fn restore(&self, id: u32, name: String) {
        let mut names = self.names.write().unwrap();
        let idx = (id - 1) as usize;
        if names.len() <= idx {
            names.resize(idx + 1, String::new());
        }
        names[idx] = name.clone();
        self.ids.insert(name, id);
    }
}
