//! Per-entity script dispatch table.
//!
//! Each entry is one script function plus the entities that receive a call
//! to it every tick. Entries and the entities within an entry are kept in
//! registration order, which is also the call order. The [`Context`] tag is
//! stored with the entry for grouping but does not change the order.
//!
//! Which functions an entity is registered against is tracked in an
//! [`IndexRegistry`], so removing an entity touches only the entries it
//! belongs to.

use crate::resources::indexregistry::IndexRegistry;
use crate::resources::scene::InstanceId;
use log::warn;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Grouping tag of a dispatch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    GamePlay,
    Physics,
    Graphics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEntry {
    pub function: String,
    pub context: Context,
    pub entities: Vec<InstanceId>,
}

#[derive(Default)]
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
    by_name: FxHashMap<String, usize>,
    memberships: IndexRegistry<InstanceId, SmallVec<[usize; 4]>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty entity list for `function`.
    ///
    /// Returns `false` if the function already had one; its entities and
    /// context are kept.
    pub fn add_function(&mut self, function: &str, context: Context) -> bool {
        if let Some(&index) = self.by_name.get(function) {
            let existing = self.entries[index].context;
            if existing != context {
                warn!(
                    target: "lua",
                    "'{}' is already registered under {:?}, ignoring {:?}",
                    function, existing, context
                );
            }
            return false;
        }
        self.by_name.insert(function.to_string(), self.entries.len());
        self.entries.push(DispatchEntry {
            function: function.to_string(),
            context,
            entities: Vec::new(),
        });
        true
    }

    pub fn contains_function(&self, function: &str) -> bool {
        self.by_name.contains_key(function)
    }

    /// Append `entity` to the list of `function`.
    ///
    /// Registering the same pair again appends it again, so the function is
    /// called once per registration.
    ///
    /// # Panics
    ///
    /// Panics if `function` was never added.
    pub fn register_entity(&mut self, function: &str, entity: InstanceId) {
        let index = match self.by_name.get(function) {
            Some(&index) => index,
            None => panic!("DispatchTable: no script function '{}' registered", function),
        };
        if !self.memberships.contains(entity) {
            self.memberships.insert(entity, SmallVec::new());
        }
        if let Some(member_of) = self.memberships.get_mut(entity) {
            if !member_of.contains(&index) {
                member_of.push(index);
            }
        }
        self.entries[index].entities.push(entity);
    }

    /// Drop every registration of `entity`. Returns how many were removed.
    pub fn unregister_entity(&mut self, entity: InstanceId) -> usize {
        if !self.memberships.contains(entity) {
            return 0;
        }
        let member_of = self.memberships.erase(entity);
        let mut removed = 0;
        for &index in &member_of {
            let entities = &mut self.entries[index].entities;
            let before = entities.len();
            entities.retain(|&e| e != entity);
            removed += before - entities.len();
        }
        removed
    }

    pub fn entries(&self) -> &[DispatchEntry] {
        &self.entries
    }

    /// Every `(function, entity)` pair in call order.
    pub fn calls(&self) -> impl Iterator<Item = (&str, InstanceId)> {
        self.entries.iter().flat_map(|entry| {
            entry
                .entities
                .iter()
                .map(move |&entity| (entry.function.as_str(), entity))
        })
    }

    /// Functions `entity` is registered against, in registration order of
    /// the functions.
    pub fn functions_of(&self, entity: InstanceId) -> Vec<&str> {
        let mut indices: Vec<usize> = match self.memberships.get(entity) {
            Some(member_of) => member_of.to_vec(),
            None => return Vec::new(),
        };
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|index| self.entries[index].function.as_str())
            .collect()
    }
}
