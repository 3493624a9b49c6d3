//! Materialized views of a contract stream.
//!
//! A view holds exactly the contracts that were added and not yet removed,
//! ordered by the arrival of their (latest) addition. Overwriting a present
//! contract keeps its position.

mod builder;

pub use builder::{apply_change, fold, ViewChange};

use crate::types::{Contract, ContractId};
use serde::ser::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

/// Insertion-ordered mapping from contract id to contract.
#[derive(Clone, Debug, Default)]
pub struct MaterializedView {
    /// Contracts by insertion slot.
    entries: BTreeMap<u64, Contract>,
    /// Slot of each present contract.
    slots: HashMap<ContractId, u64>,
    /// Next slot to hand out. Never reused.
    next_slot: u64,
}

impl MaterializedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &ContractId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &ContractId) -> Option<&Contract> {
        self.slots.get(id).and_then(|slot| self.entries.get(slot))
    }

    /// Contracts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Contract> + '_ {
        self.entries.values()
    }

    /// Contract ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &ContractId> + '_ {
        self.entries.values().map(|c| &c.contract_id)
    }

    /// Apply one change in place. Returns true if the view changed.
    pub fn apply(&mut self, change: ViewChange) -> bool {
        match change {
            ViewChange::Added(contract) => {
                self.upsert(contract);
                true
            }
            ViewChange::Removed(id) => self.remove(&id).is_some(),
        }
    }

    /// Insert or overwrite. An overwrite keeps the original position.
    pub(crate) fn upsert(&mut self, contract: Contract) {
        match self.slots.get(&contract.contract_id) {
            Some(&slot) => {
                self.entries.insert(slot, contract);
            }
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.slots.insert(contract.contract_id.clone(), slot);
                self.entries.insert(slot, contract);
            }
        }
    }

    pub(crate) fn remove(&mut self, id: &ContractId) -> Option<Contract> {
        let slot = self.slots.remove(id)?;
        self.entries.remove(&slot)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
    }
}

impl PartialEq for MaterializedView {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Serialize for MaterializedView {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl FromIterator<Contract> for MaterializedView {
    fn from_iter<I: IntoIterator<Item = Contract>>(iter: I) -> Self {
        fold(iter.into_iter().map(ViewChange::Added))
    }
}

impl<'a> IntoIterator for &'a MaterializedView {
    type Item = &'a Contract;
    type IntoIter = std::collections::btree_map::Values<'a, u64, Contract>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}
