//! Slot ↔ client bookkeeping
//!
//! The registry is a bijection between identity slots and client
//! handles. Insertion evicts any previous mapping of either side, so a
//! slot never points at two clients and a client never occupies two
//! slots, whatever order reconnects and disconnects land in.

use lanlink_client::{Client, ClientKey};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ClientRegistry {
    by_slot: HashMap<u32, Arc<dyn Client>>,
    by_key: HashMap<ClientKey, u32>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `slot` to `client`, evicting the slot's previous occupant
    /// and the client's previous slot.
    pub fn add(&mut self, client: Arc<dyn Client>, slot: u32) {
        if let Some(prev) = self.by_slot.remove(&slot) {
            self.by_key.remove(&prev.key());
        }
        if let Some(old_slot) = self.by_key.remove(&client.key()) {
            self.by_slot.remove(&old_slot);
        }
        self.by_key.insert(client.key(), slot);
        self.by_slot.insert(slot, client);
    }

    pub fn get(&self, slot: u32) -> Option<&Arc<dyn Client>> {
        self.by_slot.get(&slot)
    }

    pub fn slot_of(&self, key: ClientKey) -> Option<u32> {
        self.by_key.get(&key).copied()
    }

    /// Removes by slot; absent slots are a no-op.
    pub fn remove_by_slot(&mut self, slot: u32) -> Option<Arc<dyn Client>> {
        let client = self.by_slot.remove(&slot)?;
        self.by_key.remove(&client.key());
        Some(client)
    }

    /// Removes by client key; absent keys are a no-op.
    pub fn remove(&mut self, key: ClientKey) -> Option<Arc<dyn Client>> {
        let slot = self.by_key.remove(&key)?;
        self.by_slot.remove(&slot)
    }

    pub fn count(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_slot.clear();
        self.by_key.clear();
    }

    /// Snapshot of every registered handle.
    pub fn handles(&self) -> Vec<Arc<dyn Client>> {
        self.by_slot.values().cloned().collect()
    }
}
