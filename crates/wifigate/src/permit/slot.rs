//! Slot allocator - lowest-free-wins assignment of connection numbers.
//!
//! Callers must hold an [`AdmissionGate`](super::AdmissionGate) permit before
//! calling [`SlotAllocator::assign`]; with permits capped at the pool size a
//! free slot always exists, so running out is a contract violation. Only the
//! client a slot was assigned to may release it.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::ContractViolation;

/// Index of a connection slot, `0..capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(usize);

impl SlotId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    /// One-based number shown to humans ("Connection 1").
    pub fn connection_number(&self) -> usize {
        self.0 + 1
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowest-free-wins slot table. Each occupied slot remembers its client.
pub struct SlotAllocator {
    owners: Mutex<Vec<Option<String>>>,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            owners: Mutex::new(vec![None; capacity]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<String>>> {
        self.owners.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Slot allocator mutex poisoned - recovering state");
            poisoned.into_inner()
        })
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    pub fn assign(&self, client_id: &str) -> Result<SlotId, ContractViolation> {
        self.assign_and(client_id, |_| {})
    }

    /// Give `client_id` the lowest free slot, running `on_assign` before the lock drops.
    pub fn assign_and<F>(&self, client_id: &str, on_assign: F) -> Result<SlotId, ContractViolation>
    where
        F: FnOnce(SlotId),
    {
        let mut owners = self.lock();
        let Some(index) = owners.iter().position(Option::is_none) else {
            let capacity = owners.len();
            tracing::error!(client = %client_id, capacity, "No free slot for a permit holder");
            return Err(ContractViolation::NoFreeSlot { capacity });
        };

        owners[index] = Some(client_id.to_string());
        let slot = SlotId::new(index);
        on_assign(slot);
        Ok(slot)
    }

    pub fn release(&self, slot: SlotId, client_id: &str) -> Result<(), ContractViolation> {
        self.release_and(slot, client_id, || {})
    }

    /// Free `slot` held by `client_id`, running `on_release` before the lock drops.
    ///
    /// Occupancy is left untouched when the slot is unknown, already free, or
    /// held by another client.
    pub fn release_and<F>(
        &self,
        slot: SlotId,
        client_id: &str,
        on_release: F,
    ) -> Result<(), ContractViolation>
    where
        F: FnOnce(),
    {
        let mut owners = self.lock();
        let capacity = owners.len();
        let Some(owner) = owners.get_mut(slot.index()) else {
            tracing::error!(%slot, capacity, "Release of unknown slot");
            return Err(ContractViolation::SlotOutOfRange { slot, capacity });
        };

        match owner.as_deref() {
            None => {
                tracing::error!(%slot, client = %client_id, "Release of slot that is already free");
                Err(ContractViolation::SlotAlreadyFree { slot })
            }
            Some(holder) if holder != client_id => {
                tracing::error!(%slot, client = %client_id, holder, "Release of slot held by another client");
                Err(ContractViolation::SlotNotOwned {
                    slot,
                    client: client_id.to_string(),
                })
            }
            Some(_) => {
                *owner = None;
                on_release();
                Ok(())
            }
        }
    }

    pub fn is_occupied(&self, slot: SlotId) -> bool {
        self.lock()
            .get(slot.index())
            .is_some_and(Option::is_some)
    }

    /// Client currently holding `slot`, if any.
    pub fn owner(&self, slot: SlotId) -> Option<String> {
        self.lock().get(slot.index()).cloned().flatten()
    }

    pub fn occupied_count(&self) -> usize {
        self.lock().iter().filter(|owner| owner.is_some()).count()
    }

    /// Occupancy by slot index.
    pub fn occupied(&self) -> Vec<bool> {
        self.lock().iter().map(Option::is_some).collect()
    }

    pub fn occupied_slots(&self) -> Vec<SlotId> {
        self.inspect(held_slots)
    }

    /// Run `f` over the owner table while holding the allocator lock.
    ///
    /// Slots cannot change while `f` runs, so anything read inside it is
    /// consistent with the occupancy `f` sees.
    pub fn inspect<R>(&self, f: impl FnOnce(&[Option<String>]) -> R) -> R {
        let owners = self.lock();
        f(&owners)
    }
}

/// Occupied slot ids in an owner table, in slot order.
pub fn held_slots(owners: &[Option<String>]) -> Vec<SlotId> {
    owners
        .iter()
        .enumerate()
        .filter(|(_, owner)| owner.is_some())
        .map(|(index, _)| SlotId::new(index))
        .collect()
}
