//! AdmissionSystem: the gate, the slot allocator and the event sink together.
//!
//! Clients only see two calls: [`AdmissionSystem::admit`] (acquire a permit,
//! then a slot) and [`AdmissionSystem::depart`] (release the slot, then the
//! permit). Everything else is observation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AdmitError, ConfigError, ContractViolation};
use crate::event::ClientEvent;
use crate::permit::{AdmissionGate, SlotAllocator, SlotId, held_slots};
use crate::sink::{EventSink, NullSink};

/// Snapshot of pool state for logging and tests. Not a basis for decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub available_permits: usize,
    pub holders: usize,
    pub waiting: usize,
    pub occupied_slots: Vec<SlotId>,
}

impl PoolSnapshot {
    /// All permits are out.
    pub fn is_busy(&self) -> bool {
        self.available_permits == 0
    }

    /// Nothing held, nothing occupied.
    pub fn is_idle(&self) -> bool {
        self.holders == 0 && self.occupied_slots.is_empty()
    }
}

pub struct AdmissionSystem {
    gate: AdmissionGate,
    slots: SlotAllocator,
    sink: Arc<dyn EventSink>,
}

impl AdmissionSystem {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            gate: AdmissionGate::new(capacity),
            slots: SlotAllocator::new(capacity),
            sink: Arc::new(NullSink),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn capacity(&self) -> usize {
        self.gate.capacity()
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    pub fn emit(&self, event: ClientEvent) {
        self.sink.record(&event);
    }

    /// Wait for a permit, then take the lowest free slot.
    pub async fn admit(&self, client_id: &str) -> Result<SlotId, AdmitError> {
        self.gate.acquire().await?;
        self.assign(client_id)
    }

    /// [`admit`](Self::admit) bounded by `timeout`. On expiry nothing is held.
    pub async fn admit_timeout(
        &self,
        client_id: &str,
        timeout: Duration,
    ) -> Result<SlotId, AdmitError> {
        match tokio::time::timeout(timeout, self.gate.acquire()).await {
            Ok(acquired) => acquired?,
            Err(_) => {
                tracing::debug!(client = %client_id, ?timeout, "Admission wait timed out");
                return Err(AdmitError::TimedOut(timeout));
            }
        }
        self.assign(client_id)
    }

    /// [`admit`](Self::admit) that gives up when `cancel` fires first.
    pub async fn admit_until(
        &self,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SlotId, AdmitError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client = %client_id, "Admission wait cancelled");
                return Err(AdmitError::Cancelled);
            }
            acquired = self.gate.acquire() => acquired?,
        }
        self.assign(client_id)
    }

    // Caller holds a permit.
    fn assign(&self, client_id: &str) -> Result<SlotId, AdmitError> {
        let assigned = self
            .slots
            .assign_and(client_id, |slot| {
                self.sink.record(&ClientEvent::admitted(client_id, slot))
            });

        match assigned {
            Ok(slot) => {
                tracing::debug!(client = %client_id, %slot, "Slot assigned");
                Ok(slot)
            }
            Err(violation) => {
                tracing::error!(client = %client_id, error = %violation, "Admitted client found no slot");
                // Keep the gate count honest even though the pairing is broken.
                if let Err(e) = self.gate.release() {
                    tracing::error!(client = %client_id, error = %e, "Failed to return permit");
                }
                Err(violation.into())
            }
        }
    }

    /// Release `slot`, then the permit. If the slot release is rejected (the
    /// slot is free, or held by someone else) the permit is kept, so a stale or
    /// repeated depart cannot free another client's slot or inflate the gate.
    pub fn depart(&self, client_id: &str, slot: SlotId) -> Result<(), ContractViolation> {
        self.slots.release_and(slot, client_id, || {
            self.sink
                .record(&ClientEvent::disconnected(client_id, slot))
        })?;
        self.gate.release()?;
        tracing::debug!(client = %client_id, %slot, "Slot and permit released");
        Ok(())
    }

    /// Close the gate: queued and future admissions fail with [`AdmitError::Closed`].
    pub fn close(&self) -> usize {
        self.gate.close()
    }

    /// Non-authoritative, for log lines like "waiting".
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Gate counters are read while the allocator lock is held. Every occupied
    /// slot belongs to a client whose permit is counted in `holders`, so a
    /// snapshot always has `occupied_slots.len() <= holders`.
    pub fn snapshot(&self) -> PoolSnapshot {
        self.slots.inspect(|owners| {
            let counts = self.gate.counts();
            PoolSnapshot {
                capacity: counts.capacity,
                available_permits: counts.available,
                holders: counts.holders,
                waiting: counts.waiting,
                occupied_slots: held_slots(owners),
            }
        })
    }
}
