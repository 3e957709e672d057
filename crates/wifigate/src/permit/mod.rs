//! Permits and slots for bounded admission.
//!
//! - [`AdmissionGate`] caps how many clients are admitted at once.
//! - [`SlotAllocator`] gives each admitted client a distinct connection number.
//!
//! Each owns its own lock. A client always acquires a gate permit before
//! asking for a slot, which is what guarantees the slot search succeeds.

mod gate;
mod slot;

pub use gate::{AdmissionGate, GateCounts};
pub use slot::{SlotAllocator, SlotId, held_slots};
