//! Error types for the admission protocol.
//!
//! Two kinds of failure exist:
//! - [`ContractViolation`]: a caller broke an invariant between the gate and the
//!   allocator. Not recoverable; callers should surface it and stop.
//! - [`AdmitError::Cancelled`], [`AdmitError::TimedOut`], [`AdmitError::Closed`]:
//!   an admission wait ended before a permit was granted. Shared state is untouched.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::ClientState;
use crate::permit::SlotId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("permit released without a matching acquire (capacity {capacity})")]
    GateOverRelease { capacity: usize },

    #[error("slot {slot} released while already free")]
    SlotAlreadyFree { slot: SlotId },

    #[error("slot {slot} released by {client}, which does not hold it")]
    SlotNotOwned { slot: SlotId, client: String },

    #[error("slot {slot} is outside a pool of {capacity} slots")]
    SlotOutOfRange { slot: SlotId, capacity: usize },

    #[error("permit held but every one of {capacity} slots is occupied")]
    NoFreeSlot { capacity: usize },

    #[error("client {client} cannot move from {from} to {to}")]
    IllegalTransition {
        client: String,
        from: ClientState,
        to: ClientState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmitError {
    #[error("admission wait cancelled")]
    Cancelled,

    #[error("admission wait timed out after {0:?}")]
    TimedOut(Duration),

    #[error("admission gate closed")]
    Closed,

    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl AdmitError {
    /// True for outcomes that leave shared state untouched.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut(_) | Self::Closed)
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("capacity must be at least 1")]
    ZeroCapacity,
}
