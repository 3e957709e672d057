//! wifigate: bounded admission of clients to a fixed pool of connection slots.

pub mod error;
pub mod event;
pub mod lifecycle;
pub mod permit;
pub mod sink;
pub mod system;

pub use error::{AdmitError, ConfigError, ContractViolation};
pub use event::{ClientEvent, EventKind};
pub use lifecycle::{
    ClientAbort, ClientRecord, ClientState, DeviceKind, Pacing, run_client, run_client_until,
};
pub use permit::{AdmissionGate, GateCounts, SlotAllocator, SlotId};
pub use sink::{ChannelSink, EventSink, FanoutSink, LineSink, NullSink, TracingSink, drain_events};
pub use system::{AdmissionSystem, PoolSnapshot};

pub use tokio_util::sync::CancellationToken;
