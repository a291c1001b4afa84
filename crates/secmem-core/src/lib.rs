//! Cycle-level secure memory controller model.
//!
//! The controller interposes on every read and write between a CPU-side
//! requestor and a physical backing store, fabricating the counter, MAC,
//! and integrity-tree traffic a hardware verification engine would issue
//! and accounting the cryptographic latency before releasing the response.
//! No cryptography is performed; the model is about traffic and timing.

/// Fixed metadata-region map and address derivation.
pub mod layout;
pub use layout::{
    Addr, AddrRange, MetadataLayout, MetadataRegion, COUNTER_BYTES_PER_LINE, DATA_LINE_BYTES,
    DATA_SPACE_BYTES, LAYOUT, MAC_ENTRY_BYTES, MERKLE_FANOUT, MERKLE_LEVELS, NODE_SPACE_BYTES,
    NODE_WRITE_BYTES, STORED_MERKLE_LEVELS,
};

/// Memory packet value type shared by all ports.
pub mod packet;
pub use packet::{MemCmd, Packet};

/// Bind-time and protocol error taxonomy.
pub mod fault;
pub use fault::{ConfigError, ProtocolError};

/// Cryptographic latency model and the monotonic verification clock.
pub mod timing;
pub use timing::{ChargeClock, CryptoStage, Tick, HASH_CYCLES, MAC_CYCLES, TICKS_PER_CYCLE};

/// Host-facing simulation contract.
pub mod api;
pub use api::{CtrlEvent, CtrlPhase, SimHost, TraceEvent};

/// Flow-controlled port slots.
pub mod port;
pub use port::PortId;

/// Verification orchestrator and transaction state machine.
pub mod ctrl;
pub use ctrl::SecMemCtrl;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
