//! Error taxonomy for bind-time configuration checks and protocol
//! invariant violations.
//!
//! Nothing here is recoverable: a [`ConfigError`] means the controller was
//! bound to a backing store it cannot cover, and a [`ProtocolError`] means a
//! peer or the controller itself broke the packet protocol. Flow-control
//! refusals and wrong-state rejections are modeled as waits, not errors.

use thiserror::Error;

use crate::api::CtrlEvent;
use crate::layout::Addr;
use crate::port::PortId;

/// Bind-time failures raised while validating the downstream address map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// The downstream advertised a number of ranges other than one.
    #[error("downstream advertised {count} ranges, expected exactly one")]
    RangeCountMismatch {
        /// Number of ranges the downstream advertised.
        count: usize,
    },
    /// The downstream range is interleaved across channels.
    #[error("downstream range is interleaved")]
    InterleavedRange,
    /// The downstream range does not start at address zero.
    #[error("downstream range starts at {start:#x}, expected 0")]
    NonZeroRangeBase {
        /// Advertised range start.
        start: Addr,
    },
    /// The downstream range end does not cover the metadata map exactly.
    #[error("downstream range ends at {actual:#x}, expected {expected:#x}")]
    RangeEndMismatch {
        /// End required by the metadata map.
        expected: Addr,
        /// End the downstream advertised.
        actual: Addr,
    },
}

/// Packet-protocol invariant violations; fatal wherever they surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProtocolError {
    /// A response arrived while no transaction was in flight.
    #[error("response for {addr:#x} arrived with no transaction in flight")]
    ResponseOutsideTransaction {
        /// Address of the stray response.
        addr: Addr,
    },
    /// A response address matched none of the transaction's derivable
    /// addresses.
    #[error("response address {addr:#x} matches no outstanding access")]
    UnmatchedResponseAddr {
        /// Address of the unmatched response.
        addr: Addr,
    },
    /// A retried packet's address matched none of the transaction's
    /// derivable addresses.
    #[error("retried packet address {addr:#x} matches no outstanding access")]
    UnmatchedRetryAddr {
        /// Address of the unmatched packet.
        addr: Addr,
    },
    /// A send was attempted while the port's blocked slot was occupied.
    #[error("send attempted on {port:?} while a packet is blocked")]
    SendWhileBlocked {
        /// Port whose slot was occupied.
        port: PortId,
    },
    /// A peer signalled a retry but no packet was parked on the port.
    #[error("retry received on {port:?} with no blocked packet")]
    RetryWithoutBlockedPacket {
        /// Port that received the retry.
        port: PortId,
    },
    /// A write acknowledgement arrived for a request that demanded none.
    #[error("write acknowledgement for {addr:#x} on a no-response request")]
    UnexpectedWriteAck {
        /// Address of the acknowledged write.
        addr: Addr,
    },
    /// A parent-context probe completed before the level's node write.
    #[error("tree probe at level {level} completed before its node write")]
    ProbeBeforeNodeWrite {
        /// Tree level of the early probe.
        level: usize,
    },
    /// A held node's address failed the completion sanity check.
    #[error("tree node at level {level} holds {actual:#x}, expected {expected:#x}")]
    NodeAddrMismatch {
        /// Tree level being checked.
        level: usize,
        /// Address the derivation expects.
        expected: Addr,
        /// Address the held node carries.
        actual: Addr,
    },
    /// The next-node-write scan found every slot already filled.
    #[error("no tree level is pending a node write")]
    NoPendingNodeWrite,
    /// A scheduled event fired in a state that cannot accept it.
    #[error("event {event:?} fired outside a matching transaction")]
    EventOutsideTransaction {
        /// Event that fired.
        event: CtrlEvent,
    },
    /// A verify-finish event fired with no response packet to forward.
    #[error("verification finished with no response packet held")]
    MissingResponsePacket,
}
