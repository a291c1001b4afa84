//! Host-facing contract for embedding the controller in a simulator.
//!
//! The host owns the tick clock, the event queue, and the three peer ports;
//! the controller drives them through [`SimHost`]. Every method is invoked
//! from within a controller handler, which runs to completion on the host's
//! event loop.

use crate::layout::{Addr, AddrRange};
use crate::packet::Packet;
use crate::port::PortId;
use crate::timing::Tick;

/// Scheduled controller events; created once and re-armed at absolute ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtrlEvent {
    /// Read-path verification latency has elapsed.
    ReadVerifyFinished,
    /// Write-path verification latency has elapsed.
    WriteVerifyFinished,
    /// Time to issue the re-MAC write for the in-flight store.
    IssueMacWrite,
    /// Time to issue the next pending integrity-tree node write.
    IssueNextMtWrite,
}

/// Externally observable controller phase; at most one transaction is ever
/// in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CtrlPhase {
    /// No transaction in flight; requests are accepted.
    #[default]
    Idle,
    /// A verified read is in flight.
    Read,
    /// A verified write is in flight.
    Write,
}

/// Observation points emitted through [`SimHost::trace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// A CPU-side request was accepted and a transaction opened.
    RequestAccepted {
        /// Verified data address.
        addr: Addr,
        /// True for read requests.
        is_read: bool,
    },
    /// A CPU-side request was rejected while a transaction was in flight.
    RequestRejected {
        /// Address of the rejected request.
        addr: Addr,
    },
    /// A packet went out on a port.
    PacketSent {
        /// Port that carried the packet.
        port: PortId,
        /// Packet address.
        addr: Addr,
    },
    /// A send was refused and the packet parked in the port's slot.
    PacketBlocked {
        /// Port whose peer refused the send.
        port: PortId,
        /// Packet address.
        addr: Addr,
    },
    /// A response was correlated with an outstanding access.
    ResponseMatched {
        /// Response address.
        addr: Addr,
        /// Cache-depth hint the response carried.
        access_depth: u8,
    },
    /// Verification completed and the finish event was scheduled.
    VerifyScheduled {
        /// Absolute tick of the finish event.
        at: Tick,
    },
    /// The transaction tore down and the controller returned to idle.
    TransactionFinished,
    /// A retry-request was sent to the CPU-side peer.
    RetryRequested,
    /// The advertised address range was recomputed or propagated.
    RangeActivity,
}

/// Simulation environment contract consumed by the controller.
pub trait SimHost {
    /// Current simulated tick.
    fn now(&self) -> Tick;

    /// Arms `event` to fire at absolute tick `at`.
    fn schedule(&mut self, event: CtrlEvent, at: Tick);

    /// Attempts a timing request on the data memory port.
    ///
    /// # Errors
    ///
    /// Returns the packet when the peer refuses it; the caller parks it and
    /// resends on the peer's retry.
    fn try_data_request(&mut self, pkt: Packet) -> Result<(), Packet>;

    /// Attempts a timing request on the metadata memory port.
    ///
    /// # Errors
    ///
    /// Returns the packet when the peer refuses it; the caller parks it and
    /// resends on the peer's retry.
    fn try_meta_request(&mut self, pkt: Packet) -> Result<(), Packet>;

    /// Attempts a timing response toward the CPU-side peer.
    ///
    /// # Errors
    ///
    /// Returns the packet when the peer refuses it; the caller parks it and
    /// resends on the peer's response retry.
    fn try_cpu_response(&mut self, pkt: Packet) -> Result<(), Packet>;

    /// Asks the CPU-side peer to resend a previously rejected request.
    fn send_cpu_retry_request(&mut self);

    /// Functional (debug) access forwarded to the data memory port.
    fn data_functional_access(&mut self, pkt: &mut Packet);

    /// Address ranges advertised by the downstream data memory.
    fn data_address_ranges(&self) -> Vec<AddrRange>;

    /// Propagates an address-range change to the CPU-side peer.
    fn push_range_change_upstream(&mut self);

    /// Observation hook; the default discards events.
    fn trace(&mut self, event: TraceEvent) {
        let _ = event;
    }
}
