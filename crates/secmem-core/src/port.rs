//! Flow-controlled port slots between the controller and its peers.
//!
//! Each port holds at most one blocked packet. A refused send parks the
//! packet in the slot; the peer's retry callback drains it. Attempting a
//! send while the slot is occupied is an invariant violation, never
//! backpressure.

use crate::api::{SimHost, TraceEvent};
use crate::fault::ProtocolError;
use crate::packet::Packet;

/// Identity of one of the controller's three ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortId {
    /// CPU-side response port.
    CpuSide,
    /// Memory-side port carrying the original data accesses.
    Data,
    /// Memory-side port carrying counter, MAC, and tree accesses.
    Meta,
}

fn try_transport<H: SimHost>(id: PortId, host: &mut H, pkt: Packet) -> Result<(), Packet> {
    match id {
        PortId::CpuSide => host.try_cpu_response(pkt),
        PortId::Data => host.try_data_request(pkt),
        PortId::Meta => host.try_meta_request(pkt),
    }
}

/// Single-slot flow-controlled port.
#[derive(Debug)]
pub(crate) struct FlowPort {
    id: PortId,
    blocked: Option<Packet>,
}

impl FlowPort {
    pub(crate) const fn new(id: PortId) -> Self {
        Self { id, blocked: None }
    }

    /// Attempts to send `pkt`; a refusal parks it and reports `false`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SendWhileBlocked`] when the slot is occupied.
    pub(crate) fn send<H: SimHost>(
        &mut self,
        host: &mut H,
        pkt: Packet,
    ) -> Result<bool, ProtocolError> {
        if self.blocked.is_some() {
            return Err(ProtocolError::SendWhileBlocked { port: self.id });
        }

        let addr = pkt.addr;
        match try_transport(self.id, host, pkt) {
            Ok(()) => {
                host.trace(TraceEvent::PacketSent {
                    port: self.id,
                    addr,
                });
                Ok(true)
            }
            Err(refused) => {
                host.trace(TraceEvent::PacketBlocked {
                    port: self.id,
                    addr,
                });
                self.blocked = Some(refused);
                Ok(false)
            }
        }
    }

    /// Drains the blocked slot for a peer-driven retry.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RetryWithoutBlockedPacket`] when the slot is empty.
    pub(crate) fn take_blocked(&mut self) -> Result<Packet, ProtocolError> {
        self.blocked
            .take()
            .ok_or(ProtocolError::RetryWithoutBlockedPacket { port: self.id })
    }

    pub(crate) const fn has_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

/// CPU-side port: a flow slot plus the pending retry-request flag.
#[derive(Debug)]
pub(crate) struct CpuSidePort {
    port: FlowPort,
    need_retry: bool,
}

impl CpuSidePort {
    pub(crate) const fn new() -> Self {
        Self {
            port: FlowPort::new(PortId::CpuSide),
            need_retry: false,
        }
    }

    /// Attempts to send a response upstream; a refusal parks it.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SendWhileBlocked`] when the slot is occupied.
    pub(crate) fn send_response<H: SimHost>(
        &mut self,
        host: &mut H,
        pkt: Packet,
    ) -> Result<bool, ProtocolError> {
        self.port.send(host, pkt)
    }

    /// Drains the parked response for the peer's response retry.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RetryWithoutBlockedPacket`] when the slot is empty.
    pub(crate) fn take_blocked(&mut self) -> Result<Packet, ProtocolError> {
        self.port.take_blocked()
    }

    /// Records that a request was rejected and a retry-request is owed.
    pub(crate) fn set_need_retry(&mut self) {
        self.need_retry = true;
    }

    /// Emits the owed retry-request once the port is completely free.
    pub(crate) fn try_send_retry_request<H: SimHost>(&mut self, host: &mut H) {
        if self.need_retry && !self.port.has_blocked() {
            self.need_retry = false;
            host.send_cpu_retry_request();
            host.trace(TraceEvent::RetryRequested);
        }
    }
}
