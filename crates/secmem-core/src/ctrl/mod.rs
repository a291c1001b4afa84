//! Verification orchestrator: the transaction state machine that fans out
//! metadata traffic, correlates responses, and schedules completion.
//!
//! One transaction is in flight at a time. Requests arriving while non-idle
//! are rejected with a retry signal; the transaction record lives inside the
//! state tag so its slots cannot be touched while idle.

#![allow(clippy::cast_possible_truncation)]

mod read;
mod write;

use crate::api::{CtrlEvent, CtrlPhase, SimHost, TraceEvent};
use crate::fault::{ConfigError, ProtocolError};
use crate::layout::{
    Addr, AddrRange, MetadataLayout, COUNTER_BYTES_PER_LINE, LAYOUT, MAC_ENTRY_BYTES,
    NODE_SPACE_BYTES, NODE_WRITE_BYTES, STORED_MERKLE_LEVELS,
};
use crate::packet::{MemCmd, Packet};
use crate::port::{CpuSidePort, FlowPort, PortId};
use crate::timing::ChargeClock;

/// In-flight transaction record; exists only while the state is non-idle.
#[derive(Debug)]
struct Transaction {
    addr: Addr,
    cnt_offset: Addr,
    flags: u32,
    requestor_id: u16,
    needs_response: bool,
    charge: ChargeClock,
    verify_scheduled: bool,
    response_pkt: Option<Packet>,
    counter_pkt: Option<Packet>,
    mac_pkt: Option<Packet>,
    mt_pkts: [Option<Packet>; STORED_MERKLE_LEVELS],
}

impl Transaction {
    fn capture(pkt: &Packet) -> Self {
        Self {
            addr: pkt.addr,
            cnt_offset: MetadataLayout::counter_offset(pkt.addr),
            flags: pkt.flags,
            requestor_id: pkt.requestor_id,
            needs_response: pkt.needs_response,
            charge: ChargeClock::new(),
            verify_scheduled: false,
            response_pkt: None,
            counter_pkt: None,
            mac_pkt: None,
            mt_pkts: Default::default(),
        }
    }

    fn scalar_trio_filled(&self) -> bool {
        self.response_pkt.is_some() && self.counter_pkt.is_some() && self.mac_pkt.is_some()
    }

    /// True when every tree slot up to the first depth-zero level is held,
    /// or all stored levels are held.
    fn tree_settled(&self) -> bool {
        for slot in &self.mt_pkts {
            let Some(node) = slot else { return false };
            if node.access_depth == 0 {
                break;
            }
        }
        true
    }

    fn first_empty_level(&self) -> Option<usize> {
        self.mt_pkts.iter().position(Option::is_none)
    }
}

#[derive(Debug)]
enum CtrlState {
    Idle,
    Read(Transaction),
    Write(Transaction),
}

fn match_node_level(
    layout: &MetadataLayout,
    cnt_offset: Addr,
    addr: Addr,
    write_aligned: bool,
) -> Option<usize> {
    (0..STORED_MERKLE_LEVELS).find(|&level| {
        let expected = if write_aligned {
            layout.node_write_addr(level, cnt_offset)
        } else {
            layout.node_read_addr(level, cnt_offset)
        };
        expected == addr
    })
}

fn issue_counter_read<H: SimHost>(
    layout: &MetadataLayout,
    meta_port: &mut FlowPort,
    host: &mut H,
    txn: &Transaction,
) -> Result<(), ProtocolError> {
    let pkt = Packet::request(
        MemCmd::ReadReq,
        layout.counter_addr(txn.addr),
        COUNTER_BYTES_PER_LINE as u32,
        txn.flags,
        txn.requestor_id,
    );
    meta_port.send(host, pkt).map(|_| ())
}

fn issue_mac<H: SimHost>(
    layout: &MetadataLayout,
    meta_port: &mut FlowPort,
    host: &mut H,
    txn: &Transaction,
    cmd: MemCmd,
) -> Result<(), ProtocolError> {
    let pkt = Packet::request(
        cmd,
        layout.mac_addr(txn.addr),
        MAC_ENTRY_BYTES as u32,
        txn.flags,
        txn.requestor_id,
    );
    meta_port.send(host, pkt).map(|_| ())
}

fn issue_node_read<H: SimHost>(
    layout: &MetadataLayout,
    meta_port: &mut FlowPort,
    host: &mut H,
    txn: &Transaction,
    level: usize,
) -> Result<(), ProtocolError> {
    let pkt = Packet::request(
        MemCmd::ReadReq,
        layout.node_read_addr(level, txn.cnt_offset),
        NODE_SPACE_BYTES as u32,
        txn.flags,
        txn.requestor_id,
    );
    meta_port.send(host, pkt).map(|_| ())
}

fn issue_node_write<H: SimHost>(
    layout: &MetadataLayout,
    meta_port: &mut FlowPort,
    host: &mut H,
    txn: &Transaction,
    level: usize,
) -> Result<(), ProtocolError> {
    let pkt = Packet::request(
        MemCmd::WriteReq,
        layout.node_write_addr(level, txn.cnt_offset),
        NODE_WRITE_BYTES as u32,
        txn.flags,
        txn.requestor_id,
    );
    meta_port.send(host, pkt).map(|_| ())
}

/// Secure memory controller: interposes on a data range and models the
/// counter, MAC, and integrity-tree traffic each access generates.
#[derive(Debug)]
pub struct SecMemCtrl {
    layout: MetadataLayout,
    cpu_side: CpuSidePort,
    data_port: FlowPort,
    meta_port: FlowPort,
    state: CtrlState,
}

impl Default for SecMemCtrl {
    fn default() -> Self {
        Self::new()
    }
}

impl SecMemCtrl {
    /// Creates an idle controller over the canonical metadata layout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            layout: LAYOUT,
            cpu_side: CpuSidePort::new(),
            data_port: FlowPort::new(PortId::Data),
            meta_port: FlowPort::new(PortId::Meta),
            state: CtrlState::Idle,
        }
    }

    /// Externally observable phase of the transaction state machine.
    #[must_use]
    pub const fn phase(&self) -> CtrlPhase {
        match self.state {
            CtrlState::Idle => CtrlPhase::Idle,
            CtrlState::Read(_) => CtrlPhase::Read,
            CtrlState::Write(_) => CtrlPhase::Write,
        }
    }

    /// The metadata layout this controller derives addresses from.
    #[must_use]
    pub const fn layout(&self) -> &MetadataLayout {
        &self.layout
    }

    /// Timing request from the CPU-side peer. `Ok(false)` rejects the
    /// request because a transaction is in flight; the peer must retry
    /// after the upstream retry-request.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] on a port invariant violation while fanning out.
    pub fn recv_timing_req<H: SimHost>(
        &mut self,
        host: &mut H,
        pkt: Packet,
    ) -> Result<bool, ProtocolError> {
        if !matches!(self.state, CtrlState::Idle) {
            host.trace(TraceEvent::RequestRejected { addr: pkt.addr });
            self.cpu_side.set_need_retry();
            return Ok(false);
        }

        let txn = Transaction::capture(&pkt);
        let is_read = pkt.is_read();
        host.trace(TraceEvent::RequestAccepted {
            addr: pkt.addr,
            is_read,
        });

        self.data_port.send(host, pkt)?;
        issue_counter_read(&self.layout, &mut self.meta_port, host, &txn)?;
        if is_read {
            issue_node_read(&self.layout, &mut self.meta_port, host, &txn, 0)?;
            issue_mac(&self.layout, &mut self.meta_port, host, &txn, MemCmd::ReadReq)?;
            self.state = CtrlState::Read(txn);
        } else {
            self.state = CtrlState::Write(txn);
        }
        Ok(true)
    }

    /// Timing response from either memory-side peer, correlated by address.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] when the response matches no outstanding access or
    /// breaks a verification invariant.
    pub fn recv_timing_resp<H: SimHost>(
        &mut self,
        host: &mut H,
        pkt: Packet,
    ) -> Result<(), ProtocolError> {
        let addr = pkt.addr;
        let access_depth = pkt.access_depth;
        match &mut self.state {
            CtrlState::Idle => {
                return Err(ProtocolError::ResponseOutsideTransaction { addr });
            }
            CtrlState::Read(txn) => {
                read::on_response(&self.layout, &mut self.meta_port, host, txn, pkt)?;
            }
            CtrlState::Write(txn) => {
                write::on_response(&self.layout, &mut self.meta_port, host, txn, pkt)?;
            }
        }
        host.trace(TraceEvent::ResponseMatched { addr, access_depth });
        Ok(())
    }

    /// Request retry from a memory-side peer: drains the port's parked
    /// packet, re-identifies its role by address, and resends it.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] when no packet is parked or its address matches no
    /// outstanding access.
    pub fn recv_req_retry<H: SimHost>(
        &mut self,
        host: &mut H,
        port: PortId,
    ) -> Result<(), ProtocolError> {
        let pkt = match port {
            PortId::Data => self.data_port.take_blocked()?,
            PortId::Meta => self.meta_port.take_blocked()?,
            PortId::CpuSide => {
                return Err(ProtocolError::RetryWithoutBlockedPacket { port });
            }
        };
        self.resend_matched(host, pkt)
    }

    /// Response retry from the CPU-side peer: re-attempts the parked
    /// response and tears the transaction down on success.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] when no response is parked or no transaction is in
    /// flight.
    pub fn recv_resp_retry<H: SimHost>(&mut self, host: &mut H) -> Result<(), ProtocolError> {
        let pkt = self.cpu_side.take_blocked()?;
        if matches!(self.state, CtrlState::Idle) {
            return Err(ProtocolError::ResponseOutsideTransaction { addr: pkt.addr });
        }
        self.try_respond_and_teardown(host, pkt)
    }

    /// Fires a previously scheduled controller event.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] when the event does not belong to the current
    /// state.
    pub fn fire<H: SimHost>(&mut self, host: &mut H, event: CtrlEvent) -> Result<(), ProtocolError> {
        match event {
            CtrlEvent::ReadVerifyFinished => self.finish_read(host),
            CtrlEvent::WriteVerifyFinished => self.finish_write(host),
            CtrlEvent::IssueMacWrite => match &self.state {
                CtrlState::Write(txn) => issue_mac(
                    &self.layout,
                    &mut self.meta_port,
                    host,
                    txn,
                    MemCmd::WriteReq,
                ),
                CtrlState::Idle | CtrlState::Read(_) => {
                    Err(ProtocolError::EventOutsideTransaction { event })
                }
            },
            CtrlEvent::IssueNextMtWrite => match &self.state {
                CtrlState::Write(txn) => {
                    let level = txn
                        .first_empty_level()
                        .ok_or(ProtocolError::NoPendingNodeWrite)?;
                    issue_node_write(&self.layout, &mut self.meta_port, host, txn, level)
                }
                CtrlState::Idle | CtrlState::Read(_) => {
                    Err(ProtocolError::EventOutsideTransaction { event })
                }
            },
        }
    }

    /// Functional (debug) access; passes through to the data memory port.
    pub fn recv_functional<H: SimHost>(&mut self, host: &mut H, pkt: &mut Packet) {
        host.data_functional_access(pkt);
    }

    /// Validates the downstream map and narrows it to the data region for
    /// upstream advertisement.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the downstream advertises anything other than a
    /// single flat range covering exactly the metadata map.
    pub fn advertised_address_ranges<H: SimHost>(
        &self,
        host: &mut H,
    ) -> Result<Vec<AddrRange>, ConfigError> {
        let ranges = host.data_address_ranges();
        if ranges.len() != 1 {
            return Err(ConfigError::RangeCountMismatch {
                count: ranges.len(),
            });
        }
        let range = ranges[0];
        if range.interleaved {
            return Err(ConfigError::InterleavedRange);
        }
        if range.start != 0 {
            return Err(ConfigError::NonZeroRangeBase { start: range.start });
        }
        let expected = self.layout.total_span();
        if range.end != expected {
            return Err(ConfigError::RangeEndMismatch {
                expected,
                actual: range.end,
            });
        }

        host.trace(TraceEvent::RangeActivity);
        Ok(vec![AddrRange::new(0, self.layout.cnt_border())])
    }

    /// Downstream range change; propagated upstream.
    pub fn recv_range_change<H: SimHost>(&mut self, host: &mut H) {
        host.push_range_change_upstream();
        host.trace(TraceEvent::RangeActivity);
    }

    fn resend_matched<H: SimHost>(
        &mut self,
        host: &mut H,
        pkt: Packet,
    ) -> Result<(), ProtocolError> {
        let (txn_addr, cnt_offset, in_read_state) = match &self.state {
            CtrlState::Idle => {
                return Err(ProtocolError::UnmatchedRetryAddr { addr: pkt.addr });
            }
            CtrlState::Read(txn) => (txn.addr, txn.cnt_offset, true),
            CtrlState::Write(txn) => (txn.addr, txn.cnt_offset, false),
        };

        let addr = pkt.addr;
        if addr == txn_addr {
            return self.data_port.send(host, pkt).map(|_| ());
        }
        if addr == self.layout.counter_addr(txn_addr) || addr == self.layout.mac_addr(txn_addr) {
            return self.meta_port.send(host, pkt).map(|_| ());
        }

        // In the write state, parent-context probes travel read-aligned
        // while node writes travel write-aligned; the command decides.
        let write_aligned = !in_read_state && pkt.is_write();
        if match_node_level(&self.layout, cnt_offset, addr, write_aligned).is_some() {
            return self.meta_port.send(host, pkt).map(|_| ());
        }

        Err(ProtocolError::UnmatchedRetryAddr { addr })
    }

    fn finish_read<H: SimHost>(&mut self, host: &mut H) -> Result<(), ProtocolError> {
        let CtrlState::Read(txn) = &mut self.state else {
            return Err(ProtocolError::EventOutsideTransaction {
                event: CtrlEvent::ReadVerifyFinished,
            });
        };
        let pkt = txn
            .response_pkt
            .take()
            .ok_or(ProtocolError::MissingResponsePacket)?;
        self.try_respond_and_teardown(host, pkt)
    }

    fn finish_write<H: SimHost>(&mut self, host: &mut H) -> Result<(), ProtocolError> {
        let CtrlState::Write(txn) = &mut self.state else {
            return Err(ProtocolError::EventOutsideTransaction {
                event: CtrlEvent::WriteVerifyFinished,
            });
        };
        if txn.needs_response {
            let pkt = txn
                .response_pkt
                .take()
                .ok_or(ProtocolError::MissingResponsePacket)?;
            self.try_respond_and_teardown(host, pkt)
        } else {
            self.teardown(host);
            Ok(())
        }
    }

    fn try_respond_and_teardown<H: SimHost>(
        &mut self,
        host: &mut H,
        pkt: Packet,
    ) -> Result<(), ProtocolError> {
        if self.cpu_side.send_response(host, pkt)? {
            self.teardown(host);
        }
        Ok(())
    }

    fn teardown<H: SimHost>(&mut self, host: &mut H) {
        self.state = CtrlState::Idle;
        host.trace(TraceEvent::TransactionFinished);
        self.cpu_side.try_send_retry_request(host);
    }
}
