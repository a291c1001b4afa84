//! Shared mock simulation host for the integration suites.

#![allow(dead_code)]

use secmem_core::{Addr, AddrRange, CtrlEvent, MemCmd, Packet, SecMemCtrl, SimHost, Tick, TraceEvent};

/// Recording host: captures issued traffic, scheduled events, and upstream
/// signals, with one-shot refusal knobs for flow-control scenarios.
pub struct MockHost {
    pub now: Tick,
    pub issued_data: Vec<Packet>,
    pub issued_meta: Vec<Packet>,
    pub cpu_responses: Vec<Packet>,
    pub scheduled: Vec<(CtrlEvent, Tick)>,
    pub retry_requests: u32,
    pub range_changes: u32,
    pub functional_addrs: Vec<Addr>,
    pub traces: Vec<TraceEvent>,
    pub ranges: Vec<AddrRange>,
    /// Refuses the next data-port send (one-shot).
    pub refuse_data: bool,
    /// Refuses the next metadata send targeting this address (one-shot).
    pub refuse_meta_addr: Option<Addr>,
    /// Refuses the next CPU-side response send (one-shot).
    pub refuse_cpu_response: bool,
}

impl MockHost {
    pub fn at(now: Tick) -> Self {
        Self {
            now,
            issued_data: Vec::new(),
            issued_meta: Vec::new(),
            cpu_responses: Vec::new(),
            scheduled: Vec::new(),
            retry_requests: 0,
            range_changes: 0,
            functional_addrs: Vec::new(),
            traces: Vec::new(),
            ranges: Vec::new(),
            refuse_data: false,
            refuse_meta_addr: None,
            refuse_cpu_response: false,
        }
    }
}

impl SimHost for MockHost {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule(&mut self, event: CtrlEvent, at: Tick) {
        self.scheduled.push((event, at));
    }

    fn try_data_request(&mut self, pkt: Packet) -> Result<(), Packet> {
        if self.refuse_data {
            self.refuse_data = false;
            return Err(pkt);
        }
        self.issued_data.push(pkt);
        Ok(())
    }

    fn try_meta_request(&mut self, pkt: Packet) -> Result<(), Packet> {
        if self.refuse_meta_addr == Some(pkt.addr) {
            self.refuse_meta_addr = None;
            return Err(pkt);
        }
        self.issued_meta.push(pkt);
        Ok(())
    }

    fn try_cpu_response(&mut self, pkt: Packet) -> Result<(), Packet> {
        if self.refuse_cpu_response {
            self.refuse_cpu_response = false;
            return Err(pkt);
        }
        self.cpu_responses.push(pkt);
        Ok(())
    }

    fn send_cpu_retry_request(&mut self) {
        self.retry_requests += 1;
    }

    fn data_functional_access(&mut self, pkt: &mut Packet) {
        self.functional_addrs.push(pkt.addr);
    }

    fn data_address_ranges(&self) -> Vec<AddrRange> {
        self.ranges.clone()
    }

    fn push_range_change_upstream(&mut self) {
        self.range_changes += 1;
    }

    fn trace(&mut self, event: TraceEvent) {
        self.traces.push(event);
    }
}

/// 64-byte CPU-side read request.
pub fn read_request(addr: Addr) -> Packet {
    Packet::request(MemCmd::ReadReq, addr, 64, 0, 1)
}

/// 64-byte CPU-side write request.
pub fn write_request(addr: Addr, needs_response: bool) -> Packet {
    let mut pkt = Packet::request(MemCmd::WriteReq, addr, 64, 0, 1);
    pkt.needs_response = needs_response;
    pkt
}

/// Responds to the oldest outstanding data-port request.
pub fn respond_data(ctrl: &mut SecMemCtrl, host: &mut MockHost, access_depth: u8) {
    assert!(
        !host.issued_data.is_empty(),
        "a data request must be outstanding"
    );
    let pkt = host.issued_data.remove(0);
    ctrl.recv_timing_resp(host, pkt.into_response(access_depth))
        .expect("data response must correlate");
}

/// Responds to the oldest outstanding metadata request at `addr`.
pub fn respond_meta(ctrl: &mut SecMemCtrl, host: &mut MockHost, addr: Addr, access_depth: u8) {
    let index = host
        .issued_meta
        .iter()
        .position(|pkt| pkt.addr == addr)
        .expect("metadata request must be outstanding");
    let pkt = host.issued_meta.remove(index);
    ctrl.recv_timing_resp(host, pkt.into_response(access_depth))
        .expect("metadata response must correlate");
}

/// Removes and returns the scheduled tick of the first matching event.
pub fn pop_scheduled(host: &mut MockHost, event: CtrlEvent) -> Option<Tick> {
    let index = host.scheduled.iter().position(|(e, _)| *e == event)?;
    Some(host.scheduled.remove(index).1)
}

/// Advances the clock to `at` and fires `event`.
pub fn fire_at(ctrl: &mut SecMemCtrl, host: &mut MockHost, event: CtrlEvent, at: Tick) {
    host.now = at;
    ctrl.fire(host, event).expect("event must fire cleanly");
}
