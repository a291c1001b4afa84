//! Prints the metadata traffic one verified read and one verified write
//! generate, with the ticks at which verification completes.

use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

use secmem_core::{
    AddrRange, CtrlEvent, MemCmd, Packet, SecMemCtrl, SimHost, Tick, TraceEvent, LAYOUT,
};

#[derive(Default)]
struct PrintingHost {
    now: Tick,
    pending_data: Vec<Packet>,
    pending_meta: Vec<Packet>,
    due_events: Vec<(CtrlEvent, Tick)>,
}

impl SimHost for PrintingHost {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule(&mut self, event: CtrlEvent, at: Tick) {
        println!("  schedule {event:?} @ {at}");
        self.due_events.push((event, at));
    }

    fn try_data_request(&mut self, pkt: Packet) -> Result<(), Packet> {
        println!(
            "  data  {:?} addr={:#x} size={}",
            pkt.cmd, pkt.addr, pkt.size
        );
        self.pending_data.push(pkt);
        Ok(())
    }

    fn try_meta_request(&mut self, pkt: Packet) -> Result<(), Packet> {
        println!(
            "  meta  {:?} addr={:#x} size={}",
            pkt.cmd, pkt.addr, pkt.size
        );
        self.pending_meta.push(pkt);
        Ok(())
    }

    fn try_cpu_response(&mut self, pkt: Packet) -> Result<(), Packet> {
        println!("  cpu   {:?} addr={:#x}", pkt.cmd, pkt.addr);
        Ok(())
    }

    fn send_cpu_retry_request(&mut self) {
        println!("  cpu   retry-request");
    }

    fn data_functional_access(&mut self, _pkt: &mut Packet) {}

    fn data_address_ranges(&self) -> Vec<AddrRange> {
        vec![AddrRange::new(0, LAYOUT.total_span())]
    }

    fn push_range_change_upstream(&mut self) {}

    fn trace(&mut self, event: TraceEvent) {
        if let TraceEvent::VerifyScheduled { at } = event {
            println!("  verification ready @ {at}");
        }
    }
}

fn respond_meta(ctrl: &mut SecMemCtrl, host: &mut PrintingHost, addr: u64, depth: u8) {
    let index = host
        .pending_meta
        .iter()
        .position(|pkt| pkt.addr == addr)
        .expect("metadata request outstanding");
    let pkt = host.pending_meta.remove(index);
    ctrl.recv_timing_resp(host, pkt.into_response(depth))
        .expect("response correlates");
}

fn fire_next(ctrl: &mut SecMemCtrl, host: &mut PrintingHost) {
    host.due_events.sort_by_key(|(_, at)| *at);
    let (event, at) = host.due_events.remove(0);
    host.now = at;
    ctrl.fire(host, event).expect("event fires cleanly");
}

fn main() {
    let mut ctrl = SecMemCtrl::new();
    let mut host = PrintingHost::default();

    let advertised = ctrl
        .advertised_address_ranges(&mut host)
        .expect("downstream map validates");
    println!(
        "advertised data range: [{:#x}, {:#x})",
        advertised[0].start, advertised[0].end
    );

    println!("verified read @ 0x8000, leaf authenticated by the metadata cache:");
    ctrl.recv_timing_req(&mut host, Packet::request(MemCmd::ReadReq, 0x8000, 64, 0, 1))
        .expect("request handled");
    let ack = host.pending_data.remove(0).into_response(3);
    ctrl.recv_timing_resp(&mut host, ack).expect("data response");
    respond_meta(&mut ctrl, &mut host, LAYOUT.counter_addr(0x8000), 3);
    respond_meta(&mut ctrl, &mut host, LAYOUT.mac_addr(0x8000), 3);
    respond_meta(&mut ctrl, &mut host, LAYOUT.node_read_addr(0, 0x8000 >> 6), 0);
    fire_next(&mut ctrl, &mut host);

    println!("verified write @ 0x8000, tree pruned at the leaf level:");
    host.now = 0;
    ctrl.recv_timing_req(&mut host, Packet::request(MemCmd::WriteReq, 0x8000, 64, 0, 1))
        .expect("request handled");
    let ack = host.pending_data.remove(0).into_response(3);
    ctrl.recv_timing_resp(&mut host, ack).expect("data response");
    respond_meta(&mut ctrl, &mut host, LAYOUT.counter_addr(0x8000), 3);
    fire_next(&mut ctrl, &mut host); // re-MAC write
    fire_next(&mut ctrl, &mut host); // first node write
    respond_meta(&mut ctrl, &mut host, LAYOUT.mac_addr(0x8000), 2);
    respond_meta(&mut ctrl, &mut host, LAYOUT.node_write_addr(0, 0x8000 >> 6), 0);
    fire_next(&mut ctrl, &mut host);
}
