#![no_main]

use libfuzzer_sys::fuzz_target;
use secmem_core::{
    AddrRange, CtrlEvent, CtrlPhase, MemCmd, Packet, SecMemCtrl, SimHost, Tick, LAYOUT,
};

#[derive(Default)]
struct QueueHost {
    now: Tick,
    pending_data: Vec<Packet>,
    pending_meta: Vec<Packet>,
    due_events: Vec<(CtrlEvent, Tick)>,
    responses: u32,
}

impl SimHost for QueueHost {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule(&mut self, event: CtrlEvent, at: Tick) {
        self.due_events.push((event, at));
    }

    fn try_data_request(&mut self, pkt: Packet) -> Result<(), Packet> {
        self.pending_data.push(pkt);
        Ok(())
    }

    fn try_meta_request(&mut self, pkt: Packet) -> Result<(), Packet> {
        self.pending_meta.push(pkt);
        Ok(())
    }

    fn try_cpu_response(&mut self, _pkt: Packet) -> Result<(), Packet> {
        self.responses += 1;
        Ok(())
    }

    fn send_cpu_retry_request(&mut self) {}

    fn data_functional_access(&mut self, _pkt: &mut Packet) {}

    fn data_address_ranges(&self) -> Vec<AddrRange> {
        vec![AddrRange::new(0, LAYOUT.total_span())]
    }

    fn push_range_change_upstream(&mut self) {}
}

// Random interleavings of requests, responses, and event firings must never
// break a protocol invariant as long as every delivered response answers an
// actually issued packet.
fuzz_target!(|data: &[u8]| {
    let mut ctrl = SecMemCtrl::new();
    let mut host = QueueHost::default();
    let mut bytes = data.iter().copied();

    while let Some(op) = bytes.next() {
        match op % 5 {
            0 | 1 => {
                let line = u64::from(bytes.next().unwrap_or(0))
                    | (u64::from(bytes.next().unwrap_or(0)) << 8);
                let addr = (line * 64) % secmem_core::DATA_SPACE_BYTES;
                let cmd = if op % 5 == 0 {
                    MemCmd::ReadReq
                } else {
                    MemCmd::WriteReq
                };
                let mut pkt = Packet::request(cmd, addr, 64, 0, 1);
                pkt.needs_response = cmd == MemCmd::ReadReq || op & 0x80 == 0;
                ctrl.recv_timing_req(&mut host, pkt)
                    .expect("requests never violate the protocol");
            }
            2 => {
                if host.pending_data.is_empty() {
                    continue;
                }
                let pkt = host.pending_data.remove(0);
                if pkt.is_write() && !pkt.needs_response {
                    continue;
                }
                let depth = bytes.next().unwrap_or(1);
                ctrl.recv_timing_resp(&mut host, pkt.into_response(depth))
                    .expect("data responses always correlate");
            }
            3 => {
                if host.pending_meta.is_empty() {
                    continue;
                }
                let index = usize::from(bytes.next().unwrap_or(0)) % host.pending_meta.len();
                let pkt = host.pending_meta.remove(index);
                let depth = bytes.next().unwrap_or(1);
                ctrl.recv_timing_resp(&mut host, pkt.into_response(depth))
                    .expect("metadata responses always correlate");
            }
            _ => {
                if host.due_events.is_empty() {
                    continue;
                }
                host.due_events.sort_by_key(|(_, at)| *at);
                let (event, at) = host.due_events.remove(0);
                host.now = host.now.max(at);
                ctrl.fire(&mut host, event)
                    .expect("scheduled events always fire cleanly");
            }
        }

        if ctrl.phase() == CtrlPhase::Idle {
            // Only never-acknowledged stores may outlive their transaction.
            assert!(host.pending_meta.is_empty());
            assert!(host.pending_data.iter().all(|pkt| !pkt.needs_response));
        }
    }
});
