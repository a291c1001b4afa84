//! Read-path response correlation and completion detection.
//!
//! A read fans out the data access plus counter, leaf-node, and MAC reads
//! up front. The tree walk chains upward one level per response and prunes
//! as soon as a node reports a depth-zero (cache-authenticated) hit.

use crate::api::{CtrlEvent, SimHost, TraceEvent};
use crate::fault::ProtocolError;
use crate::layout::{MetadataLayout, STORED_MERKLE_LEVELS};
use crate::packet::Packet;
use crate::port::FlowPort;
use crate::timing::CryptoStage;

use super::{issue_node_read, match_node_level, Transaction};

pub(super) fn on_response<H: SimHost>(
    layout: &MetadataLayout,
    meta_port: &mut FlowPort,
    host: &mut H,
    txn: &mut Transaction,
    pkt: Packet,
) -> Result<(), ProtocolError> {
    let now = host.now();
    let addr = pkt.addr;
    let had_trio = txn.scalar_trio_filled();

    if addr == txn.addr {
        txn.response_pkt = Some(pkt);
    } else if addr == layout.counter_addr(txn.addr) {
        txn.counter_pkt = Some(pkt);
        txn.charge
            .raise_to(now + CryptoStage::CounterDerive.latency());
    } else if addr == layout.mac_addr(txn.addr) {
        txn.mac_pkt = Some(pkt);
    } else {
        let level = match_node_level(layout, txn.cnt_offset, addr, false)
            .ok_or(ProtocolError::UnmatchedResponseAddr { addr })?;
        txn.charge.accrue(now, CryptoStage::NodeHash);
        let pruned = pkt.access_depth == 0;
        txn.mt_pkts[level] = Some(pkt);
        if !pruned && level + 1 < STORED_MERKLE_LEVELS {
            issue_node_read(layout, meta_port, host, txn, level + 1)?;
        }
    }

    // The response that completes the data/counter/MAC trio pays the final
    // MAC check exactly once.
    if !had_trio && txn.scalar_trio_filled() {
        txn.charge.accrue(now, CryptoStage::MacCheck);
    }

    try_complete(layout, host, txn)
}

fn try_complete<H: SimHost>(
    layout: &MetadataLayout,
    host: &mut H,
    txn: &mut Transaction,
) -> Result<(), ProtocolError> {
    if txn.verify_scheduled || !txn.scalar_trio_filled() || !txn.tree_settled() {
        return Ok(());
    }

    for (level, slot) in txn.mt_pkts.iter().enumerate() {
        let Some(node) = slot else { break };
        let expected = layout.node_read_addr(level, txn.cnt_offset);
        if node.addr != expected {
            return Err(ProtocolError::NodeAddrMismatch {
                level,
                expected,
                actual: node.addr,
            });
        }
        if node.access_depth == 0 {
            break;
        }
    }

    txn.verify_scheduled = true;
    host.schedule(CtrlEvent::ReadVerifyFinished, txn.charge.ready_at());
    host.trace(TraceEvent::VerifyScheduled {
        at: txn.charge.ready_at(),
    });
    Ok(())
}
