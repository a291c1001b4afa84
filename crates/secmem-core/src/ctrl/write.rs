//! Write-path response correlation, sequential tree propagation, and
//! completion detection.
//!
//! A write enters with only the data access and a counter read in flight.
//! The counter response triggers the re-MAC write and the first node
//! write; each node write whose response misses the metadata cache pulls a
//! read-aligned parent-context probe before the next level's write. The
//! root is never written back: the probe at the last stored level closes
//! the chain.

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

    if addr == txn.addr {
        if !txn.needs_response {
            return Err(ProtocolError::UnexpectedWriteAck { addr });
        }
        txn.charge.raise_to(now);
        txn.response_pkt = Some(pkt);
    } else if addr == layout.counter_addr(txn.addr) {
        txn.counter_pkt = Some(pkt);
        host.schedule(
            CtrlEvent::IssueMacWrite,
            now + CryptoStage::MacGenerate.latency(),
        );
        host.schedule(
            CtrlEvent::IssueNextMtWrite,
            now + CryptoStage::NodeHash.latency(),
        );
    } else if addr == layout.mac_addr(txn.addr) {
        txn.mac_pkt = Some(pkt);
        txn.charge.raise_to(now);
    } else if pkt.is_read() {
        // Parent-context probe issued after a node write missed the
        // metadata cache.
        let level = match_node_level(layout, txn.cnt_offset, addr, false)
            .ok_or(ProtocolError::UnmatchedResponseAddr { addr })?;
        if level + 1 == STORED_MERKLE_LEVELS {
            // Last stored level: the parent is the root, which stays
            // implicit. Only the hash latency is charged.
            txn.charge.accrue(now, CryptoStage::NodeHash);
        } else {
            if txn.mt_pkts[level].is_none() {
                return Err(ProtocolError::ProbeBeforeNodeWrite { level });
            }
            host.schedule(
                CtrlEvent::IssueNextMtWrite,
                now + CryptoStage::NodeHash.latency(),
            );
            // Completion is re-checked when the next write lands.
            return Ok(());
        }
    } else {
        let level = match_node_level(layout, txn.cnt_offset, addr, true)
            .ok_or(ProtocolError::UnmatchedResponseAddr { addr })?;
        let pruned = pkt.access_depth == 0;
        txn.mt_pkts[level] = Some(pkt);
        if pruned {
            txn.charge.accrue(now, CryptoStage::NodeHash);
        } else {
            issue_node_read(layout, meta_port, host, txn, level)?;
            // The probe continues the chain; completion waits for it.
            return Ok(());
        }
    }

    try_complete(layout, host, txn)
}

fn try_complete<H: SimHost>(
    layout: &MetadataLayout,
    host: &mut H,
    txn: &mut Transaction,
) -> Result<(), ProtocolError> {
    if txn.verify_scheduled {
        return Ok(());
    }
    if txn.needs_response && txn.response_pkt.is_none() {
        return Ok(());
    }
    if txn.counter_pkt.is_none() || txn.mac_pkt.is_none() || !txn.tree_settled() {
        return Ok(());
    }

    for (level, slot) in txn.mt_pkts.iter().enumerate() {
        let Some(node) = slot else { break };
        let expected = layout.node_write_addr(level, txn.cnt_offset);
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
    host.schedule(CtrlEvent::WriteVerifyFinished, txn.charge.ready_at());
    host.trace(TraceEvent::VerifyScheduled {
        at: txn.charge.ready_at(),
    });
    Ok(())
}
