//! Priority shaping of pending write requests.
//!
//! Every frame leaving the session goes through the shaper: a bounded heap
//! sitting between producers (stream writes, control frames, keepalive) and
//! the single sender task. Control frames preempt data frames; within a
//! class, requests leave in submission order.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::Error;
use crate::frame::Frame;

/// Pending requests the heap will hold before producers block.
pub(crate) const MAX_SHAPER_SIZE: usize = 1024;

/// Write-request class. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Class {
    /// Control signals: `SYN`, `FIN`, `NOP`, `UPD`.
    Ctrl,
    /// Stream payloads: `PSH`.
    Data,
}

/// Outcome delivered to the submitter once the transport write returns.
#[derive(Debug)]
pub(crate) struct WriteResult {
    /// Payload bytes that reached the transport (header excluded).
    pub n: usize,
    pub err: Option<Error>,
}

/// A frame queued for transmission.
pub(crate) struct WriteRequest {
    pub class: Class,
    pub frame: Frame,
    /// Submission order within the session, assigned atomically.
    pub seq: u32,
    /// Signalled exactly once, after the transport write for this request.
    pub result: oneshot::Sender<WriteResult>,
}

/// `true` when `a` was assigned before `b`, tolerating counter wraparound.
fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Heap entry. `BinaryHeap` surfaces its maximum, so the ordering is
/// inverted: the smallest (class, seq) compares greatest and pops first.
struct Pending(WriteRequest);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.class == other.0.class && self.0.seq == other.0.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match other.0.class.cmp(&self.0.class) {
            CmpOrdering::Equal => {
                if self.0.seq == other.0.seq {
                    CmpOrdering::Equal
                } else if seq_before(self.0.seq, other.0.seq) {
                    CmpOrdering::Greater
                } else {
                    CmpOrdering::Less
                }
            }
            reversed => reversed,
        }
    }
}

/// Reorder write requests between the submission side and the sender.
///
/// The ingress arm is live while the heap has room; the egress arm is live
/// while the heap has anything to send. Popping happens only once an egress
/// permit is reserved, so a control frame arriving while a data frame awaits
/// handoff still jumps the queue.
pub(crate) async fn shaper_loop(
    mut die: watch::Receiver<bool>,
    mut ingress: mpsc::Receiver<WriteRequest>,
    egress: mpsc::Sender<WriteRequest>,
) {
    let mut heap: BinaryHeap<Pending> = BinaryHeap::new();
    loop {
        tokio::select! {
            _ = die.wait_for(|&dead| dead) => return,
            req = ingress.recv(), if heap.len() < MAX_SHAPER_SIZE => {
                match req {
                    Some(req) => heap.push(Pending(req)),
                    None => return,
                }
            }
            permit = egress.reserve(), if !heap.is_empty() => {
                match permit {
                    Ok(permit) => {
                        if let Some(Pending(next)) = heap.pop() {
                            permit.send(next);
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}
