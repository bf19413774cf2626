/*! The assembler: the map of in-progress heaps and the policy for finishing
and evicting them.

Packets arrive in any order and may interleave across heaps; the assembler's
job is purely bookkeeping -- [`crate::heap::LiveHeap`] does the actual byte
shuffling. A completed heap is handed to the caller (the [`crate::stream::Stream`]
worker loop) to push onto the ring; a heap that's still open when `max_heaps`
distinct heap-cnts are live gets evicted, oldest first.
*/
use std::collections::VecDeque;

use log::{debug, warn};

use crate::flavour::Flavour;
use crate::heap::{Heap, LiveHeap};
use crate::item_pointer::STREAM_CTRL_STOP_VAL;
use crate::packet::Packet;

/// Default number of heaps the assembler keeps open concurrently before
/// evicting the oldest.
pub const DEFAULT_MAX_HEAPS: usize = 4;

/// Outcome of folding one packet into the assembler.
#[derive(Debug)]
pub enum AddPacketOutcome {
    /// The packet was absorbed; its heap is still incomplete.
    Pending,
    /// The packet completed its heap, which is returned for emission.
    HeapComplete(Heap),
    /// The packet's heap carried a `STREAM_CTRL` stop request.
    StreamStop,
}

/// Owns every heap currently being assembled.
pub struct Assembler {
    flavour: Flavour,
    max_heaps: usize,
    /// Heap-cnts in the order their first packet arrived, oldest first.
    /// Used to decide which heap to evict when `max_heaps` is exceeded.
    order: VecDeque<u64>,
    live: std::collections::HashMap<u64, LiveHeap>,
}

impl Assembler {
    #[must_use]
    pub fn new(flavour: Flavour, max_heaps: usize) -> Self {
        Self {
            flavour,
            max_heaps,
            order: VecDeque::new(),
            live: std::collections::HashMap::new(),
        }
    }

    #[must_use]
    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    /// Fold one already-parsed packet into its heap.
    ///
    /// Malformed-heap errors (missing mandatory immediate, overflowing
    /// payload range) are logged at `warn` and the packet is dropped; they
    /// never propagate to the caller: only the consumer-facing decode path
    /// returns errors.
    pub fn add_packet(&mut self, packet: &Packet<'_>) -> AddPacketOutcome {
        let heap_cnt = match find_heap_cnt(packet) {
            Some(h) => h,
            None => {
                warn!("dropping packet with no HEAP_CNT immediate");
                return AddPacketOutcome::Pending;
            }
        };

        if !self.live.contains_key(&heap_cnt) {
            self.evict_if_full();
            self.live
                .insert(heap_cnt, LiveHeap::new(heap_cnt, self.flavour));
            self.order.push_back(heap_cnt);
        }

        let live = self.live.get_mut(&heap_cnt).expect("just inserted");
        if let Err(e) = live.add_packet(packet) {
            warn!("dropping malformed packet for heap {heap_cnt}: {e}");
            return AddPacketOutcome::Pending;
        }

        if !live.is_complete() {
            return AddPacketOutcome::Pending;
        }

        let live = self.live.remove(&heap_cnt).expect("just matched");
        self.order.retain(|&h| h != heap_cnt);
        let heap = live.finish();
        debug!("heap {heap_cnt} complete ({} bytes)", heap.payload().len());

        if heap.stream_ctrl() == Some(STREAM_CTRL_STOP_VAL) {
            AddPacketOutcome::StreamStop
        } else {
            AddPacketOutcome::HeapComplete(heap)
        }
    }

    /// Evict the oldest live heap if we're already at capacity, matching
    /// the bounded live-heap window. The evicted heap's partial data is
    /// discarded.
    fn evict_if_full(&mut self) {
        if self.live.len() < self.max_heaps {
            return;
        }
        if let Some(oldest) = self.order.pop_front() {
            if self.live.remove(&oldest).is_some() {
                warn!("evicting incomplete heap {oldest}: too many concurrent heaps");
            }
        }
    }

    /// Number of heaps currently open.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Force-emit every live heap as-is, marking none of them as having
    /// necessarily completed. Called once a [`crate::receiver::Receiver`]
    /// has drained every reader feeding this assembler's stream, so
    /// whatever never finished is handed to the consumer rather than
    /// silently lost.
    pub fn flush(&mut self) -> Vec<Heap> {
        self.order.clear();
        self.live
            .drain()
            .map(|(heap_cnt, live)| {
                if !live.is_complete() {
                    warn!("flushing incomplete heap {heap_cnt}");
                }
                live.finish()
            })
            .collect()
    }
}

fn find_heap_cnt(packet: &Packet<'_>) -> Option<u64> {
    packet.pointers.iter().find_map(|p| match *p {
        crate::item_pointer::ItemPointer::Immediate {
            id: crate::item_pointer::HEAP_CNT,
            value,
        } => Some(value),
        _ => None,
    })
}
