/*! A stream: one assembler, one ring, shared by however many readers feed it.

A [`Stream`] is the unit of heap reassembly. Every packet handed to it --
regardless of which [`crate::reader::Reader`] produced it -- folds into the
same [`crate::assembler::Assembler`], serialized behind a mutex since
multiple worker threads (see [`crate::receiver::Receiver`]) may call
[`Stream::add_packet`] concurrently. Completed heaps are pushed onto a
[`crate::ring::Ring`] for the consumer to drain via [`Stream::iter`] or
[`Stream::next_heap`].
*/
use std::sync::Mutex;

use log::warn;

use crate::assembler::{AddPacketOutcome, Assembler, DEFAULT_MAX_HEAPS};
use crate::error::Result;
use crate::flavour::Flavour;
use crate::heap::Heap;
use crate::packet::parse_packet;
use crate::ring::Ring;

/// Configuration for a new [`Stream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Wire-format flavour new heaps are assembled with.
    pub flavour: Flavour,
    /// Heaps kept open concurrently before the oldest is evicted.
    pub max_heaps: usize,
    /// Completed heaps the ring holds before a producer blocks.
    pub ring_capacity: usize,
    /// When true, a producer facing a full ring drops the oldest queued
    /// heap rather than blocking. When false (the default), producers
    /// block until the consumer makes room.
    pub lossy: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flavour: Flavour::default(),
            max_heaps: DEFAULT_MAX_HEAPS,
            ring_capacity: 8,
            lossy: false,
        }
    }
}

/// One heap-reassembly pipeline: packets in, completed [`Heap`]s out.
pub struct Stream {
    assembler: Mutex<Assembler>,
    ring: Ring,
}

impl Stream {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            assembler: Mutex::new(Assembler::new(config.flavour, config.max_heaps)),
            ring: Ring::with_lossy(config.ring_capacity, config.lossy),
        }
    }

    /// Parse and fold one raw packet into this stream's assembler.
    ///
    /// Malformed packets are logged and dropped rather than propagated,
    /// matching the way [`crate::assembler::Assembler`] handles malformed
    /// heaps: only the consumer-facing decode path (descriptors, item
    /// values) returns errors to callers. Returns `true` as long as the
    /// stream is still accepting packets; `false` once it has been closed,
    /// by a `STREAM_CTRL` stop heap or by [`Stream::close`].
    pub fn add_packet(&self, data: &[u8]) -> Result<bool> {
        if self.ring.is_closed() {
            return Ok(false);
        }
        let packet = match parse_packet(data) {
            Ok(p) => p,
            Err(e) => {
                warn!("dropping malformed packet: {e}");
                return Ok(true);
            }
        };

        let outcome = {
            let mut assembler = self.assembler.lock()?;
            assembler.add_packet(&packet)
        };

        match outcome {
            AddPacketOutcome::Pending => Ok(true),
            AddPacketOutcome::HeapComplete(heap) => Ok(self.ring.push(heap)?),
            AddPacketOutcome::StreamStop => {
                self.ring.close()?;
                Ok(false)
            }
        }
    }

    /// Block for the next completed heap, or `None` once the stream is
    /// closed and drained.
    pub fn next_heap(&self) -> Result<Option<Heap>> {
        self.ring.pop()
    }

    /// Close the stream: refuse further packets, and wake any consumer
    /// blocked waiting for the next heap so it can observe the close.
    pub fn close(&self) -> Result<()> {
        self.ring.close()
    }

    /// Force-emit every heap still being assembled, pushing each onto the
    /// ring as-is (possibly incomplete). Called by [`crate::receiver::Receiver::start`]
    /// once every buffer reader it manages has been drained, so a heap
    /// that never received its final packet is still handed to the
    /// consumer rather than discarded in place.
    pub fn flush(&self) -> Result<()> {
        let heaps = self.assembler.lock()?.flush();
        for heap in heaps {
            self.ring.push(heap)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    #[must_use]
    pub fn flavour(&self) -> Flavour {
        self.assembler
            .lock()
            .map(|a| a.flavour())
            .unwrap_or_default()
    }

    /// An iterator draining completed heaps, ending when the stream closes.
    #[must_use]
    pub fn iter(&self) -> StreamIter<'_> {
        StreamIter { stream: self }
    }
}

/// Iterator adapter over [`Stream::next_heap`].
pub struct StreamIter<'a> {
    stream: &'a Stream,
}

impl Iterator for StreamIter<'_> {
    type Item = Heap;

    fn next(&mut self) -> Option<Heap> {
        self.stream.next_heap().ok().flatten()
    }
}
