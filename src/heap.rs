/*! Heap assembly: folding a heap's packets into one reassembled buffer.

A heap is the unit of data SPEAD senders split across packets. Each packet
carries a slice of the heap's payload (`PAYLOAD_OFFSET`/`PAYLOAD_LENGTH`) plus
whatever item pointers happen to address that slice. [`LiveHeap`] accumulates
packets until `HEAP_LENGTH` bytes have arrived; [`Assembler`] (see
[`crate::assembler`]) owns the map of heap-cnt to `LiveHeap` and decides when
to finish one into an emitted [`Heap`].
*/
use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::{self, Descriptor};
use crate::error::{AssembleError, DescriptorError};
use crate::flavour::Flavour;
use crate::item_pointer::{DESCRIPTOR, ItemId, ItemPointer, MANDATORY_IMMEDIATES};
use crate::packet::Packet;

/// A heap still receiving packets.
#[derive(Debug)]
pub struct LiveHeap {
    heap_cnt: u64,
    flavour: Flavour,
    /// Growable payload buffer. Grows in place as `HEAP_LENGTH` grows;
    /// previously-written bytes are never disturbed.
    payload: Vec<u8>,
    /// `HEAP_LENGTH` as last reported. `None` until the first packet arrives.
    total_length: Option<u64>,
    /// Bytes of `payload` that have actually been written by some packet,
    /// used only to decide completion once `total_length` is known.
    bytes_received: u64,
    /// Non-mandatory item pointers seen so far, in first-seen order. A heap
    /// commonly carries several items sharing the same id -- most notably
    /// `DESCRIPTOR`, one per item it describes -- so only an exact
    /// (id, offset) duplicate, which can only arise from a retransmitted
    /// packet, is suppressed.
    items: Vec<ItemPointer>,
    /// Dedup key: `(id, is_addressed, value_or_offset)`, so an immediate's
    /// value and an addressed item's offset never collide in the same set.
    seen: std::collections::HashSet<(ItemId, bool, u64)>,
    /// `(payload_offset, payload_length)` pairs already folded in, so a
    /// retransmitted packet doesn't inflate `bytes_received` and trip
    /// `is_complete` before every distinct range has actually arrived.
    received_ranges: std::collections::HashSet<(u64, u64)>,
}

impl LiveHeap {
    /// Start a new live heap for `heap_cnt`.
    #[must_use]
    pub fn new(heap_cnt: u64, flavour: Flavour) -> Self {
        Self {
            heap_cnt,
            flavour,
            payload: Vec::new(),
            total_length: None,
            bytes_received: 0,
            items: Vec::new(),
            seen: std::collections::HashSet::new(),
            received_ranges: std::collections::HashSet::new(),
        }
    }

    #[must_use]
    pub fn heap_cnt(&self) -> u64 {
        self.heap_cnt
    }

    /// Fold one packet belonging to this heap into it.
    ///
    /// Mandatory immediates missing from the packet, or a payload range that
    /// overflows the heap's declared length, are reported as
    /// [`AssembleError`] -- callers (see [`crate::assembler::Assembler`])
    /// log these and drop the packet rather than propagate them further.
    pub fn add_packet(&mut self, packet: &Packet<'_>) -> Result<(), AssembleError> {
        let mut immediates: HashMap<ItemId, u64> = HashMap::new();
        for ptr in &packet.pointers {
            match *ptr {
                ItemPointer::Immediate { id, value } => {
                    immediates.insert(id, value);
                    if !MANDATORY_IMMEDIATES.contains(&id) && self.seen.insert((id, false, value))
                    {
                        self.items.push(*ptr);
                    }
                }
                ItemPointer::Addressed { id, offset } => {
                    if !MANDATORY_IMMEDIATES.contains(&id) && self.seen.insert((id, true, offset))
                    {
                        self.items.push(*ptr);
                    }
                }
            }
        }

        for id in MANDATORY_IMMEDIATES {
            if !immediates.contains_key(&id) {
                return Err(AssembleError::MissingMandatoryImmediate(id));
            }
        }

        let payload_offset = immediates[&crate::item_pointer::PAYLOAD_OFFSET];
        let payload_length = immediates[&crate::item_pointer::PAYLOAD_LENGTH];
        let heap_length = immediates[&crate::item_pointer::HEAP_LENGTH];

        if self.total_length.is_none_or(|t| heap_length > t) {
            self.total_length = Some(heap_length);
            if (heap_length as usize) > self.payload.len() {
                self.payload.resize(heap_length as usize, 0);
            }
        }
        let total_length = self.total_length.unwrap();

        let end = payload_offset
            .checked_add(payload_length)
            .filter(|&e| e <= total_length)
            .ok_or(AssembleError::PayloadOverflow {
                payload_offset,
                payload_length,
                total_length,
            })?;

        let start = payload_offset as usize;
        let end = end as usize;
        if end > self.payload.len() {
            self.payload.resize(end, 0);
        }
        if payload_length as usize != packet.payload.len() {
            // A sender claiming a length that doesn't match what it sent is
            // malformed the same way an overflowing offset is.
            return Err(AssembleError::PayloadOverflow {
                payload_offset,
                payload_length,
                total_length,
            });
        }
        self.payload[start..end].copy_from_slice(packet.payload);
        if self.received_ranges.insert((payload_offset, payload_length)) {
            self.bytes_received += payload_length;
        }

        Ok(())
    }

    /// Whether every byte of the declared heap length has been received.
    ///
    /// This is necessary but not sufficient for byte-exact completeness when
    /// packets overlap; this is a byte-count heuristic rather than a bitmap
    /// of received ranges.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_length
            .is_some_and(|t| self.bytes_received >= t)
    }

    /// Consume this live heap, producing the emitted, immutable [`Heap`].
    #[must_use]
    pub fn finish(self) -> Heap {
        Heap {
            heap_cnt: self.heap_cnt,
            flavour: self.flavour,
            payload: Arc::from(self.payload.into_boxed_slice()),
            items: self.items,
        }
    }
}

/// A fully reassembled heap, ready for descriptor/value decoding.
///
/// The payload is reference-counted: items derived from it ([`crate::value::Value::Bytes`]
/// and friends) can share it without copying, and it is freed once the heap
/// and every value derived from it have been dropped.
#[derive(Debug, Clone)]
pub struct Heap {
    heap_cnt: u64,
    flavour: Flavour,
    payload: Arc<[u8]>,
    items: Vec<ItemPointer>,
}

impl Heap {
    #[must_use]
    pub fn heap_cnt(&self) -> u64 {
        self.heap_cnt
    }

    #[must_use]
    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    #[must_use]
    pub fn payload(&self) -> &Arc<[u8]> {
        &self.payload
    }

    /// Item pointers carried by this heap, excluding the mandatory
    /// immediates consumed during assembly.
    #[must_use]
    pub fn items(&self) -> &[ItemPointer] {
        &self.items
    }

    /// Byte range of every addressed item in this heap's payload.
    #[must_use]
    pub fn resolve_ranges(&self) -> HashMap<ItemId, std::ops::Range<usize>> {
        crate::item_pointer::resolve_addressed_ranges(&self.items, self.payload.len())
    }

    /// Immediate value of `STREAM_CTRL`, if this heap carries one.
    #[must_use]
    pub fn stream_ctrl(&self) -> Option<u64> {
        self.items.iter().find_map(|p| match *p {
            ItemPointer::Immediate {
                id: crate::item_pointer::STREAM_CTRL,
                value,
            } => Some(value),
            _ => None,
        })
    }

    /// Every raw item this heap carries, as (id, value-or-bytes), excluding
    /// the mandatory immediates consumed during assembly and `DESCRIPTOR`
    /// sub-heaps. This is the consumer API contract's `get_items()`: a
    /// lower-level view than [`crate::item_group::ItemGroup`], for a caller
    /// that wants raw item bytes without resolving descriptors at all.
    #[must_use]
    pub fn raw_items(&self) -> Vec<RawItem<'_>> {
        let ranges = self.resolve_ranges();
        self.items
            .iter()
            .filter(|p| p.id() != DESCRIPTOR)
            .map(|p| match *p {
                ItemPointer::Immediate { id, value } => RawItem::Immediate { id, value },
                ItemPointer::Addressed { id, offset } => RawItem::Addressed {
                    id,
                    bytes: &self.payload[ranges[&id].clone()],
                },
            })
            .collect()
    }

    /// Decode every `DESCRIPTOR` item this heap carries into a
    /// [`Descriptor`]. This is the consumer API contract's
    /// `get_descriptors()`.
    ///
    /// [`crate::item_pointer::resolve_addressed_ranges`] collapses all
    /// `DESCRIPTOR` pointers onto one id, so their individual offsets would
    /// be lost; this resolves each `DESCRIPTOR` pointer's own range directly
    /// against the sorted list of addressed offsets instead.
    pub fn descriptors(&self) -> Result<Vec<Descriptor>, DescriptorError> {
        descriptors_from_items(&self.items, &self.payload, &self.flavour)
    }
}

/// One raw item as carried by a [`Heap`], before descriptor-driven decoding.
#[derive(Debug, Clone, Copy)]
pub enum RawItem<'a> {
    /// An addressed item's resolved byte span within the heap payload.
    Addressed { id: ItemId, bytes: &'a [u8] },
    /// An immediate item's inline bits.
    Immediate { id: ItemId, value: u64 },
}

fn descriptors_from_items(
    items: &[ItemPointer],
    payload: &[u8],
    flavour: &Flavour,
) -> Result<Vec<Descriptor>, DescriptorError> {
    let mut addressed: Vec<(ItemId, usize)> = items
        .iter()
        .filter_map(|p| match *p {
            ItemPointer::Addressed { id, offset } => Some((id, offset as usize)),
            ItemPointer::Immediate { .. } => None,
        })
        .collect();
    addressed.sort_by_key(|&(_, offset)| offset);

    addressed
        .iter()
        .enumerate()
        .filter(|(_, &(id, _))| id == DESCRIPTOR)
        .map(|(i, &(_, start))| {
            let end = addressed
                .get(i + 1)
                .map_or(payload.len(), |&(_, next)| next);
            descriptor::parse(&payload[start..end.max(start)], flavour)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parse_packet;

    fn one_packet_heap(payload: &[u8]) -> Heap {
        let data = crate::packet::test_support::make_packet(48, 1, &[], payload);
        let packet = parse_packet(&data).unwrap();
        let mut live = LiveHeap::new(1, Flavour::default());
        live.add_packet(&packet).unwrap();
        assert!(live.is_complete());
        live.finish()
    }

    #[test]
    fn single_packet_heap_completes() {
        let heap = one_packet_heap(b"hello");
        assert_eq!(&heap.payload()[..], b"hello");
        assert_eq!(heap.heap_cnt(), 1);
    }

    #[test]
    fn growth_preserves_earlier_bytes() {
        // First packet declares a heap of length 10 but only supplies the
        // first half; growing HEAP_LENGTH later must not disturb it.
        let flavour = Flavour::default();
        let mut live = LiveHeap::new(7, flavour);

        let pkt1 = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 7,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 5,
                },
            ],
            payload: b"abcde",
        };
        live.add_packet(&pkt1).unwrap();
        assert!(live.is_complete());

        let pkt2 = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 7,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 10,
                },
            ],
            payload: b"fghij",
        };
        live.add_packet(&pkt2).unwrap();
        assert!(live.is_complete());
        let heap = live.finish();
        assert_eq!(&heap.payload()[..], b"abcdefghij");
    }

    #[test]
    fn duplicate_packet_does_not_fool_completion() {
        // A 10-byte heap split across two packets; the first packet arrives
        // twice before the second one ever shows up. If bytes_received
        // counted the resend, the heap would appear complete after only the
        // first half has actually been written.
        let flavour = Flavour::default();
        let mut live = LiveHeap::new(8, flavour);

        let pkt1 = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 8,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 10,
                },
            ],
            payload: b"abcde",
        };
        live.add_packet(&pkt1).unwrap();
        assert!(!live.is_complete());
        live.add_packet(&pkt1).unwrap();
        assert!(!live.is_complete());

        let pkt2 = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 8,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 10,
                },
            ],
            payload: b"fghij",
        };
        live.add_packet(&pkt2).unwrap();
        assert!(live.is_complete());
        let heap = live.finish();
        assert_eq!(&heap.payload()[..], b"abcdefghij");
    }

    #[test]
    fn overflowing_offset_is_rejected() {
        let pkt = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 1,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 100,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 5,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 10,
                },
            ],
            payload: b"abcde",
        };
        let mut live = LiveHeap::new(1, Flavour::default());
        assert!(matches!(
            live.add_packet(&pkt),
            Err(AssembleError::PayloadOverflow { .. })
        ));
    }

    #[test]
    fn missing_mandatory_immediate_is_rejected() {
        let pkt = Packet {
            heap_address_bits: 48,
            pointers: vec![ItemPointer::Immediate {
                id: crate::item_pointer::HEAP_CNT,
                value: 1,
            }],
            payload: b"",
        };
        let mut live = LiveHeap::new(1, Flavour::default());
        assert!(matches!(
            live.add_packet(&pkt),
            Err(AssembleError::MissingMandatoryImmediate(_))
        ));
    }

    #[test]
    fn multiple_items_sharing_an_id_are_all_kept() {
        // A heap describing two different items carries two DESCRIPTOR
        // pointers, both with id 0x05, at different offsets -- both must
        // survive assembly.
        let descriptor_id = crate::item_pointer::DESCRIPTOR;
        let pkt = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 1,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 0,
                },
                ItemPointer::Addressed {
                    id: descriptor_id,
                    offset: 10,
                },
                ItemPointer::Addressed {
                    id: descriptor_id,
                    offset: 20,
                },
            ],
            payload: b"",
        };
        let mut live = LiveHeap::new(1, Flavour::default());
        live.add_packet(&pkt).unwrap();
        let heap = live.finish();
        assert_eq!(heap.items().len(), 2);
    }

    #[test]
    fn exact_duplicate_pointer_is_suppressed() {
        // A retransmitted packet repeating the same (id, offset) pair must
        // not duplicate the item.
        let descriptor_id = crate::item_pointer::DESCRIPTOR;
        let pkt = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 1,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 0,
                },
                ItemPointer::Addressed {
                    id: descriptor_id,
                    offset: 10,
                },
                ItemPointer::Addressed {
                    id: descriptor_id,
                    offset: 10,
                },
            ],
            payload: b"",
        };
        let mut live = LiveHeap::new(1, Flavour::default());
        live.add_packet(&pkt).unwrap();
        let heap = live.finish();
        assert_eq!(heap.items().len(), 1);
    }

    #[test]
    fn raw_items_exposes_addressed_and_immediate_values_without_descriptors() {
        let pkt = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 1,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: 3,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: 3,
                },
                ItemPointer::Addressed { id: 9, offset: 0 },
                ItemPointer::Immediate { id: 10, value: 42 },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR,
                    offset: 3,
                },
            ],
            payload: b"xyz",
        };
        let mut live = LiveHeap::new(1, Flavour::default());
        live.add_packet(&pkt).unwrap();
        let heap = live.finish();
        let raw = heap.raw_items();
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().any(|r| matches!(
            r,
            RawItem::Addressed { id: 9, bytes } if *bytes == b"xyz"[..]
        )));
        assert!(raw.iter().any(|r| matches!(
            r,
            RawItem::Immediate { id: 10, value: 42 }
        )));
    }

    #[test]
    fn descriptors_decodes_every_descriptor_item() {
        let desc_a = crate::packet::test_support::make_packet(
            48,
            1,
            &[
                ItemPointer::Immediate {
                    id: crate::item_pointer::DESCRIPTOR_ID,
                    value: 9,
                },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR_NAME,
                    offset: 0,
                },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR_FORMAT,
                    offset: 1,
                },
            ],
            &[b'a', b'u', 32],
        );
        let desc_b = crate::packet::test_support::make_packet(
            48,
            1,
            &[
                ItemPointer::Immediate {
                    id: crate::item_pointer::DESCRIPTOR_ID,
                    value: 10,
                },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR_NAME,
                    offset: 0,
                },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR_FORMAT,
                    offset: 1,
                },
            ],
            &[b'b', b'f', 64],
        );
        let mut payload = desc_a.clone();
        payload.extend_from_slice(&desc_b);
        let pkt = Packet {
            heap_address_bits: 48,
            pointers: vec![
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_CNT,
                    value: 1,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_OFFSET,
                    value: 0,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::PAYLOAD_LENGTH,
                    value: payload.len() as u64,
                },
                ItemPointer::Immediate {
                    id: crate::item_pointer::HEAP_LENGTH,
                    value: payload.len() as u64,
                },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR,
                    offset: 0,
                },
                ItemPointer::Addressed {
                    id: crate::item_pointer::DESCRIPTOR,
                    offset: desc_a.len() as u64,
                },
            ],
            payload: &payload,
        };
        let mut live = LiveHeap::new(1, Flavour::default());
        live.add_packet(&pkt).unwrap();
        let heap = live.finish();
        let mut descriptors = heap.descriptors().unwrap();
        descriptors.sort_by_key(|d| d.id);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id, 9);
        assert_eq!(descriptors[0].name, "a");
        assert_eq!(descriptors[1].id, 10);
        assert_eq!(descriptors[1].name, "b");
    }
}
