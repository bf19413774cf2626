/*! `ItemGroup`: the long-lived, incrementally-updated view of a stream's
items across many heaps.

Descriptors are
applied before values within the same heap (so a heap that introduces and
immediately populates a new item works), and an id with no known descriptor
is silently skipped rather than treated as an error.
*/
use std::collections::HashMap;

use log::debug;

use crate::descriptor::{self, Descriptor};
use crate::error::Result;
use crate::heap::Heap;
use crate::item_pointer::{DESCRIPTOR, ItemId};
use crate::value::{self, Value};

/// One tracked item: its latest known descriptor, and its latest decoded
/// value once at least one heap has supplied one.
#[derive(Debug, Clone)]
pub struct Item {
    pub descriptor: Descriptor,
    pub value: Option<Value>,
}

/// The set of items a stream has described and populated so far.
///
/// Persists across heaps: an item seen in heap 1 is still present (with
/// its last known value) when heap 2 arrives, even if heap 2 doesn't
/// mention it at all.
#[derive(Debug, Default)]
pub struct ItemGroup {
    items: HashMap<ItemId, Item>,
}

impl ItemGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &Item)> {
        self.items.iter()
    }

    /// Fold one heap's items into this group, returning the ids that were
    /// added or updated.
    ///
    /// Descriptor decode failures and item decode failures (a payload too
    /// small for its declared shape, an unsupported dtype string) propagate
    /// to the caller -- unlike producer-side packet/heap errors, these are
    /// the consumer-facing half of this crate's error surface.
    pub fn update(&mut self, heap: &Heap) -> Result<Vec<ItemId>> {
        let flavour = heap.flavour();
        let offset_ranges = ranges_by_offset(heap);
        let mut updated = Vec::new();

        for ptr in heap.items() {
            let crate::item_pointer::ItemPointer::Addressed { id: DESCRIPTOR, offset } = *ptr
            else {
                continue;
            };
            let range = offset_ranges[&offset].clone();
            let bytes = &heap.payload()[range];
            let parsed = descriptor::parse(bytes, &flavour)?;
            debug!(
                "heap {}: descriptor for item {:#x}",
                heap.heap_cnt(),
                parsed.id
            );
            self.items
                .entry(parsed.id)
                .or_insert_with(|| Item {
                    descriptor: parsed.clone(),
                    value: None,
                })
                .descriptor = parsed;
        }

        for ptr in heap.items() {
            let id = ptr.id();
            if id == DESCRIPTOR {
                continue;
            }
            let Some(item) = self.items.get_mut(&id) else {
                // Unknown item id: no descriptor has ever named it. Skip
                // silently: no descriptor has ever named this id.
                continue;
            };
            let value = match *ptr {
                crate::item_pointer::ItemPointer::Immediate { value, .. } => {
                    value::decode_immediate(value, flavour.heap_address_bits, &item.descriptor)?
                }
                crate::item_pointer::ItemPointer::Addressed { offset, .. } => {
                    let range = offset_ranges[&offset].clone();
                    let bytes = &heap.payload()[range];
                    value::decode_item(bytes, &item.descriptor)?
                }
            };
            item.value = Some(value);
            updated.push(id);
        }

        Ok(updated)
    }
}

/// Resolve every addressed pointer's byte range keyed by its *offset*
/// rather than its id, since several pointers (notably `DESCRIPTOR`) can
/// share an id within one heap but never share an offset.
fn ranges_by_offset(heap: &Heap) -> HashMap<u64, std::ops::Range<usize>> {
    let mut offsets: Vec<u64> = heap
        .items()
        .iter()
        .filter_map(|p| match *p {
            crate::item_pointer::ItemPointer::Addressed { offset, .. } => Some(offset),
            crate::item_pointer::ItemPointer::Immediate { .. } => None,
        })
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    let payload_len = heap.payload().len() as u64;
    offsets
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = offsets.get(i + 1).copied().unwrap_or(payload_len);
            (start, start as usize..end.max(start) as usize)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavour::Flavour;
    use crate::heap::LiveHeap;
    use crate::item_pointer::{DESCRIPTOR_FORMAT, DESCRIPTOR_ID, DESCRIPTOR_NAME};
    use crate::packet::{parse_packet, test_support::make_packet};

    /// A DESCRIPTOR item's wire payload: a complete single-packet sub-heap,
    /// matching how `descriptor::parse` expects to find it.
    fn descriptor_bytes(id: ItemId, name: &[u8], format_code: u8, format_bits: u8) -> Vec<u8> {
        let pointers = vec![
            crate::item_pointer::ItemPointer::Immediate {
                id: DESCRIPTOR_ID,
                value: id,
            },
            crate::item_pointer::ItemPointer::Addressed {
                id: DESCRIPTOR_NAME,
                offset: 0,
            },
            crate::item_pointer::ItemPointer::Addressed {
                id: DESCRIPTOR_FORMAT,
                offset: name.len() as u64,
            },
        ];
        let mut payload = Vec::new();
        payload.extend_from_slice(name);
        payload.push(format_code);
        payload.push(format_bits);

        make_packet(48, 1, &pointers, &payload)
    }

    fn heap_with(extra: &[crate::item_pointer::ItemPointer], payload: &[u8]) -> Heap {
        let data = make_packet(48, 1, extra, payload);
        let packet = parse_packet(&data).unwrap();
        let mut live = LiveHeap::new(1, Flavour::default());
        live.add_packet(&packet).unwrap();
        live.finish()
    }

    #[test]
    fn descriptor_then_value_in_same_heap() {
        let desc_bytes = descriptor_bytes(9, b"scalar", b'u', 32);
        let mut payload = desc_bytes.clone();
        let desc_offset = 0u64;
        let value_bytes = 0x2au32.to_be_bytes();
        payload.extend_from_slice(&value_bytes);
        let value_offset = desc_bytes.len() as u64;

        let extra = [
            crate::item_pointer::ItemPointer::Addressed {
                id: DESCRIPTOR,
                offset: desc_offset,
            },
            crate::item_pointer::ItemPointer::Addressed {
                id: 9,
                offset: value_offset,
            },
        ];
        let heap = heap_with(&extra, &payload);

        let mut group = ItemGroup::new();
        let updated = group.update(&heap).unwrap();
        assert_eq!(updated, vec![9]);
        let item = group.get(9).unwrap();
        assert_eq!(item.descriptor.name, "scalar");
        assert_eq!(
            item.value,
            Some(Value::Scalar(crate::value::Element::Scalar(
                crate::value::ScalarValue::U32(0x2a)
            )))
        );
    }

    #[test]
    fn unknown_item_id_is_skipped_silently() {
        let extra = [crate::item_pointer::ItemPointer::Addressed {
            id: 0x9999,
            offset: 0,
        }];
        let heap = heap_with(&extra, b"xyz");
        let mut group = ItemGroup::new();
        let updated = group.update(&heap).unwrap();
        assert!(updated.is_empty());
    }

    #[test]
    fn value_persists_across_heaps_without_a_fresh_descriptor() {
        let desc_bytes = descriptor_bytes(9, b"scalar", b'u', 32);
        let mut payload = desc_bytes.clone();
        payload.extend_from_slice(&1u32.to_be_bytes());
        let extra = [
            crate::item_pointer::ItemPointer::Addressed {
                id: DESCRIPTOR,
                offset: 0,
            },
            crate::item_pointer::ItemPointer::Addressed {
                id: 9,
                offset: desc_bytes.len() as u64,
            },
        ];
        let heap1 = heap_with(&extra, &payload);
        let mut group = ItemGroup::new();
        group.update(&heap1).unwrap();

        // Second heap only updates the value, no descriptor present.
        let extra2 = [crate::item_pointer::ItemPointer::Addressed { id: 9, offset: 0 }];
        let heap2 = heap_with(&extra2, &2u32.to_be_bytes());
        group.update(&heap2).unwrap();

        assert_eq!(
            group.get(9).unwrap().value,
            Some(Value::Scalar(crate::value::Element::Scalar(
                crate::value::ScalarValue::U32(2)
            )))
        );
        assert_eq!(group.get(9).unwrap().descriptor.name, "scalar");
    }
}
