#![warn(missing_docs)]
//! speadrs: receive-side core for SPEAD (Streaming Protocol for Exchange of
//! Astronomical Data).
//!
//! A [`Stream`] turns a sequence of raw UDP-sized packets into completed
//! [`Heap`]s, reassembling each heap from however many packets it was split
//! across. Packets arrive via one or more [`Reader`]s, each driven by its
//! own worker thread under a [`Receiver`]; a [`Flavour`] pins down the two
//! wire-format knobs (`heap_address_bits`, `bug_compat`) every packet on a
//! stream is assumed to share.
//!
//! ```no_run
//! use std::sync::Arc;
//! use speadrs::{Flavour, Reader, Receiver, Stream, StreamConfig};
//!
//! struct MySocketReader; // wraps a UdpSocket in a real program
//! impl Reader for MySocketReader {
//!     fn read_packet(&mut self) -> std::io::Result<Option<Vec<u8>>> {
//!         Ok(None)
//!     }
//! }
//!
//! let stream = Arc::new(Stream::new(StreamConfig {
//!     flavour: Flavour::default(),
//!     ..StreamConfig::default()
//! }));
//! let mut receiver = Receiver::new(Arc::clone(&stream));
//! receiver.spawn_reader("udp-0", MySocketReader);
//! for heap in stream.iter() {
//!     println!("heap {} ({} bytes)", heap.heap_cnt(), heap.payload().len());
//! }
//! ```
//!
//! Heaps carry raw item pointers; turning those into named, typed values
//! is [`ItemGroup`]'s job -- call [`ItemGroup::update`] with each heap in
//! turn to maintain a live view of every item a stream has described.
//!
//! A packet that fails to parse, or a packet that can't be folded into its
//! heap, is logged (via the [`log`] facade) and dropped rather than
//! surfaced as an error: only consumer-facing decode failures from
//! [`ItemGroup::update`] return [`Error`].

pub mod assembler;
pub mod descriptor;
pub mod dtype;
pub mod error;
pub mod flavour;
pub mod heap;
pub mod item_group;
pub mod item_pointer;
pub mod numpy_header;
pub mod packet;
pub mod reader;
pub mod receiver;
pub mod ring;
pub mod stream;
pub mod value;

pub use descriptor::{Descriptor, ShapeDim};
pub use dtype::{ByteOrder, Dtype, ScalarKind};
pub use error::{AssembleError, DescriptorError, Error, ParseError, Result};
pub use flavour::{BugCompat, Flavour};
pub use heap::{Heap, LiveHeap, RawItem};
pub use item_group::{Item, ItemGroup};
pub use item_pointer::{ItemId, ItemPointer};
pub use packet::{Packet, parse_packet};
pub use reader::{BufferReader, Reader};
pub use receiver::{CancellationToken, Receiver};
pub use stream::{Stream, StreamConfig};
pub use value::{Element, Record, ScalarValue, Value};
