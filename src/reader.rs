/*! Readers: the producer side of a [`crate::stream::Stream`].

A `Reader` is anything that can hand over a sequence of raw packets --
a UDP socket, a pcap file, or (for tests and in-process use) a plain
in-memory queue. A [`crate::stream::Stream`] can be fed by several readers
at once, each driven by its own worker thread in the [`crate::receiver::Receiver`];
the assembler doesn't care which reader a packet came from.
*/
use std::io;

use log::warn;

use crate::item_pointer::{ItemPointer, PAYLOAD_LENGTH};
use crate::packet;

/// Something that yields raw SPEAD packets, one at a time, until exhausted.
///
/// Implementations should return `Ok(None)` to signal a clean end of input
/// (e.g. a closed socket or an exhausted buffer) rather than blocking
/// forever; a transient I/O error should be retried or logged by the
/// implementation itself, since [`crate::receiver::Receiver`] treats any `Err`
/// as fatal to that reader's worker thread.
pub trait Reader: Send {
    /// Fetch the next packet's bytes, or `None` at end of input.
    fn read_packet(&mut self) -> std::io::Result<Option<Vec<u8>>>;
}

/// An in-memory reader over one contiguous span holding zero or more
/// back-to-back packets, such as a file already read into memory.
///
/// A packet's length isn't carried anywhere out-of-band: each packet is
/// self-describing (the fixed header plus its item pointers locate the
/// payload, and the payload's own length is the `PAYLOAD_LENGTH` immediate
/// among those pointers), so `BufferReader` parses one packet's header and
/// pointers at a time to find where it ends and the next one begins.
pub struct BufferReader {
    data: Vec<u8>,
    pos: usize,
}

impl BufferReader {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl Reader for BufferReader {
    fn read_packet(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let rest = &self.data[self.pos..];
        let parsed = packet::parse_packet(rest).map_err(|e| {
            warn!("buffer reader: {e}");
            io::Error::new(io::ErrorKind::InvalidData, e.to_string())
        })?;
        let pointers_end = packet::HEADER_LEN + parsed.pointers.len() * 8;
        let payload_length = parsed.pointers.iter().find_map(|p| match *p {
            ItemPointer::Immediate {
                id: PAYLOAD_LENGTH,
                value,
            } => Some(value),
            _ => None,
        });
        let Some(payload_length) = payload_length else {
            warn!("buffer reader: packet has no PAYLOAD_LENGTH immediate, can't frame it");
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "packet missing PAYLOAD_LENGTH immediate",
            ));
        };
        let total = pointers_end + payload_length as usize;
        if total > rest.len() {
            warn!(
                "buffer reader: packet claims {total} bytes but only {} remain",
                rest.len()
            );
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "packet length exceeds remaining buffer",
            ));
        }
        let packet_bytes = rest[..total].to_vec();
        self.pos += total;
        Ok(Some(packet_bytes))
    }
}
