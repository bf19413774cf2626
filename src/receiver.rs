/*! The receiver: one worker thread per [`crate::reader::Reader`], all
feeding the same [`crate::stream::Stream`].

A `std::thread::Builder` per worker, a shared cancellation flag any worker
(or the owner) can trip, and a join-everything shutdown. Readers run
independently and all write into the one [`crate::stream::Stream`]; packet
order across readers is incidental, since the assembler keys purely on
heap-cnt.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::error::Result;
use crate::reader::{BufferReader, Reader};
use crate::stream::Stream;

/// A cloneable flag workers poll to know when to stop pulling packets.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn run_reader_loop<R: Reader>(
    name: &str,
    mut reader: R,
    stream: &Stream,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() || stream.is_closed() {
            break;
        }
        match reader.read_packet() {
            Ok(Some(data)) => match stream.add_packet(&data) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("reader {name}: stream error, stopping: {e}");
                    break;
                }
            },
            Ok(None) => {
                debug!("reader {name}: exhausted");
                break;
            }
            Err(e) => {
                warn!("reader {name}: I/O error, stopping: {e}");
                break;
            }
        }
    }
}

/// Owns the worker threads that drive a set of readers into one [`Stream`].
///
/// Buffer readers registered with [`Self::add_buffer_reader`] are not
/// spawned until [`Self::start`]: this lets a caller register every buffer
/// it has up front, then launch them all together and have the receiver
/// flush the stream's assembler exactly once, after every one of them has
/// drained, rather than racing an early flush against a reader that hasn't
/// started yet.
pub struct Receiver {
    stream: Arc<Stream>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    pending_buffer_readers: Vec<(String, Vec<u8>)>,
}

impl Receiver {
    #[must_use]
    pub fn new(stream: Arc<Stream>) -> Self {
        Self {
            stream,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
            pending_buffer_readers: Vec::new(),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    /// Spawn a worker thread driving `reader` into this receiver's stream
    /// immediately, until the reader reports EOF, a fatal I/O error, or
    /// cancellation. For a long-lived reader (a UDP socket, a pcap replay)
    /// that has no natural "all readers are registered" point, unlike the
    /// buffer readers [`Self::start`] coordinates.
    pub fn spawn_reader<R: Reader + 'static>(&mut self, name: impl Into<String>, reader: R) {
        let stream = Arc::clone(&self.stream);
        let cancel = self.cancel.clone();
        let name = name.into();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_reader_loop(&name, reader, &stream, &cancel))
            .expect("failed to spawn reader thread");
        self.handles.push(handle);
    }

    /// Register an in-memory packet buffer as a reader. Its worker isn't
    /// spawned until [`Self::start`].
    pub fn add_buffer_reader(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.pending_buffer_readers.push((name.into(), data));
    }

    /// Launch a worker thread for every buffer reader registered via
    /// [`Self::add_buffer_reader`] since the last call to `start`, then
    /// arrange for [`crate::stream::Stream::flush`] to run once all of them
    /// have drained, surfacing any heap that never completed rather than
    /// leaving it stuck in the assembler forever.
    pub fn start(&mut self) {
        let pending = std::mem::take(&mut self.pending_buffer_readers);
        let mut buffer_handles = Vec::with_capacity(pending.len());
        for (name, data) in pending {
            let stream = Arc::clone(&self.stream);
            let cancel = self.cancel.clone();
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_reader_loop(&name, BufferReader::new(data), &stream, &cancel))
                .expect("failed to spawn reader thread");
            buffer_handles.push(handle);
        }
        if buffer_handles.is_empty() {
            return;
        }
        let stream = Arc::clone(&self.stream);
        let flush_handle = std::thread::Builder::new()
            .name("speadrs-flush".to_string())
            .spawn(move || {
                for handle in buffer_handles {
                    let _ = handle.join();
                }
                if let Err(e) = stream.flush() {
                    warn!("flushing stream after drain failed: {e}");
                }
            })
            .expect("failed to spawn flush coordinator thread");
        self.handles.push(flush_handle);
    }

    /// Request every worker stop, and close the stream so the consumer's
    /// blocked `next_heap` call returns promptly.
    pub fn cancel(&self) -> Result<()> {
        self.cancel.cancel();
        self.stream.close()
    }

    /// Wait for every worker thread to finish.
    pub fn join(mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Stop every worker and wait for them to finish: `cancel` followed by
    /// `join`.
    pub fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        self.stream.close()?;
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
