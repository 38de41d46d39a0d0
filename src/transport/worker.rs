//! Worker threads draining the dispatch queue.
//!
//! Every worker blocks on the shared bounded queue, takes one payload at a
//! time and turns it into one or more datagrams: optional echo, optional
//! compression, then either a single write or a chunked sequence. Failures
//! drop the payload and are reported; they never stop the worker.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info, warn};

use crate::{config::TransportSettings, rate_limited_warner::RateLimitedWarner};

use super::{
    chunk::{MessageIdGenerator, chunk_payload},
    compress::Compressor,
    sink::DatagramSink,
};

/// Commands processed by the worker threads.
#[derive(Debug)]
pub enum TransportCommand {
    Payload(Vec<u8>),
    /// Acknowledge, then hold the worker until the flusher hangs up
    /// `release`.
    Flush {
        ack: Sender<()>,
        release: Receiver<()>,
    },
}

/// State shared by all workers of one transport.
pub(crate) struct WorkerShared {
    pub(crate) settings: Arc<TransportSettings>,
    pub(crate) sink: Arc<dyn DatagramSink>,
    pub(crate) ids: MessageIdGenerator,
    pub(crate) warner: Arc<RateLimitedWarner>,
}

impl WorkerShared {
    fn drop_payload(&self) {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("GELF transport dropped {count} payloads");
        });
    }

    fn write(&self, datagram: &[u8]) {
        if let Err(err) = self.sink.send_datagram(datagram) {
            debug!("GELF datagram write failed: {err}");
        }
    }

    /// Emit `data` as one datagram or as an ordered run of chunks.
    fn transmit(&self, data: &[u8]) {
        let max = self.settings.max_chunk_size;
        if data.len() <= max {
            self.write(data);
            return;
        }
        match chunk_payload(data, max, &self.ids) {
            Ok(chunks) => {
                for chunk in &chunks {
                    self.write(chunk);
                }
            }
            Err(err) => {
                warn!("GELF payload of {} bytes dropped: {err}", data.len());
                self.drop_payload();
            }
        }
    }
}

/// Spawn the worker pool and return the producer side of its queue.
pub(crate) fn spawn_workers(
    shared: Arc<WorkerShared>,
) -> std::io::Result<(Sender<TransportCommand>, Vec<JoinHandle<()>>)> {
    let (tx, rx) = bounded(shared.settings.queue_capacity);
    let mut handles = Vec::with_capacity(shared.settings.workers);
    for index in 0..shared.settings.workers {
        let worker = Worker::new(index, Arc::clone(&shared));
        let rx = rx.clone();
        let handle = thread::Builder::new()
            .name(format!("gelf-worker-{index}"))
            .spawn(move || worker.run(rx))?;
        handles.push(handle);
    }
    Ok((tx, handles))
}

struct Worker {
    index: usize,
    shared: Arc<WorkerShared>,
    compressor: Option<Compressor>,
}

impl Worker {
    fn new(index: usize, shared: Arc<WorkerShared>) -> Self {
        let compressor = shared.settings.compress.then(Compressor::default);
        Self {
            index,
            shared,
            compressor,
        }
    }

    /// Runs until every sender is gone. Payloads still queued at that point
    /// are delivered first: the channel reports disconnection only once empty.
    fn run(mut self, rx: Receiver<TransportCommand>) {
        while let Ok(cmd) = rx.recv() {
            match cmd {
                TransportCommand::Payload(payload) => self.handle_guarded(&payload),
                TransportCommand::Flush { ack, release } => {
                    let _ = ack.send(());
                    // Returns once the flusher drops its sender.
                    let _ = release.recv();
                }
            }
        }
        debug!("GELF worker {} stopped", self.index);
    }

    /// A panicking sink costs the payload, not the worker.
    fn handle_guarded(&mut self, payload: &[u8]) {
        if catch_unwind(AssertUnwindSafe(|| self.handle_payload(payload))).is_err() {
            warn!("GELF worker {} panicked while sending a payload", self.index);
            self.shared.drop_payload();
        }
    }

    fn handle_payload(&mut self, payload: &[u8]) {
        let shared = &self.shared;
        if shared.settings.echo {
            info!(target: "gelf::echo", "gelf <- {}", String::from_utf8_lossy(payload));
        }
        let data = match self.compressor.as_mut() {
            Some(compressor) => match compressor.compress(payload) {
                Ok(compressed) => compressed,
                Err(err) => {
                    warn!("GELF compression failed: {err}");
                    shared.drop_payload();
                    return;
                }
            },
            None => payload,
        };
        shared.transmit(data);
    }
}

/// Wait until every payload queued before the call has been transmitted.
///
/// One flush command is queued per worker. A worker that picks one up
/// acknowledges it and then holds until the flusher hangs up, so no worker
/// can take two and `workers` acknowledgements mean each worker has finished
/// the payloads it dequeued earlier. The hang-up happens on every path,
/// including timeouts, so no worker stays held once this returns.
/// Callers must serialise concurrent flushes.
pub(crate) fn flush_workers(tx: &Sender<TransportCommand>, workers: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let (ack_tx, ack_rx) = bounded(workers);
    let (release_tx, release_rx) = bounded::<()>(0);
    let mut queued = 0;
    for _ in 0..workers {
        let cmd = TransportCommand::Flush {
            ack: ack_tx.clone(),
            release: release_rx.clone(),
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if tx.send_timeout(cmd, remaining).is_err() {
            break;
        }
        queued += 1;
    }
    let flushed = queued == workers
        && (0..workers).all(|_| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            ack_rx.recv_timeout(remaining).is_ok()
        });
    drop(release_tx);
    flushed
}
