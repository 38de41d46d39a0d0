//! Public transport handle.

use std::{
    net::UdpSocket,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::Sender;
use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    config::{ConfigError, GelfConfig, TransportSettings},
    event::{BaseEvent, GELF_VERSION, GelfEvent},
    rate_limited_warner::RateLimitedWarner,
};

use super::{
    chunk::MessageIdGenerator,
    sink::{DatagramSink, connect_udp},
    worker::{TransportCommand, WorkerShared, flush_workers, spawn_workers},
};

/// Handle to a running GELF transport.
///
/// Created by [`GelfTransport::start`]. Sending never fails from the
/// caller's point of view; problems surface only in the diagnostic log.
/// Dropping the handle closes it, which delivers everything still queued.
pub struct GelfTransport {
    host: String,
    pool: Option<Pool>,
}

struct Pool {
    settings: Arc<TransportSettings>,
    tx: Option<Sender<TransportCommand>>,
    handles: Vec<JoinHandle<()>>,
    warner: Arc<RateLimitedWarner>,
    flush_lock: Mutex<()>,
}

impl GelfTransport {
    /// Validate `config`, open the UDP connection and launch the workers.
    ///
    /// A disabled configuration yields a handle that discards everything.
    pub fn start(config: GelfConfig) -> Result<Self, ConfigError> {
        let Some(settings) = config.validate()? else {
            info!("GELF logging is disabled");
            return Ok(Self::disabled(config.host));
        };
        let socket: UdpSocket = connect_udp(&settings)?;
        info!(
            "GELF logger start, net = {}, addr = {}",
            settings.network, settings.addr
        );
        Self::launch(settings, Arc::new(socket))
    }

    /// Like [`start`](Self::start) but writes datagrams to `sink` instead of
    /// a UDP socket. The address is validated but never resolved.
    pub fn start_with_sink(
        config: GelfConfig,
        sink: Arc<dyn DatagramSink>,
    ) -> Result<Self, ConfigError> {
        match config.validate()? {
            Some(settings) => Self::launch(settings, sink),
            None => Ok(Self::disabled(config.host)),
        }
    }

    fn disabled(host: String) -> Self {
        Self { host, pool: None }
    }

    pub(crate) fn launch(
        settings: TransportSettings,
        sink: Arc<dyn DatagramSink>,
    ) -> Result<Self, ConfigError> {
        let settings = Arc::new(settings);
        let warner = Arc::new(RateLimitedWarner::default());
        let shared = Arc::new(WorkerShared {
            settings: Arc::clone(&settings),
            sink,
            ids: MessageIdGenerator::default(),
            warner: Arc::clone(&warner),
        });
        let (tx, handles) = spawn_workers(shared).map_err(ConfigError::SpawnWorker)?;
        Ok(Self {
            host: settings.host.clone(),
            pool: Some(Pool {
                settings,
                tx: Some(tx),
                handles,
                warner,
                flush_lock: Mutex::new(()),
            }),
        })
    }

    /// Whether payloads are actually transmitted.
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Hostname stamped on events created by [`new_event`](Self::new_event).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// GELF protocol version spoken by this transport.
    pub fn version(&self) -> &'static str {
        GELF_VERSION
    }

    /// Size of the worker pool; zero when disabled.
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.settings.workers)
    }

    /// Payloads dropped so far because of compression, chunking or
    /// post-close sends.
    pub fn dropped_payloads(&self) -> u64 {
        self.pool
            .as_ref()
            .map_or(0, |pool| pool.warner.total_dropped())
    }

    /// Start an event for this transport's host, stamped with the current time.
    pub fn new_event(&self, short_message: impl Into<String>) -> BaseEvent {
        BaseEvent::new(self.host.clone(), short_message).stamped_now()
    }

    /// Queue `payload` for transmission.
    ///
    /// Blocks while the queue is full. A no-op on a disabled transport.
    pub fn send_bytes(&self, payload: Vec<u8>) {
        let Some(pool) = &self.pool else {
            return;
        };
        let Some(tx) = &pool.tx else {
            pool.record_drop("after shutdown");
            return;
        };
        if tx.send(TransportCommand::Payload(payload)).is_err() {
            pool.record_drop("with no running workers");
        }
    }

    pub fn send_string(&self, text: &str) {
        self.send_bytes(text.as_bytes().to_vec());
    }

    /// Encode `event` and queue it. An event that fails to encode is
    /// reported and not sent.
    pub fn send_event<E: GelfEvent + ?Sized>(&self, event: &E) {
        if !self.is_enabled() {
            return;
        }
        match event.encode() {
            Ok(payload) => self.send_bytes(payload),
            Err(err) => warn!("GELF event not sent: {err}"),
        }
    }

    /// Wait up to `timeout` for every payload queued so far to be written.
    ///
    /// Returns `true` immediately for a disabled transport and `false` once
    /// the transport is closed.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(pool) = &self.pool else {
            return true;
        };
        let Some(tx) = &pool.tx else {
            return false;
        };
        let flushed = {
            let _guard = pool.flush_lock.lock();
            flush_workers(tx, pool.settings.workers, timeout)
        };
        pool.warner.flush(|count| {
            warn!("GELF transport dropped {count} payloads");
        });
        flushed
    }

    /// Stop accepting payloads, deliver what is queued and join the workers.
    pub fn close(&mut self) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        // Dropping the only sender lets workers drain the queue and exit.
        if pool.tx.take().is_none() {
            return;
        }
        for handle in pool.handles.drain(..) {
            if handle.join().is_err() {
                warn!("GELF worker thread panicked");
            }
        }
        pool.warner.flush(|count| {
            warn!("GELF transport dropped {count} payloads");
        });
    }
}

impl Pool {
    fn record_drop(&self, why: &str) {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("GELF transport dropped {count} payloads {why}");
        });
    }
}

impl Drop for GelfTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for GelfTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GelfTransport")
            .field("host", &self.host)
            .field("settings", &self.pool.as_ref().map(|p| &p.settings))
            .finish()
    }
}
