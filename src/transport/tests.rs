//! End-to-end tests for the transport handle.

use std::{
    collections::HashSet,
    io::{self, Read},
    net::UdpSocket,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use flate2::read::ZlibDecoder;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use rstest::{fixture, rstest};

use crate::{
    config::{GelfConfig, NetworkFamily, TransportSettings},
    event::BaseEvent,
};

use super::{ChunkHeader, DatagramSink, GelfTransport};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct RecordingSink {
    datagrams: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.datagrams.lock())
    }
}

impl DatagramSink for RecordingSink {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
        self.datagrams.lock().push(datagram.to_vec());
        Ok(datagram.len())
    }
}

#[fixture]
fn sink() -> Arc<RecordingSink> {
    Arc::new(RecordingSink::default())
}

#[fixture]
fn listener() -> UdpSocket {
    let socket = UdpSocket::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    socket
}

fn config() -> GelfConfig {
    GelfConfig::udp("127.0.0.1:12201").with_host("test-host")
}

fn start(config: GelfConfig, sink: &Arc<RecordingSink>) -> GelfTransport {
    GelfTransport::start_with_sink(config, sink.clone()).expect("start transport")
}

fn recv(listener: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 65_536];
    let n = listener.recv(&mut buf).expect("datagram received");
    buf.truncate(n);
    buf
}

fn inflate(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .expect("inflate payload");
    out
}

#[rstest]
fn ten_byte_chunks_split_fifteen_byte_payload(sink: Arc<RecordingSink>) {
    // Below the configurable minimum, so the settings are built directly.
    let settings = TransportSettings {
        network: NetworkFamily::Udp,
        addr: "127.0.0.1:12201".into(),
        workers: 1,
        max_chunk_size: 10,
        queue_capacity: 16,
        compress: false,
        echo: false,
        host: "test-host".into(),
    };
    let mut transport = GelfTransport::launch(settings, sink.clone()).expect("launch");
    transport.send_string("0123456789ABCDE");
    transport.close();

    let datagrams = sink.take();
    assert_eq!(datagrams.len(), 2);
    let (first, first_body) = ChunkHeader::decode(&datagrams[0]).expect("first chunk");
    let (second, second_body) = ChunkHeader::decode(&datagrams[1]).expect("second chunk");
    assert_eq!(first.message_id, second.message_id);
    assert_eq!((first.index, first.count), (0, 2));
    assert_eq!((second.index, second.count), (1, 2));
    assert_eq!(first_body, b"0123456789");
    assert_eq!(second_body, b"ABCDE");
}

#[rstest]
fn disabled_transport_writes_nothing(sink: Arc<RecordingSink>) {
    let disabled = GelfConfig {
        enabled: false,
        workers: -5,
        ..GelfConfig::default()
    };
    let transport = start(disabled, &sink);
    assert!(!transport.is_enabled());
    transport.send_bytes(b"ignored".to_vec());
    transport.send_string("ignored");
    transport.send_event(&BaseEvent::new("h", "ignored"));
    assert!(transport.flush(FLUSH_TIMEOUT));
    drop(transport);
    assert!(sink.take().is_empty());
}

#[rstest]
fn disabled_start_never_opens_a_socket() {
    let transport = GelfTransport::start(GelfConfig::default()).expect("disabled start succeeds");
    assert_eq!(transport.worker_count(), 0);
    assert_eq!(transport.version(), "1.1");
}

#[rstest]
fn sends_small_payload_over_udp(listener: UdpSocket) {
    let addr = listener.local_addr().expect("listener address");
    let transport = GelfTransport::start(
        GelfConfig::udp(addr.to_string())
            .with_host("test-host")
            .with_workers(2),
    )
    .expect("start transport");
    assert_eq!(transport.worker_count(), 2);

    transport.send_string("{\"short_message\":\"hi\"}");
    assert_eq!(recv(&listener), b"{\"short_message\":\"hi\"}");
}

#[rstest]
fn compressed_chunks_reassemble_over_udp(listener: UdpSocket) {
    let addr = listener.local_addr().expect("listener address");
    let transport = GelfTransport::start(
        GelfConfig::udp(addr.to_string())
            .with_host("test-host")
            .with_workers(1)
            .with_compress(true)
            .with_max_chunk_size(100),
    )
    .expect("start transport");

    // Random bytes do not compress below the chunk size.
    let mut payload = vec![0u8; 2_000];
    StdRng::seed_from_u64(42).fill_bytes(&mut payload);
    transport.send_bytes(payload.clone());

    let first = recv(&listener);
    let (header, body) = ChunkHeader::decode(&first).expect("chunked datagram");
    let mut parts = vec![Vec::new(); header.count as usize];
    parts[header.index as usize] = body.to_vec();
    for _ in 1..header.count {
        let datagram = recv(&listener);
        let (next, body) = ChunkHeader::decode(&datagram).expect("chunked datagram");
        assert_eq!(next.message_id, header.message_id);
        assert!(body.len() <= 100);
        parts[next.index as usize] = body.to_vec();
    }
    assert_eq!(inflate(&parts.concat()), payload);
}

#[rstest]
fn small_compressed_payload_has_no_header(sink: Arc<RecordingSink>) {
    let transport = start(config().with_compress(true), &sink);
    transport.send_string("hello hello hello");
    assert!(transport.flush(FLUSH_TIMEOUT));

    let datagrams = sink.take();
    assert_eq!(datagrams.len(), 1);
    assert!(ChunkHeader::decode(&datagrams[0]).is_none());
    assert_eq!(inflate(&datagrams[0]), b"hello hello hello");
}

#[rstest]
fn oversized_payload_is_dropped_and_counted(sink: Arc<RecordingSink>) {
    let transport = start(config().with_max_chunk_size(100), &sink);
    transport.send_bytes(vec![b'x'; 100 * 128 + 1]);
    transport.send_string("still alive");
    assert!(transport.flush(FLUSH_TIMEOUT));

    assert_eq!(sink.take(), vec![b"still alive".to_vec()]);
    assert_eq!(transport.dropped_payloads(), 1);
}

#[rstest]
fn event_encode_failure_sends_nothing(sink: Arc<RecordingSink>) {
    let transport = start(config(), &sink);
    transport.send_event(&transport.new_event("bad").with_field("id", 1));
    assert!(transport.flush(FLUSH_TIMEOUT));
    assert!(sink.take().is_empty());
}

#[rstest]
fn events_carry_transport_host(sink: Arc<RecordingSink>) {
    let transport = start(config(), &sink);
    assert_eq!(transport.host(), "test-host");
    transport.send_event(&transport.new_event("started"));
    assert!(transport.flush(FLUSH_TIMEOUT));

    let datagrams = sink.take();
    let json: serde_json::Value = serde_json::from_slice(&datagrams[0]).expect("parse event");
    assert_eq!(json["host"], "test-host");
    assert_eq!(json["version"], "1.1");
    assert_eq!(json["short_message"], "started");
    assert!(json["timestamp"].is_f64());
}

#[rstest]
fn concurrent_producers_lose_nothing(sink: Arc<RecordingSink>) {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 50;

    let transport = Arc::new(start(
        config().with_workers(4).with_max_chunk_size(100),
        &sink,
    ));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    // Every third payload needs chunking.
                    let len = if i % 3 == 0 { 250 } else { 20 };
                    let mut payload = format!("{p}:{i}:").into_bytes();
                    payload.resize(len, b'.');
                    transport.send_bytes(payload);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer finished");
    }
    assert!(transport.flush(FLUSH_TIMEOUT));

    let mut plain = HashSet::new();
    let mut chunked: std::collections::HashMap<[u8; 8], Vec<(u8, Vec<u8>)>> = Default::default();
    for datagram in sink.take() {
        match ChunkHeader::decode(&datagram) {
            Some((header, body)) => chunked
                .entry(header.message_id)
                .or_default()
                .push((header.index, body.to_vec())),
            None => assert!(plain.insert(datagram), "duplicate datagram"),
        }
    }
    let mut rebuilt = plain;
    for (_, mut parts) in chunked {
        parts.sort_by_key(|(index, _)| *index);
        assert_eq!(parts.len(), 3);
        let payload: Vec<u8> = parts.into_iter().flat_map(|(_, body)| body).collect();
        assert!(rebuilt.insert(payload), "duplicate payload");
    }
    assert_eq!(rebuilt.len(), PRODUCERS * PER_PRODUCER);
}

struct GatedSink {
    gate: Mutex<()>,
    inner: RecordingSink,
}

impl DatagramSink for GatedSink {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
        let _open = self.gate.lock();
        self.inner.send_datagram(datagram)
    }
}

#[rstest]
fn full_queue_blocks_producer_until_worker_frees_slot() {
    let sink = Arc::new(GatedSink {
        gate: Mutex::new(()),
        inner: RecordingSink::default(),
    });
    let gate = sink.gate.lock();
    let transport = Arc::new(
        GelfTransport::start_with_sink(
            config().with_workers(1).with_queue_capacity(1),
            sink.clone(),
        )
        .expect("start transport"),
    );

    let producer = {
        let transport = Arc::clone(&transport);
        thread::spawn(move || {
            // One in the worker, one in the queue, the third must wait.
            for i in 0..3u8 {
                transport.send_bytes(vec![i]);
            }
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!producer.is_finished(), "producer should be blocked");

    drop(gate);
    producer.join().expect("producer finished");
    assert!(transport.flush(FLUSH_TIMEOUT));
    assert_eq!(sink.inner.take(), vec![vec![0], vec![1], vec![2]]);
}

#[rstest]
fn flush_gives_up_behind_full_queue() {
    let sink = Arc::new(GatedSink {
        gate: Mutex::new(()),
        inner: RecordingSink::default(),
    });
    let gate = sink.gate.lock();
    let transport = GelfTransport::start_with_sink(
        config().with_workers(1).with_queue_capacity(1),
        sink.clone(),
    )
    .expect("start transport");
    // The worker holds the first payload at the gate; the second fills the queue.
    transport.send_bytes(vec![0]);
    transport.send_bytes(vec![1]);

    let started = Instant::now();
    assert!(!transport.flush(Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(1));

    drop(gate);
    assert!(transport.flush(FLUSH_TIMEOUT));
    assert_eq!(sink.inner.take(), vec![vec![0], vec![1]]);
}

#[derive(Default)]
struct PanickingSink {
    inner: RecordingSink,
}

impl DatagramSink for PanickingSink {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
        assert_ne!(datagram, b"boom", "sink refused payload");
        self.inner.send_datagram(datagram)
    }
}

#[rstest]
fn panicking_sink_drops_payload_and_keeps_workers() {
    let sink = Arc::new(PanickingSink::default());
    let mut transport =
        GelfTransport::start_with_sink(config().with_workers(2), sink.clone()).expect("start");
    transport.send_string("boom");
    assert!(transport.flush(FLUSH_TIMEOUT));
    assert_eq!(transport.dropped_payloads(), 1);

    transport.send_string("after");
    assert!(transport.flush(FLUSH_TIMEOUT));
    transport.close();
    assert_eq!(sink.inner.take(), vec![b"after".to_vec()]);
}

#[rstest]
fn close_delivers_queued_payloads(sink: Arc<RecordingSink>) {
    let mut transport = start(config().with_workers(2).with_queue_capacity(64), &sink);
    for i in 0..40u8 {
        transport.send_bytes(vec![i]);
    }
    transport.close();

    let mut delivered: Vec<u8> = sink.take().into_iter().flatten().collect();
    delivered.sort_unstable();
    assert_eq!(delivered, (0..40u8).collect::<Vec<_>>());
}

#[rstest]
fn sends_after_close_are_dropped(sink: Arc<RecordingSink>) {
    let mut transport = start(config(), &sink);
    transport.close();
    transport.send_string("late");
    assert!(!transport.flush(FLUSH_TIMEOUT));
    assert!(sink.take().is_empty());
    assert_eq!(transport.dropped_payloads(), 1);
}

#[rstest]
fn concurrent_flushes_complete(sink: Arc<RecordingSink>) {
    let transport = Arc::new(start(config().with_workers(3), &sink));
    let flushers: Vec<_> = (0..4)
        .map(|_| {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                transport.send_string("x");
                transport.flush(FLUSH_TIMEOUT)
            })
        })
        .collect();
    for flusher in flushers {
        assert!(flusher.join().expect("flusher finished"));
    }
    assert_eq!(sink.take().len(), 4);
}
