//! UDP transport for GELF payloads.
//!
//! [`GelfTransport`] owns a bounded queue feeding a fixed pool of worker
//! threads. Producers enqueue encoded payloads and return immediately unless
//! the queue is full, in which case they block until a worker frees a slot.
//! Each worker owns its own zlib stream, compresses when configured, and
//! either writes the payload as a single datagram or splits it into GELF
//! chunks sharing one message id. All workers write to one connected UDP
//! socket; delivery is best effort and write failures are not retried.

pub mod chunk;
mod compress;
mod handle;
mod sink;
mod worker;

#[cfg(test)]
mod tests;

pub use chunk::{
    CHUNK_HEADER_LEN, CHUNK_MAGIC, ChunkError, ChunkHeader, MAX_CHUNKS, MessageId,
    MessageIdGenerator, chunk_payload,
};
pub use compress::{CompressError, Compressor};
pub use handle::GelfTransport;
pub use sink::DatagramSink;
