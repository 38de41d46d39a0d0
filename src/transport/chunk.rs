//! GELF chunking of payloads that exceed the datagram size limit.
//!
//! Every chunk starts with a 12-byte header:
//!
//! ```text
//! offset 0-1:  magic bytes 0x1e 0x0f
//! offset 2-9:  message id, shared by all chunks of one payload
//! offset 10:   chunk index (0-based)
//! offset 11:   total chunk count
//! offset 12+:  payload slice
//! ```

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use thiserror::Error;

/// Magic bytes identifying a chunked GELF datagram.
pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
/// Size of the header prepended to every chunk.
pub const CHUNK_HEADER_LEN: usize = 12;
/// Largest number of chunks a single payload may be split into.
pub const MAX_CHUNKS: usize = 128;

/// Identifier shared by all chunks of one payload.
pub type MessageId = [u8; 8];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("payload needs {count} chunks; at most {max} are allowed")]
    TooManyChunks { count: usize, max: usize },
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// Decoded form of the per-chunk header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_id: MessageId,
    pub index: u8,
    pub count: u8,
}

impl ChunkHeader {
    /// Append the wire form of the header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CHUNK_MAGIC);
        out.extend_from_slice(&self.message_id);
        out.push(self.index);
        out.push(self.count);
    }

    /// Split a chunked datagram into its header and payload slice.
    ///
    /// Returns `None` for datagrams that are too short, lack the magic bytes,
    /// or carry an index outside the declared count.
    pub fn decode(datagram: &[u8]) -> Option<(Self, &[u8])> {
        if datagram.len() < CHUNK_HEADER_LEN || datagram[..2] != CHUNK_MAGIC {
            return None;
        }
        let mut message_id = [0u8; 8];
        message_id.copy_from_slice(&datagram[2..10]);
        let header = Self {
            message_id,
            index: datagram[10],
            count: datagram[11],
        };
        if header.index >= header.count {
            return None;
        }
        Some((header, &datagram[CHUNK_HEADER_LEN..]))
    }
}

/// Source of message ids shared by every worker of a transport.
///
/// A single generator means two workers chunking at the same moment draw
/// from one sequence instead of two independently seeded ones.
pub struct MessageIdGenerator {
    rng: Mutex<StdRng>,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }
}

impl MessageIdGenerator {
    /// Use a caller-supplied generator, e.g. a seeded one in tests.
    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    pub fn next_id(&self) -> MessageId {
        let mut id = [0u8; 8];
        self.rng.lock().fill_bytes(&mut id);
        id
    }
}

impl std::fmt::Debug for MessageIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageIdGenerator").finish_non_exhaustive()
    }
}

/// Number of chunks needed to carry `len` bytes at `max_chunk_size` each.
pub fn chunk_count(len: usize, max_chunk_size: usize) -> Result<usize, ChunkError> {
    if max_chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    let count = len.div_ceil(max_chunk_size);
    if count > MAX_CHUNKS {
        return Err(ChunkError::TooManyChunks {
            count,
            max: MAX_CHUNKS,
        });
    }
    Ok(count)
}

/// Split `payload` into header-prefixed chunks of at most `max_chunk_size`
/// payload bytes each, in index order.
///
/// A payload needing more than [`MAX_CHUNKS`] chunks is rejected whole.
pub fn chunk_payload(
    payload: &[u8],
    max_chunk_size: usize,
    ids: &MessageIdGenerator,
) -> Result<Vec<Vec<u8>>, ChunkError> {
    let count = chunk_count(payload.len(), max_chunk_size)?;
    let message_id = ids.next_id();
    let chunks = payload
        .chunks(max_chunk_size)
        .enumerate()
        .map(|(index, slice)| {
            let header = ChunkHeader {
                message_id,
                // Both fit in a byte: count <= MAX_CHUNKS.
                index: index as u8,
                count: count as u8,
            };
            let mut chunk = Vec::with_capacity(CHUNK_HEADER_LEN + slice.len());
            header.encode_into(&mut chunk);
            chunk.extend_from_slice(slice);
            chunk
        })
        .collect();
    Ok(chunks)
}
