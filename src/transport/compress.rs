//! Per-worker zlib compression.

use std::io::{self, Write};

use flate2::{Compression, write::ZlibEncoder};
use thiserror::Error;

/// Compression failures. The payload is dropped in either case.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("could only write {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("compression stream failed: {0}")]
    Stream(#[from] io::Error),
}

/// Reusable zlib stream owned by a single worker.
///
/// The stream state is not shareable, so each worker holds its own instance.
/// Output buffers are recycled between calls: the buffer holding the previous
/// result becomes the spare that receives the next one.
pub struct Compressor {
    encoder: ZlibEncoder<Vec<u8>>,
    spare: Vec<u8>,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl Compressor {
    pub fn new(level: Compression) -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), level),
            spare: Vec::new(),
        }
    }

    /// Compress `payload` into a complete zlib stream.
    ///
    /// The returned slice borrows the compressor's buffer and stays valid
    /// until the next call.
    pub fn compress(&mut self, payload: &[u8]) -> Result<&[u8], CompressError> {
        let mut buf = std::mem::take(&mut self.spare);
        buf.clear();
        // `reset` finishes whatever stream was in flight and hands back the
        // buffer it was writing into.
        self.spare = self.encoder.reset(buf)?;
        write_fully(&mut self.encoder, payload)?;
        self.encoder.try_finish()?;
        Ok(self.encoder.get_ref().as_slice())
    }
}

fn write_fully(writer: &mut impl Write, mut payload: &[u8]) -> Result<(), CompressError> {
    let expected = payload.len();
    while !payload.is_empty() {
        match writer.write(payload) {
            Ok(0) => {
                return Err(CompressError::ShortWrite {
                    written: expected - payload.len(),
                    expected,
                });
            }
            Ok(n) => payload = &payload[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor").finish_non_exhaustive()
    }
}
