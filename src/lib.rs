//! Non-blocking GELF log shipping over UDP.
//!
//! Applications hand encoded events to a [`GelfTransport`]; a pool of worker
//! threads compresses them when asked, splits oversized payloads into GELF
//! chunks and writes the resulting datagrams to the collector.
//!
//! ```no_run
//! use gelf_transport::{GelfConfig, GelfLevel, GelfTransport};
//!
//! let transport = GelfTransport::start(
//!     GelfConfig::udp("graylog.internal:12201").with_compress(true),
//! )?;
//! transport.send_event(&transport.new_event("service started").with_level(GelfLevel::Notice));
//! # Ok::<(), gelf_transport::ConfigError>(())
//! ```

pub mod config;
pub mod event;
pub mod level;
pub mod rate_limited_warner;
pub mod transport;

pub use config::{ConfigError, GelfConfig, NetworkFamily, TransportSettings};
pub use event::{BaseEvent, EncodeError, GELF_VERSION, GelfEvent};
pub use level::GelfLevel;
pub use transport::{
    ChunkError, ChunkHeader, CompressError, Compressor, DatagramSink, GelfTransport,
    MessageIdGenerator, chunk_payload,
};
