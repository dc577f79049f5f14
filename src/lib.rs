#![doc = include_str!("../README.md")]
//! Read and write MCAP files containing CDR- (and ROS 1-) serialized robotics messages.
//!
//! The high-level entry points are [`MessageStream`] for reading and [`Writer`] for
//! writing. [`records`] exposes the raw record types for callers that want to work
//! below the [`Message`]/[`Channel`]/[`Schema`] abstraction.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

mod cache;
pub mod channels;
mod chunk_codec;
mod chunk_sink;
pub mod codec;
mod error;
pub mod io;
mod io_utils;
pub mod iterator;
mod linear;
pub mod read;
pub mod reader;
pub mod records;
pub mod schema;
pub mod write;

pub use channels::ChannelAccumulator;
pub use error::{McapError, McapResult};
pub use iterator::{
    build_summary, build_summary_with_crc_check, BuiltSummary, MessageIterator,
    MessageIteratorOptions, PredicateFn, ReconstructedIndex, ReconstructionMode, TopicFilter,
};
pub use read::{MessageStream, RawMessage, RawMessageStream, Summary};
pub use reader::{open, DecodedMessage, OpenOptions, Reader};
pub use write::{open_writer, WriteOptions, Writer};

/// Magic bytes that must appear at both the start and the end of a valid MCAP file.
pub const MAGIC: &[u8] = &[0x89, b'M', b'C', b'A', b'P', 0x30, b'\r', b'\n'];

/// A parsed `Schema` record: the message-definition text (and its encoding) registered
/// under a given ID.
///
/// Schema IDs are never zero: a zero schema ID on the wire means "no schema", which
/// shows up as `Channel::schema == None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema<'a> {
    pub id: u16,
    pub name: String,
    pub encoding: String,
    pub data: Cow<'a, [u8]>,
}

impl Schema<'_> {
    pub fn into_owned(self) -> Schema<'static> {
        Schema {
            id: self.id,
            name: self.name,
            encoding: self.encoding,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// A parsed `Channel` record: a named topic carrying messages of a single schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel<'a> {
    pub id: u16,
    pub topic: String,
    pub schema: Option<Arc<Schema<'a>>>,
    pub message_encoding: String,
    pub metadata: BTreeMap<String, String>,
}

/// A fully-resolved message: its header fields plus the [`Channel`] (and transitively,
/// [`Schema`]) it was published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    pub channel: Arc<Channel<'a>>,
    pub sequence: u32,
    pub log_time: u64,
    pub publish_time: u64,
    pub data: Cow<'a, [u8]>,
}

/// A parsed `Attachment` record: an arbitrary named blob with a media type, alongside
/// a message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment<'a> {
    pub log_time: u64,
    pub create_time: u64,
    pub name: String,
    pub media_type: String,
    pub data: Cow<'a, [u8]>,
}

/// Chunk compression codecs understood by this crate.
///
/// Both are optional, additive Cargo features (`zstd` and `lz4`, both on by default);
/// a file compressed with a disabled codec surfaces [`McapError::UnsupportedCompression`]
/// rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    #[cfg(feature = "zstd")]
    Zstd,
    #[cfg(feature = "lz4")]
    Lz4,
}

impl Compression {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
            #[cfg(feature = "lz4")]
            Compression::Lz4 => "lz4",
        }
    }
}
