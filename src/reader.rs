//! A higher-level entry point over [`crate::iterator`] and [`crate::read::Summary`] that wires
//! in the schema parser and codec compiler, so callers get decoded values back instead of raw
//! CDR/ROS1 bytes.
//!
//! [`open`] loads (or reconstructs) a file's summary once and hands back a [`Reader`] that owns
//! the mapped bytes alongside it - no lifetime threading required by the caller. [`Reader::messages`]
//! decodes each message against its channel's schema, compiling (and caching) that schema's plan
//! on first use; [`Reader::raw_messages`] skips decoding for callers that only want bytes.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::codec::{CodecCache, Dialect};
pub use crate::codec::DecodedValue;
use crate::iterator::{
    build_summary_with_crc_check, MessageIterator, MessageIteratorOptions, ReconstructedIndex,
    ReconstructionMode,
};
use crate::read::Summary;
use crate::{Channel, McapError, McapResult, Schema};

/// Where a [`Reader`]'s bytes actually live.
enum Backing {
    Mmap(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mmap(m) => &m[..],
            Backing::Owned(v) => &v[..],
        }
    }
}

/// Options controlling how [`open`] loads a file and builds its summary.
pub struct OpenOptions {
    mode: ReconstructionMode,
    validate_crc: bool,
    use_mmap: bool,
    cache_capacity: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            mode: ReconstructionMode::Missing,
            validate_crc: true,
            use_mmap: true,
            cache_capacity: crate::cache::DEFAULT_CAPACITY,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How hard to work to produce a usable summary if the file's own is missing or partial.
    /// Defaults to [`ReconstructionMode::Missing`].
    pub fn reconstruction_mode(mut self, mode: ReconstructionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether to validate chunk CRCs while reading or reconstructing. Disabling this is
    /// faster, at the cost of silently tolerating a corrupted chunk.
    pub fn crc_check(mut self, validate_crc: bool) -> Self {
        self.validate_crc = validate_crc;
        self
    }

    /// Memory-map the file instead of reading it fully into a `Vec<u8>`. On by default.
    pub fn use_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    /// Number of decompressed chunks each [`MessageIterator`] built from this reader keeps
    /// resident at once.
    pub fn chunk_cache_size(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }
}

/// Opens `path` as an MCAP file, memory-mapping it (unless [`OpenOptions::use_mmap`] disables
/// that) and loading its summary per `options`.
pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> McapResult<Reader> {
    let file = File::open(path)?;
    let backing = if options.use_mmap {
        Backing::Mmap(unsafe { memmap2::Mmap::map(&file)? })
    } else {
        use std::io::Read;
        let mut buf = Vec::new();
        std::io::BufReader::new(file).read_to_end(&mut buf)?;
        Backing::Owned(buf)
    };

    let built =
        build_summary_with_crc_check(backing.bytes(), options.mode, options.validate_crc)?;

    Ok(Reader {
        backing,
        summary: built.summary,
        reconstructed_index: built.reconstructed_index,
        cache_capacity: options.cache_capacity,
        codec_cache: RefCell::new(CodecCache::new()),
    })
}

/// A decoded message: the channel it was published on plus the value the codec compiler
/// produced from its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub channel: Arc<Channel<'static>>,
    pub sequence: u32,
    pub log_time: u64,
    pub publish_time: u64,
    pub value: DecodedValue,
}

/// An open MCAP file with its summary loaded (or reconstructed), ready to list its topics,
/// channels and schemas, and to decode its messages.
///
/// Owns the file's bytes (mapped or read into memory) and its [`Summary`] together, so unlike
/// [`MessageIterator`] a `Reader` needs no lifetime parameter of its own: every borrow it hands
/// out is tied to `&self`.
pub struct Reader {
    backing: Backing,
    summary: Summary,
    reconstructed_index: Option<ReconstructedIndex>,
    cache_capacity: usize,
    codec_cache: RefCell<CodecCache>,
}

impl Reader {
    fn mcap(&self) -> &[u8] {
        self.backing.bytes()
    }

    /// Every distinct topic name present in the file.
    pub fn get_topics(&self) -> HashSet<&str> {
        self.summary.channels.values().map(|c| c.topic.as_str()).collect()
    }

    /// Every channel, keyed by channel ID.
    pub fn get_channels(&self) -> &std::collections::HashMap<u16, Arc<Channel<'static>>> {
        &self.summary.channels
    }

    /// Every schema referenced by a channel, keyed by schema ID.
    pub fn get_schemas(&self) -> &std::collections::HashMap<u16, Arc<Schema<'static>>> {
        &self.summary.schemas
    }

    fn message_iterator(&self, options: MessageIteratorOptions) -> McapResult<MessageIterator<'_>> {
        MessageIterator::with_reconstructed(
            self.mcap(),
            &self.summary,
            self.reconstructed_index.as_ref(),
            options.cache_capacity(self.cache_capacity),
        )
    }

    /// A lazy sequence of this file's messages, undecoded, per `options`.
    pub fn raw_messages(
        &self,
        options: MessageIteratorOptions,
    ) -> McapResult<impl Iterator<Item = McapResult<crate::Message<'static>>> + '_> {
        self.message_iterator(options)
    }

    /// A lazy sequence of this file's messages, decoded against each message's channel schema,
    /// per `options`.
    ///
    /// Compiles (and caches) a channel's schema into a decode plan the first time a message on
    /// that channel is seen; subsequent messages on the same schema and dialect reuse the plan.
    pub fn messages(
        &self,
        options: MessageIteratorOptions,
    ) -> McapResult<impl Iterator<Item = McapResult<DecodedMessage>> + '_> {
        let iter = self.message_iterator(options)?;
        Ok(iter.map(move |result| {
            let message = result?;
            let value = self.decode(&message.channel, &message.data)?;
            Ok(DecodedMessage {
                channel: message.channel,
                sequence: message.sequence,
                log_time: message.log_time,
                publish_time: message.publish_time,
                value,
            })
        }))
    }

    fn decode(&self, channel: &Channel<'static>, data: &[u8]) -> McapResult<DecodedValue> {
        let schema = channel
            .schema
            .as_ref()
            .ok_or_else(|| McapError::MissingSchema(channel.topic.clone()))?;
        let dialect = Dialect::for_message_encoding(&channel.message_encoding)?;
        let text = std::str::from_utf8(&schema.data)
            .map_err(|_| McapError::MissingSchema(channel.topic.clone()))?;
        let compiled = self
            .codec_cache
            .borrow_mut()
            .get_or_compile(&schema.name, text, dialect)?;
        compiled.decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::TopicFilter;
    use crate::write::WriteOptions;
    use crate::{Channel as ChannelT, Schema as SchemaT};
    use std::borrow::Cow;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    /// Builds a small in-memory MCAP (three CDR-encoded `Vector3` messages on one channel) and
    /// opens it through the same [`build_summary_with_crc_check`] path [`open`] uses, without
    /// touching the filesystem.
    fn sample_reader() -> Reader {
        let schema = Arc::new(SchemaT {
            id: 1,
            name: "geometry_msgs/msg/Vector3".to_string(),
            encoding: "ros2msg".to_string(),
            data: Cow::Owned(b"float64 x\nfloat64 y\nfloat64 z\n".to_vec()),
        });
        let channel = Arc::new(ChannelT {
            id: 0,
            topic: "/vec".to_string(),
            schema: Some(schema.clone()),
            message_encoding: "cdr".to_string(),
            metadata: BTreeMap::new(),
        });

        let compiled = crate::codec::CompiledSchema::compile(
            crate::schema::parse(&schema.name, std::str::from_utf8(&schema.data).unwrap())
                .unwrap(),
            Dialect::Cdr,
        )
        .unwrap();

        let mut buf = Vec::new();
        {
            let mut writer = WriteOptions::new()
                .compression(None)
                .create(Cursor::new(&mut buf))
                .unwrap();
            for i in 0..3u64 {
                let mut fields = BTreeMap::new();
                fields.insert("x".to_string(), DecodedValue::F64(i as f64));
                fields.insert("y".to_string(), DecodedValue::F64(i as f64 * 2.0));
                fields.insert("z".to_string(), DecodedValue::F64(0.0));
                let value = DecodedValue::Message(fields);
                let bytes = compiled.encode(&value).unwrap();
                writer
                    .write(&crate::Message {
                        channel: channel.clone(),
                        sequence: i as u32,
                        log_time: i * 10,
                        publish_time: i * 10,
                        data: Cow::Owned(bytes),
                    })
                    .unwrap();
            }
            writer.finish().unwrap();
        }

        let built = build_summary_with_crc_check(&buf, ReconstructionMode::Missing, true).unwrap();
        Reader {
            backing: Backing::Owned(buf),
            summary: built.summary,
            reconstructed_index: built.reconstructed_index,
            cache_capacity: crate::cache::DEFAULT_CAPACITY,
            codec_cache: RefCell::new(CodecCache::new()),
        }
    }

    #[test]
    fn messages_decodes_against_channel_schema() {
        let reader = sample_reader();
        assert_eq!(reader.get_topics(), HashSet::from(["/vec"]));
        assert_eq!(reader.get_channels().len(), 1);
        assert_eq!(reader.get_schemas().len(), 1);

        let decoded: Vec<_> = reader
            .messages(MessageIteratorOptions::new(TopicFilter::All))
            .unwrap()
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(decoded.len(), 3);
        match &decoded[1].value {
            DecodedValue::Message(fields) => {
                assert_eq!(fields["x"], DecodedValue::F64(1.0));
                assert_eq!(fields["y"], DecodedValue::F64(2.0));
            }
            other => panic!("expected a decoded message, got {other:?}"),
        }
    }

    #[test]
    fn raw_messages_skips_decoding() {
        let reader = sample_reader();
        let raw: Vec<_> = reader
            .raw_messages(MessageIteratorOptions::new(TopicFilter::All))
            .unwrap()
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(raw.len(), 3);
        assert!(!raw[0].data.is_empty());
    }
}
