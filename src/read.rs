//! Read the data and summary sections of an MCAP file from a byte slice.
//!
//! MCAPs are read from a byte slice instead of a [`std::io::Read`] trait object.
//! Consider [memory-mapping](https://docs.rs/memmap2/0.9.5/memmap2/struct.Mmap.html)
//! the file - the OS will load (and cache!) it on-demand, without any further system
//! calls. [`crate::io::MmapSource`] wraps this for you.
//!
//! This module covers the parts of the format that don't need random access across chunk
//! boundaries: a forward walk of the data section ([`RawMessageStream`]/[`MessageStream`]),
//! and loading whatever summary section is already present in the file ([`Summary`]). Time-
//! bounded, topic-filtered, bidirectional iteration and summary *reconstruction* for files
//! that lack one live in [`crate::iterator`].

use std::{borrow::Cow, collections::HashMap, fmt, sync::Arc};

use crc32fast::hash as crc32;

use crate::{
    channels::ChannelAccumulator,
    linear::{ChunkFlattener, ChunkReader, LinearReader},
    records::{self, op, Record},
    Attachment, Channel, McapError, McapResult, Message, Schema, MAGIC,
};

/// Reads all messages from the MCAP file---in the order they were written---and
/// perform needed validation (CRCs, etc.) as we go.
///
/// Unlike [`MessageStream`], this iterator returns the raw [`MessageHeader`](records::MessageHeader)
/// and message data instead of constructing a [`Message`].
/// This can be useful for situations where you don't need the specifics of each
/// message's [`Channel`], but just want to be able to discriminate them _by_ their channel
/// (e.g., build some map of `Channel -> Vec<Message>`).
///
/// This stops at the end of the data section and does not read the summary.
pub struct RawMessageStream<'a> {
    records: ChunkFlattener<'a>,
    done: bool,
    channeler: ChannelAccumulator<'static>,
}

impl<'a> RawMessageStream<'a> {
    pub fn new(buf: &'a [u8]) -> McapResult<Self> {
        Ok(Self {
            records: ChunkFlattener::new(buf)?,
            done: false,
            channeler: ChannelAccumulator::default(),
        })
    }

    /// Like [`new`](Self::new), but tolerates a missing or truncated end-of-file magic.
    pub fn new_lenient(buf: &'a [u8]) -> McapResult<Self> {
        Ok(Self {
            records: ChunkFlattener::new_lenient(buf)?,
            done: false,
            channeler: ChannelAccumulator::default(),
        })
    }

    /// Gets the channel with the given ID (presumably from a [`MessageHeader`](records::MessageHeader))
    pub fn get_channel(&self, channel_id: u16) -> Option<Arc<Channel<'a>>> {
        self.channeler.get(channel_id)
    }
}

pub struct RawMessage<'a> {
    pub header: records::MessageHeader,
    pub data: Cow<'a, [u8]>,
}

impl<'a> Iterator for RawMessageStream<'a> {
    type Item = McapResult<RawMessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let n = loop {
            let record = match self.records.next() {
                Some(Ok(rec)) => rec,
                Some(Err(e)) => break Some(Err(e)),
                None => break None,
            };

            match record {
                // Insert schemas into self so we know when subsequent channels reference them.
                Record::Schema { header, data } => {
                    if let Err(e) = self.channeler.add_schema(header, Cow::Owned(data.into_owned()))
                    {
                        break Some(Err(e));
                    }
                }

                // Insert channels into self so we know when subsequent messages reference them.
                Record::Channel(chan) => {
                    if let Err(e) = self.channeler.add_channel(chan) {
                        break Some(Err(e));
                    }
                }

                Record::Message { header, data } => {
                    break Some(Ok(RawMessage { header, data }));
                }
                _skip => {}
            };
        };

        if !matches!(n, Some(Ok(_))) {
            self.done = true;
        }
        n
    }
}

/// Like [`RawMessageStream`], but constructs a [`Message`]
/// (complete with its [`Channel`]) from the raw header and data.
///
/// This stops at the end of the data section and does not read the summary.
///
/// Because tying the lifetime of each message to the underlying MCAP memory map
/// makes it very difficult to send between threads or use in async land,
/// and because we assume _most_ MCAP files have _most_ messages in compressed chunks,
/// yielded [`Message`]s have unbounded lifetimes.
/// For messages we've decompressed into their own buffers, this is free!
/// For uncompressed messages, we take a copy of the message's data.
pub struct MessageStream<'a> {
    inner: RawMessageStream<'a>,
}

impl<'a> MessageStream<'a> {
    pub fn new(buf: &'a [u8]) -> McapResult<Self> {
        RawMessageStream::new(buf).map(|inner| Self { inner })
    }

    pub fn new_lenient(buf: &'a [u8]) -> McapResult<Self> {
        RawMessageStream::new_lenient(buf).map(|inner| Self { inner })
    }
}

impl Iterator for MessageStream<'_> {
    type Item = McapResult<Message<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Ok(RawMessage { header, data })) => {
                let channel = match self.inner.channeler.get(header.channel_id) {
                    Some(c) => c,
                    None => {
                        return Some(Err(McapError::UnknownChannel(
                            header.sequence,
                            header.channel_id,
                        )))
                    }
                };

                Some(Ok(Message {
                    channel,
                    sequence: header.sequence,
                    log_time: header.log_time,
                    publish_time: header.publish_time,
                    data: Cow::Owned(data.into_owned()),
                }))
            }
            Some(Err(e)) => Some(Err(e)),
            None => None,
        }
    }
}

const FOOTER_LEN: usize = 8 // summary start
 + 8 // summary offset start
 + 4; // summary section CRC
pub(crate) const FOOTER_RECORD_LEN: usize = 1 // opcode
     + 8 // record length
     + FOOTER_LEN;

/// Read the MCAP footer.
///
/// You'd probably prefer to use [`Summary::read`] to parse the whole summary,
/// then index into the rest of the file with
/// [`Summary::stream_chunk`], [`attachment`], [`metadata`], etc.
pub fn footer(mcap: &[u8]) -> McapResult<records::Footer> {
    // an MCAP must be at least large enough to accomodate a header magic, a footer record and a
    // footer magic.
    if mcap.len() < (MAGIC.len() + FOOTER_RECORD_LEN + MAGIC.len()) {
        return Err(McapError::UnexpectedEof);
    }

    if !mcap.starts_with(MAGIC) || !mcap.ends_with(MAGIC) {
        return Err(McapError::BadMagic);
    }

    let footer_buf = &mcap[mcap.len() - MAGIC.len() - FOOTER_LEN..];
    let mut cursor = std::io::Cursor::new(footer_buf);
    Ok(binrw::BinRead::read_le(&mut cursor)?)
}

/// Indexes of an MCAP file parsed from its (optional) summary section.
///
/// [`Summary::read`] only loads whatever summary structures are actually present in the
/// file; it never scans the data section. For files that lack a summary (or parts of
/// one), see [`crate::iterator::build_summary`].
#[derive(Default, Eq, PartialEq, Clone)]
pub struct Summary {
    pub stats: Option<records::Statistics>,
    /// Maps channel IDs to their channel
    pub channels: HashMap<u16, Arc<Channel<'static>>>,
    /// Maps schema IDs to their schema
    pub schemas: HashMap<u16, Arc<Schema<'static>>>,
    pub chunk_indexes: Vec<records::ChunkIndex>,
    pub attachment_indexes: Vec<records::AttachmentIndex>,
    pub metadata_indexes: Vec<records::MetadataIndex>,
}

impl fmt::Debug for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use std::collections::BTreeMap;
        // Keep the actual maps as HashMaps for constant-time lookups,
        // but order everything up before debug printing it here.
        let channels = self.channels.iter().collect::<BTreeMap<_, _>>();
        let schemas = self.schemas.iter().collect::<BTreeMap<_, _>>();

        f.debug_struct("Summary")
            .field("stats", &self.stats)
            .field("channels", &channels)
            .field("schemas", &schemas)
            .field("chunk_indexes", &self.chunk_indexes)
            .field("attachment_indexes", &self.attachment_indexes)
            .field("metadata_indexes", &self.metadata_indexes)
            .finish()
    }
}

impl Summary {
    /// Read the summary section of the given mapped MCAP file, if it has one.
    ///
    /// This walks whatever's actually present between the footer's `summary_start` and
    /// the footer itself (or, failing that, the whole file) and accumulates every
    /// schema/channel/chunk-index/statistics/attachment-index/metadata-index record it
    /// finds. It does not consult `summary_offset_start`'s group offsets to skip
    /// around - for a file with a well-formed summary this is equivalent and simpler;
    /// [`crate::iterator::build_summary`] implements the full offset-map-driven and
    /// data-section-reconstruction paths.
    pub fn read(mcap: &[u8]) -> McapResult<Option<Self>> {
        let foot = footer(mcap)?;

        if foot.summary_start == 0 {
            if foot.summary_crc != 0 {
                return Err(McapError::SummaryCrcWithoutSummary);
            }
            log::debug!("mcap footer declares no summary section");
            return Ok(None);
        }

        let summary_end = mcap.len() - MAGIC.len() - FOOTER_RECORD_LEN;
        if foot.summary_start as usize > summary_end {
            return Err(McapError::BadIndex);
        }
        let summary_buf = &mcap[foot.summary_start as usize..summary_end];
        validate_summary_crc(summary_buf, &foot)?;

        let mut summary = Summary::default();
        for record in LinearReader::sans_magic(summary_buf) {
            match record? {
                Record::Schema { header, data } => {
                    if header.id == 0 {
                        continue;
                    }
                    summary.schemas.insert(
                        header.id,
                        Arc::new(Schema {
                            id: header.id,
                            name: header.name,
                            encoding: header.encoding,
                            data: Cow::Owned(data.into_owned()),
                        }),
                    );
                }
                Record::Channel(chan) => {
                    let schema = if chan.schema_id == 0 {
                        None
                    } else {
                        Some(
                            summary
                                .schemas
                                .get(&chan.schema_id)
                                .cloned()
                                .ok_or_else(|| McapError::UnknownSchema(chan.topic.clone(), chan.schema_id))?,
                        )
                    };
                    summary.channels.insert(
                        chan.id,
                        Arc::new(Channel {
                            id: chan.id,
                            topic: chan.topic,
                            schema,
                            message_encoding: chan.message_encoding,
                            metadata: chan.metadata,
                        }),
                    );
                }
                Record::ChunkIndex(idx) => summary.chunk_indexes.push(idx),
                Record::AttachmentIndex(idx) => summary.attachment_indexes.push(idx),
                Record::MetadataIndex(idx) => summary.metadata_indexes.push(idx),
                Record::Statistics(stats) => summary.stats = Some(stats),
                _other => {}
            }
        }
        summary
            .chunk_indexes
            .sort_by_key(|idx| idx.message_start_time);

        Ok(Some(summary))
    }

    /// Stream messages from the chunk with the given index.
    ///
    /// To avoid having to read all preceding chunks first,
    /// channels and their schemas are pulled from this summary.
    pub fn stream_chunk<'a, 'b: 'a>(
        &'b self,
        mcap: &'a [u8],
        index: &records::ChunkIndex,
    ) -> McapResult<impl Iterator<Item = McapResult<Message<'a>>> + 'a> {
        self.stream_chunk_with_crc_check(mcap, index, true)
    }

    /// Like [`stream_chunk`](Self::stream_chunk), but lets the caller skip the decompressed
    /// chunk's CRC check (faster, at the cost of silently accepting a corrupted chunk).
    pub fn stream_chunk_with_crc_check<'a, 'b: 'a>(
        &'b self,
        mcap: &'a [u8],
        index: &records::ChunkIndex,
        validate_crc: bool,
    ) -> McapResult<impl Iterator<Item = McapResult<Message<'a>>> + 'a> {
        if !validate_crc {
            log::warn!(
                "reading chunk at offset {} with CRC validation disabled",
                index.chunk_start_offset
            );
        }
        let (header, data) = read_chunk_record(mcap, index)?;

        let messages = ChunkReader::new_with_crc_check(header, data, validate_crc)?.filter_map(
            |record| match record {
                Ok(Record::Message { header, data }) => {
                    let channel = match self.channels.get(&header.channel_id) {
                        Some(c) => c.clone(),
                        None => {
                            return Some(Err(McapError::UnknownChannel(
                                header.sequence,
                                header.channel_id,
                            )));
                        }
                    };

                    Some(Ok(Message {
                        channel,
                        sequence: header.sequence,
                        log_time: header.log_time,
                        publish_time: header.publish_time,
                        data: Cow::Owned(data.into_owned()),
                    }))
                }
                // We don't care about other chunk records (channels, schemas) -
                // we should have them from &self already.
                Ok(_other_record) => None,
                Err(e) => Some(Err(e)),
            },
        );

        Ok(messages)
    }

    /// Read the message indexes for the given indexed chunk.
    ///
    /// Channels and their schemas are pulled from this summary.
    /// The offsets in each [`MessageIndexEntry`](records::MessageIndexEntry)
    /// is relative to the decompressed contents of the given chunk.
    pub fn read_message_indexes(
        &self,
        mcap: &[u8],
        index: &records::ChunkIndex,
    ) -> McapResult<HashMap<Arc<Channel>, Vec<records::MessageIndexEntry>>> {
        if index.message_index_offsets.is_empty() {
            // Message indexing is optional... should we be more descriptive here?
            return Err(McapError::BadIndex);
        }

        let mut indexes = HashMap::new();

        for (channel_id, offset) in &index.message_index_offsets {
            let offset = *offset as usize;

            // Message indexes are at least 15 bytes:
            // 1 byte opcode, 8 byte length, 2 byte channel ID, 4 byte array len
            if mcap.len() < offset + 15 {
                return Err(McapError::BadIndex);
            }

            // Get the MessageIndex out of the file at the given offset.
            let mut reader = LinearReader::sans_magic(&mcap[offset..]);
            let index = match reader.next().ok_or(McapError::BadIndex)? {
                Ok(Record::MessageIndex(i)) => i,
                Ok(_other_record) => return Err(McapError::BadIndex),
                Err(e) => return Err(e),
            };

            // The channel ID from the chunk index and the message index should match
            if *channel_id != index.channel_id {
                return Err(McapError::BadIndex);
            }

            let channel = match self.channels.get(&index.channel_id) {
                Some(c) => c,
                None => {
                    return Err(McapError::UnknownChannel(
                        0, // We don't have a message sequence num yet.
                        index.channel_id,
                    ));
                }
            };

            if indexes.insert(channel.clone(), index.records).is_some() {
                return Err(McapError::ConflictingChannels(channel.topic.clone()));
            }
        }

        Ok(indexes)
    }

    /// Seek to the given message in the given indexed chunk.
    ///
    /// If you're interested in more than a single message from the chunk,
    /// filtering [`Summary::stream_chunk`] is probably a better bet.
    /// Compressed chunks aren't random access -
    /// this decompresses everything in the chunk before
    /// [`message.offset`](records::MessageIndexEntry::offset) and throws it away.
    pub fn seek_message<'a>(
        &self,
        mcap: &'a [u8],
        index: &records::ChunkIndex,
        message: &records::MessageIndexEntry,
    ) -> McapResult<Message<'static>> {
        self.seek_message_with_crc_check(mcap, index, message, true)
    }

    /// Like [`seek_message`](Self::seek_message), but lets the caller skip the decompressed
    /// chunk's CRC check (faster, at the cost of silently accepting a corrupted chunk).
    pub fn seek_message_with_crc_check<'a>(
        &self,
        mcap: &'a [u8],
        index: &records::ChunkIndex,
        message: &records::MessageIndexEntry,
        validate_crc: bool,
    ) -> McapResult<Message<'static>> {
        if !validate_crc {
            log::warn!(
                "seeking into chunk at offset {} with CRC validation disabled",
                index.chunk_start_offset
            );
        }
        let (header, data) = read_chunk_record(mcap, index)?;
        let decompressed = crate::chunk_codec::decompress_chunk(&header, data, validate_crc)?;

        if (message.offset as usize) >= decompressed.len() {
            return Err(McapError::BadIndex);
        }
        let mut reader = LinearReader::sans_magic(&decompressed[message.offset as usize..]);
        match reader.next().ok_or(McapError::BadIndex)? {
            Ok(Record::Message { header, data }) => {
                let channel = match self.channels.get(&header.channel_id) {
                    Some(c) => c.clone(),
                    None => {
                        return Err(McapError::UnknownChannel(
                            header.sequence,
                            header.channel_id,
                        ))
                    }
                };
                Ok(Message {
                    channel,
                    sequence: header.sequence,
                    log_time: header.log_time,
                    publish_time: header.publish_time,
                    data: Cow::Owned(data.into_owned()),
                })
            }
            Ok(_other) => Err(McapError::BadIndex),
            Err(e) => Err(e),
        }
    }
}

/// Checks a loaded summary section's bytes against the CRC recorded in the footer, if any.
///
/// The saved CRC covers the summary section plus the opcode+length-prefixed footer record up
/// through (but not including) the CRC field itself.
pub(crate) fn validate_summary_crc(summary_buf: &[u8], foot: &records::Footer) -> McapResult<()> {
    if foot.summary_crc == 0 {
        return Ok(());
    }
    let mut crc_buf = Vec::with_capacity(summary_buf.len() + FOOTER_RECORD_LEN);
    crc_buf.extend_from_slice(summary_buf);
    crc_buf.push(op::FOOTER);
    crc_buf.extend_from_slice(&20u64.to_le_bytes());
    crc_buf.extend_from_slice(&foot.summary_start.to_le_bytes());
    crc_buf.extend_from_slice(&foot.summary_offset_start.to_le_bytes());
    let calculated = crc32(&crc_buf);
    if calculated != foot.summary_crc {
        return Err(McapError::BadSummaryCrc {
            saved: foot.summary_crc,
            calculated,
        });
    }
    Ok(())
}

/// Locates and parses the `Chunk` record pointed to by `index`, returning its header and
/// compressed payload (borrowed straight from `mcap`).
pub(crate) fn read_chunk_record<'a>(
    mcap: &'a [u8],
    index: &records::ChunkIndex,
) -> McapResult<(records::ChunkHeader, &'a [u8])> {
    let end = (index.chunk_start_offset + index.chunk_length) as usize;
    if mcap.len() < end {
        return Err(McapError::BadIndex);
    }
    let body = &mcap[(index.chunk_start_offset as usize) + crate::linear::RECORD_HEADER_LEN..end];
    match records::parse_record(op::CHUNK, body)? {
        Record::Chunk { header, data } => match data {
            Cow::Borrowed(b) => Ok((header, b)),
            Cow::Owned(_) => unreachable!("parse_record borrows from the input it was given"),
        },
        _ => Err(McapError::BadIndex),
    }
}

/// Read the attachment with the given index.
pub fn attachment<'a>(
    mcap: &'a [u8],
    index: &records::AttachmentIndex,
) -> McapResult<Attachment<'a>> {
    let end = (index.offset + index.length) as usize;
    if mcap.len() < end {
        return Err(McapError::BadIndex);
    }

    let mut reader = LinearReader::sans_magic(&mcap[index.offset as usize..end]);
    let (h, d) = match reader.next().ok_or(McapError::BadIndex)? {
        Ok(Record::Attachment { header, data, .. }) => (header, data),
        Ok(_other_record) => return Err(McapError::BadIndex),
        Err(e) => return Err(e),
    };

    if reader.next().is_some() {
        // Wut - multiple records in the given slice?
        return Err(McapError::BadIndex);
    }

    Ok(Attachment {
        log_time: h.log_time,
        create_time: h.create_time,
        name: h.name,
        media_type: h.media_type,
        data: d,
    })
}

/// Read the metadata with the given index.
pub fn metadata(mcap: &[u8], index: &records::MetadataIndex) -> McapResult<records::Metadata> {
    let end = (index.offset + index.length) as usize;
    if mcap.len() < end {
        return Err(McapError::BadIndex);
    }

    let mut reader = LinearReader::sans_magic(&mcap[index.offset as usize..end]);
    let m = match reader.next().ok_or(McapError::BadIndex)? {
        Ok(Record::Metadata(m)) => m,
        Ok(_other_record) => return Err(McapError::BadIndex),
        Err(e) => return Err(e),
    };

    if reader.next().is_some() {
        // Wut - multiple records in the given slice?
        return Err(McapError::BadIndex);
    }

    Ok(m)
}
