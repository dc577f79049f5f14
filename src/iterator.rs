//! Time-bounded, topic-filtered, bidirectional message iteration, plus summary
//! *reconstruction* for files that were truncated or closed without a summary section.
//!
//! [`crate::read::Summary::read`] only loads a summary section that's actually present.
//! [`build_summary`] fills in the gaps: given a [`ReconstructionMode`], it decides whether to
//! trust the file's own summary, rebuild one by walking every chunk, or fail outright. Once a
//! summary is in hand (borrowed or rebuilt), [`MessageIterator`] merges the per-chunk,
//! per-channel message indexes into a single ordered, filtered sequence of [`Message`]s.

use std::{borrow::Cow, cmp::Reverse, collections::BinaryHeap, collections::HashMap, sync::Arc};

use crate::{
    cache::{ChunkCache, DEFAULT_CAPACITY},
    channels::ChannelAccumulator,
    linear::{LinearReader, RECORD_HEADER_LEN},
    read::{self, read_chunk_record, validate_summary_crc, Summary},
    records::{self, op, Record},
    Channel, McapError, McapResult, Message,
};

/// A predicate applied to a message's header and raw (still CDR/ROS1-encoded) payload, before
/// any higher-level decoding happens.
///
/// Receiving the header separately from the payload lets a predicate filter on `channel_id`,
/// `log_time` or `sequence` without ever touching the bytes.
pub type PredicateFn = Box<dyn Fn(&records::MessageHeader, &[u8]) -> bool>;

/// Which channels a [`MessageIterator`] should consider.
#[derive(Debug, Clone)]
pub enum TopicFilter {
    /// Every channel in the file.
    All,
    /// Exactly one topic, by literal name.
    Topic(String),
    /// Any of these topics, by literal name.
    Topics(Vec<String>),
    /// A glob pattern (`*` and `?`) matched against the full topic string. `*` does not cross
    /// `/` boundaries; `?` matches exactly one non-`/` character.
    Glob(String),
}

impl TopicFilter {
    /// Resolves this filter against a summary's channel table, returning the set of matching
    /// channel IDs.
    pub fn resolve(&self, summary: &Summary) -> std::collections::HashSet<u16> {
        match self {
            TopicFilter::All => summary.channels.keys().copied().collect(),
            TopicFilter::Topic(topic) => summary
                .channels
                .values()
                .filter(|c| &c.topic == topic)
                .map(|c| c.id)
                .collect(),
            TopicFilter::Topics(topics) => {
                let wanted: std::collections::HashSet<&str> =
                    topics.iter().map(String::as_str).collect();
                summary
                    .channels
                    .values()
                    .filter(|c| wanted.contains(c.topic.as_str()))
                    .map(|c| c.id)
                    .collect()
            }
            TopicFilter::Glob(pattern) => summary
                .channels
                .values()
                .filter(|c| glob_match(pattern, &c.topic))
                .map(|c| c.id)
                .collect(),
        }
    }
}

/// Matches `text` against a shell-style glob `pattern`, where `*` matches zero or more
/// non-`/` characters and `?` matches exactly one non-`/` character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None; // (star index in p, resume index in t)

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' && t[ti] != '/' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, resume)) = backtrack {
            if t[resume] == '/' {
                return false;
            }
            pi = star + 1;
            ti = resume + 1;
            backtrack = Some((star, ti));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Options controlling a [`MessageIterator`]: which channels, which time range, which order.
pub struct MessageIteratorOptions {
    topics: TopicFilter,
    start_time: Option<u64>,
    end_time: Option<u64>,
    in_log_time_order: bool,
    in_reverse: bool,
    predicate: Option<PredicateFn>,
    cache_capacity: usize,
    validate_crc: bool,
}

impl MessageIteratorOptions {
    /// Starts from the default options (all channels, unbounded time range, forward,
    /// log-time order, CRC-checked chunks) for the given topic filter.
    pub fn new(topics: TopicFilter) -> Self {
        Self {
            topics,
            start_time: None,
            end_time: None,
            in_log_time_order: true,
            in_reverse: false,
            predicate: None,
            cache_capacity: DEFAULT_CAPACITY,
            validate_crc: true,
        }
    }

    /// Only yields messages with `log_time >= start_time`.
    pub fn start_time(mut self, start_time: u64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Only yields messages with `log_time <= end_time`.
    pub fn end_time(mut self, end_time: u64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Walks chunks in ascending file-offset order instead of merging by `log_time` across
    /// the whole file. Messages within a chunk are still time-ordered.
    pub fn in_file_order(mut self) -> Self {
        self.in_log_time_order = false;
        self
    }

    /// Yields messages in decreasing `log_time` (or decreasing file offset, if combined with
    /// [`in_file_order`](Self::in_file_order)) instead of increasing.
    pub fn reverse(mut self, in_reverse: bool) -> Self {
        self.in_reverse = in_reverse;
        self
    }

    /// Filters messages by their header and raw payload before they're returned. Runs after
    /// time-range filtering, before any payload decoding.
    pub fn predicate(mut self, predicate: PredicateFn) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Number of decompressed chunks to keep resident at once. `0` disables caching.
    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Whether to validate each chunk's decompressed CRC before handing back its messages.
    /// Disabling this is faster but will silently return messages from a corrupted chunk.
    pub fn validate_crc(mut self, validate_crc: bool) -> Self {
        self.validate_crc = validate_crc;
        self
    }
}

/// One channel's remaining `(log_time, offset)` entries within a single chunk, walked in the
/// direction the iterator emits messages.
struct Cursor {
    chunk_idx: usize,
    channel_id: u16,
    entries: Vec<records::MessageIndexEntry>,
    pos: usize,
}

impl Cursor {
    fn head(&self) -> Option<&records::MessageIndexEntry> {
        self.entries.get(self.pos)
    }
}

/// A candidate `(log_time, chunk_start_offset, offset)` key paired with the cursor it came
/// from, ordered so a max-heap pop always returns the key that should be emitted next.
struct HeapItem {
    key: (u64, u64, u64),
    cursor_idx: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// A min-heap (forward) or max-heap (reverse) over [`HeapItem`]s, so both directions share one
/// merge loop.
enum Heap {
    Forward(BinaryHeap<Reverse<HeapItem>>),
    Reverse(BinaryHeap<HeapItem>),
}

impl Heap {
    fn new(in_reverse: bool) -> Self {
        if in_reverse {
            Heap::Reverse(BinaryHeap::new())
        } else {
            Heap::Forward(BinaryHeap::new())
        }
    }

    fn push(&mut self, item: HeapItem) {
        match self {
            Heap::Forward(h) => h.push(Reverse(item)),
            Heap::Reverse(h) => h.push(item),
        }
    }

    fn pop(&mut self) -> Option<HeapItem> {
        match self {
            Heap::Forward(h) => h.pop().map(|Reverse(item)| item),
            Heap::Reverse(h) => h.pop(),
        }
    }
}

/// Per-channel message-index entries reconstructed purely in memory (no on-disk
/// `MessageIndex` record to point back at), keyed by `(chunk_start_offset, channel_id)`.
///
/// Returned by [`build_summary`] when it had to walk the data section itself; pass it to
/// [`MessageIterator::with_reconstructed`] so the iterator doesn't try (and fail) to read
/// index records that don't exist on disk.
pub type ReconstructedIndex = HashMap<(u64, u16), Vec<records::MessageIndexEntry>>;

/// The result of [`build_summary`]: a [`Summary`] plus, if it had to be rebuilt by walking the
/// data section, the message indexes that walk produced.
pub struct BuiltSummary {
    pub summary: Summary,
    pub reconstructed_index: Option<ReconstructedIndex>,
}

/// How hard [`build_summary`] should work to produce a usable summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionMode {
    /// Only ever use the file's own summary and summary-offset index; fail if either is
    /// missing.
    Never,
    /// Use the file's own summary (and its offset index, if present) when available;
    /// otherwise rebuild by walking the data section.
    Missing,
    /// Always rebuild by walking the data section, ignoring any summary the file already has.
    Always,
}

/// Loads (or, per `mode`, rebuilds) the summary of an MCAP file, validating chunk CRCs along
/// the way.
///
/// See the module documentation and [`ReconstructionMode`] for the decision table this
/// implements.
pub fn build_summary(mcap: &[u8], mode: ReconstructionMode) -> McapResult<BuiltSummary> {
    build_summary_with_crc_check(mcap, mode, true)
}

/// Like [`build_summary`], but lets the caller skip chunk CRC validation while reconstructing
/// from the data section (faster, at the cost of silently accepting corrupted chunks).
pub fn build_summary_with_crc_check(
    mcap: &[u8],
    mode: ReconstructionMode,
    validate_crc: bool,
) -> McapResult<BuiltSummary> {
    let foot = read::footer(mcap)?;
    let has_summary = foot.summary_start != 0;
    let has_offset_index = foot.summary_offset_start != 0;

    if !has_summary && foot.summary_crc != 0 {
        return Err(McapError::SummaryCrcWithoutSummary);
    }

    match mode {
        ReconstructionMode::Never => {
            if !has_summary {
                return Err(McapError::NoSummarySection);
            }
            if !has_offset_index {
                return Err(McapError::NoSummaryIndex);
            }
            Ok(BuiltSummary {
                summary: load_via_offset_map(mcap, &foot)?,
                reconstructed_index: None,
            })
        }
        ReconstructionMode::Missing => {
            if !has_summary {
                log::warn!(
                    "mcap has no summary section; reconstructing one by scanning the data section"
                );
                return build_from_data(mcap, validate_crc);
            }
            let summary = if has_offset_index {
                load_via_offset_map(mcap, &foot)?
            } else {
                log::warn!(
                    "mcap summary section is present but has no offset index; scanning it directly"
                );
                scan_summary(mcap)?
            };
            Ok(BuiltSummary {
                summary,
                reconstructed_index: None,
            })
        }
        ReconstructionMode::Always => build_from_data(mcap, validate_crc),
    }
}

fn scan_summary(mcap: &[u8]) -> McapResult<Summary> {
    Summary::read(mcap)?.ok_or(McapError::NoSummarySection)
}

/// Reads the offset-map groups at `summary_offset_start` and loads exactly the record ranges
/// they point at, rather than scanning the whole summary section.
fn load_via_offset_map(mcap: &[u8], foot: &records::Footer) -> McapResult<Summary> {
    let summary_region_end = mcap.len() - crate::MAGIC.len() - read::FOOTER_RECORD_LEN;
    if foot.summary_offset_start as usize > summary_region_end {
        return Err(McapError::BadIndex);
    }
    let summary_buf = &mcap[foot.summary_start as usize..summary_region_end];
    validate_summary_crc(summary_buf, foot)?;

    let offset_map_buf = &mcap[foot.summary_offset_start as usize..summary_region_end];
    let mut summary = Summary::default();
    for record in LinearReader::sans_magic(offset_map_buf) {
        let Record::SummaryOffset(group) = record? else {
            continue;
        };
        let start = group.group_start as usize;
        let end = start
            .checked_add(group.group_length as usize)
            .ok_or(McapError::BadIndex)?;
        if end > mcap.len() {
            return Err(McapError::BadIndex);
        }
        for inner in LinearReader::sans_magic(&mcap[start..end]) {
            ingest_record(&mut summary, inner?)?;
        }
    }
    summary
        .chunk_indexes
        .sort_by_key(|idx| idx.message_start_time);
    Ok(summary)
}

fn ingest_record(summary: &mut Summary, record: Record<'_>) -> McapResult<()> {
    match record {
        Record::Schema { header, data } => {
            if header.id == 0 {
                return Ok(());
            }
            summary.schemas.insert(
                header.id,
                Arc::new(crate::Schema {
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
    Ok(())
}

/// Walks the whole data section, decompressing every chunk, to build a summary from scratch.
/// Used whenever the file lacks a (trustworthy) summary: `H=N` in the decision table, and
/// always for `mode=always`, which treats any existing summary or chunk-local `MessageIndex`
/// records as untrustworthy and rebuilds everything by direct observation.
fn build_from_data(mcap: &[u8], validate_crc: bool) -> McapResult<BuiltSummary> {
    if mcap.len() < crate::MAGIC.len() || !mcap.starts_with(crate::MAGIC) {
        return Err(McapError::BadMagic);
    }
    if !validate_crc {
        log::warn!("reconstructing mcap summary with chunk CRC validation disabled");
    }

    let mut accumulator = ChannelAccumulator::<'static>::default();
    let mut chunk_indexes = Vec::new();
    let mut reconstructed_index: ReconstructedIndex = HashMap::new();
    let mut stats = records::Statistics::default();

    let mut pos = crate::MAGIC.len();
    while pos + RECORD_HEADER_LEN <= mcap.len() {
        if &mcap[pos..] == crate::MAGIC {
            break;
        }
        let opcode = mcap[pos];
        let len = u64::from_le_bytes(mcap[pos + 1..pos + RECORD_HEADER_LEN].try_into().unwrap());
        let body_start = pos + RECORD_HEADER_LEN;
        let body_end = body_start
            .checked_add(len as usize)
            .filter(|&end| end <= mcap.len())
            .ok_or(McapError::RecordTooLarge { opcode, len })?;
        let record_start = pos as u64;
        let body = &mcap[body_start..body_end];
        let record = records::parse_record(opcode, body)?;
        pos = body_end;

        match record {
            Record::Schema { header, data } => {
                accumulator.add_schema(header, Cow::Owned(data.into_owned()))?;
            }
            Record::Channel(chan) => {
                accumulator.add_channel(chan)?;
            }
            Record::Message { header, .. } => {
                stats.message_count += 1;
                *stats
                    .channel_message_counts
                    .entry(header.channel_id)
                    .or_insert(0) += 1;
            }
            Record::Chunk { header, data } => {
                let decompressed =
                    crate::chunk_codec::decompress_chunk(&header, &data, validate_crc)?;
                let mut per_channel: HashMap<u16, Vec<records::MessageIndexEntry>> = HashMap::new();
                let mut message_start_time = u64::MAX;
                let mut message_end_time = 0u64;

                let mut inner_pos = 0usize;
                while inner_pos + RECORD_HEADER_LEN <= decompressed.len() {
                    let iopcode = decompressed[inner_pos];
                    let ilen = u64::from_le_bytes(
                        decompressed[inner_pos + 1..inner_pos + RECORD_HEADER_LEN]
                            .try_into()
                            .unwrap(),
                    );
                    let ibody_start = inner_pos + RECORD_HEADER_LEN;
                    let ibody_end = ibody_start
                        .checked_add(ilen as usize)
                        .filter(|&end| end <= decompressed.len())
                        .ok_or(McapError::RecordTooLarge {
                            opcode: iopcode,
                            len: ilen,
                        })?;
                    let irecord_start = inner_pos as u64;
                    let ibody = &decompressed[ibody_start..ibody_end];
                    let irecord = records::parse_record(iopcode, ibody)?;
                    inner_pos = ibody_end;

                    match irecord {
                        Record::Schema { header, data } => {
                            accumulator.add_schema(header, Cow::Owned(data.into_owned()))?;
                        }
                        Record::Channel(chan) => {
                            accumulator.add_channel(chan)?;
                        }
                        Record::Message { header, .. } => {
                            message_start_time = message_start_time.min(header.log_time);
                            message_end_time = message_end_time.max(header.log_time);
                            stats.message_count += 1;
                            *stats
                                .channel_message_counts
                                .entry(header.channel_id)
                                .or_insert(0) += 1;
                            per_channel
                                .entry(header.channel_id)
                                .or_default()
                                .push(records::MessageIndexEntry {
                                    log_time: header.log_time,
                                    offset: irecord_start,
                                });
                        }
                        _other => {}
                    }
                }

                if message_start_time > message_end_time {
                    message_start_time = 0;
                    message_end_time = 0;
                }

                let chunk_idx = chunk_indexes.len();
                for (channel_id, mut entries) in per_channel {
                    entries.sort_by_key(|e| (e.log_time, e.offset));
                    reconstructed_index.insert((record_start, channel_id), entries);
                    let _ = channel_id; // already used as the map key above
                }
                let _ = chunk_idx;

                chunk_indexes.push(records::ChunkIndex {
                    message_start_time,
                    message_end_time,
                    chunk_start_offset: record_start,
                    chunk_length: pos as u64 - record_start,
                    message_index_offsets: Default::default(),
                    message_index_length: 0,
                    compression: header.compression.clone(),
                    compressed_size: header.compressed_size,
                    uncompressed_size: header.uncompressed_size,
                });
                stats.chunk_count += 1;
            }
            Record::DataEnd(_) => break,
            _other => {}
        }
    }

    chunk_indexes.sort_by_key(|idx| idx.message_start_time);
    stats.schema_count = accumulator.schemas.len() as u16;
    stats.channel_count = accumulator.channels.len() as u32;
    stats.message_start_time = chunk_indexes
        .iter()
        .map(|c| c.message_start_time)
        .min()
        .unwrap_or(0);
    stats.message_end_time = chunk_indexes
        .iter()
        .map(|c| c.message_end_time)
        .max()
        .unwrap_or(0);

    Ok(BuiltSummary {
        summary: Summary {
            stats: Some(stats),
            channels: accumulator.channels,
            schemas: accumulator.schemas,
            chunk_indexes,
            attachment_indexes: Vec::new(),
            metadata_indexes: Vec::new(),
        },
        reconstructed_index: Some(reconstructed_index),
    })
}

/// A lazily-decoding, time-bounded, topic-filtered, bidirectional iterator over a chunked
/// MCAP file's messages, plus random-access lookup.
///
/// Holds a [`ChunkCache`] internally: repeated lookups into the same chunk (including ones
/// made by [`get_message`](Self::get_message)) only decompress it once.
pub struct MessageIterator<'a> {
    mcap: &'a [u8],
    summary: &'a Summary,
    reconstructed: Option<&'a ReconstructedIndex>,
    cache: ChunkCache,
    in_reverse: bool,
    start_time: u64,
    end_time: u64,
    predicate: Option<PredicateFn>,
    validate_crc: bool,

    groups: std::vec::IntoIter<Vec<Cursor>>,
    cursors: Vec<Cursor>,
    heap: Heap,
}

impl<'a> MessageIterator<'a> {
    /// Builds an iterator over `summary`'s own (on-disk) message indexes.
    pub fn new(
        mcap: &'a [u8],
        summary: &'a Summary,
        options: MessageIteratorOptions,
    ) -> McapResult<Self> {
        Self::with_reconstructed(mcap, summary, None, options)
    }

    /// Like [`new`](Self::new), but consults `reconstructed` (as returned by [`build_summary`])
    /// for chunks whose message index was rebuilt in memory rather than read from disk.
    pub fn with_reconstructed(
        mcap: &'a [u8],
        summary: &'a Summary,
        reconstructed: Option<&'a ReconstructedIndex>,
        options: MessageIteratorOptions,
    ) -> McapResult<Self> {
        if summary.chunk_indexes.is_empty() {
            return Err(McapError::NoChunkIndex);
        }
        if !options.validate_crc {
            log::warn!("iterating mcap messages with chunk CRC validation disabled");
        }

        let start_time = options.start_time.unwrap_or(0);
        let end_time = options.end_time.unwrap_or(u64::MAX);
        let channel_ids = options.topics.resolve(summary);

        let mut candidates: Vec<usize> = summary
            .chunk_indexes
            .iter()
            .enumerate()
            .filter(|(_, idx)| idx.message_start_time <= end_time && idx.message_end_time >= start_time)
            .map(|(i, _)| i)
            .collect();

        let groups: Vec<Vec<usize>> = if options.in_log_time_order {
            vec![candidates]
        } else {
            candidates.sort_by_key(|&i| summary.chunk_indexes[i].chunk_start_offset);
            if options.in_reverse {
                candidates.reverse();
            }
            candidates.into_iter().map(|i| vec![i]).collect()
        };

        let mut built_groups = Vec::with_capacity(groups.len());
        for group in groups {
            let mut cursors = Vec::new();
            for chunk_idx in group {
                let chunk_index = &summary.chunk_indexes[chunk_idx];
                for &channel_id in &channel_ids {
                    let mut entries = message_index_entries(
                        mcap,
                        summary,
                        reconstructed,
                        chunk_index,
                        channel_id,
                    )?;
                    entries.retain(|e| e.log_time >= start_time && e.log_time <= end_time);
                    if entries.is_empty() {
                        continue;
                    }
                    if options.in_reverse {
                        entries.reverse();
                    }
                    cursors.push(Cursor {
                        chunk_idx,
                        channel_id,
                        entries,
                        pos: 0,
                    });
                }
            }
            built_groups.push(cursors);
        }

        let mut iter = Self {
            mcap,
            summary,
            reconstructed,
            cache: ChunkCache::new(options.cache_capacity),
            in_reverse: options.in_reverse,
            start_time,
            end_time,
            predicate: options.predicate,
            validate_crc: options.validate_crc,
            groups: built_groups.into_iter(),
            cursors: Vec::new(),
            heap: Heap::new(options.in_reverse),
        };
        iter.advance_group();
        Ok(iter)
    }

    /// Loads the next group of cursors (for file-order mode, the next chunk's; for
    /// log-time-order mode there's only ever one group) and seeds the heap from their heads.
    /// Returns `false` once there are no more groups.
    fn advance_group(&mut self) -> bool {
        loop {
            match self.groups.next() {
                Some(cursors) => {
                    self.cursors = cursors;
                    self.heap = Heap::new(self.in_reverse);
                    for (idx, cursor) in self.cursors.iter().enumerate() {
                        if let Some(entry) = cursor.head() {
                            self.heap.push(HeapItem {
                                key: (
                                    entry.log_time,
                                    self.summary.chunk_indexes[cursor.chunk_idx].chunk_start_offset,
                                    entry.offset,
                                ),
                                cursor_idx: idx,
                            });
                        }
                    }
                    if !self.cursors.is_empty() {
                        return true;
                    }
                    // empty group (every cursor filtered away); try the next one
                }
                None => return false,
            }
        }
    }

    fn chunk_bytes(&mut self, chunk_index: &records::ChunkIndex) -> McapResult<&[u8]> {
        if self.cache.get(chunk_index.chunk_start_offset).is_none() {
            let (header, compressed) = read_chunk_record(self.mcap, chunk_index)?;
            let decompressed =
                crate::chunk_codec::decompress_chunk(&header, compressed, self.validate_crc)?;
            self.cache.insert(chunk_index.chunk_start_offset, decompressed);
        }
        Ok(self
            .cache
            .get(chunk_index.chunk_start_offset)
            .expect("just inserted"))
    }

    fn read_record_at(
        &mut self,
        chunk_idx: usize,
        offset: u64,
    ) -> McapResult<(records::MessageHeader, Cow<'static, [u8]>)> {
        let chunk_index = self.summary.chunk_indexes[chunk_idx].clone();
        let decompressed = self.chunk_bytes(&chunk_index)?;
        if offset as usize >= decompressed.len() {
            return Err(McapError::BadIndex);
        }
        let mut reader = LinearReader::sans_magic(&decompressed[offset as usize..]);
        match reader.next().ok_or(McapError::BadIndex)?? {
            Record::Message { header, data } => Ok((header, Cow::Owned(data.into_owned()))),
            _other => Err(McapError::BadIndex),
        }
    }

    fn to_message(
        &self,
        header: records::MessageHeader,
        data: Cow<'static, [u8]>,
    ) -> McapResult<Message<'static>> {
        let channel = self
            .summary
            .channels
            .get(&header.channel_id)
            .cloned()
            .ok_or(McapError::UnknownChannel(header.sequence, header.channel_id))?;
        Ok(Message {
            channel,
            sequence: header.sequence,
            log_time: header.log_time,
            publish_time: header.publish_time,
            data,
        })
    }

    /// Random-access lookup: the message on `channel_id` with exactly this `log_time`, if any.
    ///
    /// Binary-searches the covering chunk's message index; decompresses (and caches) that
    /// chunk if it isn't already resident.
    pub fn get_message(&mut self, channel_id: u16, log_time: u64) -> McapResult<Option<Message<'static>>> {
        for chunk_idx in 0..self.summary.chunk_indexes.len() {
            let chunk_index = self.summary.chunk_indexes[chunk_idx].clone();
            if log_time < chunk_index.message_start_time || log_time > chunk_index.message_end_time {
                continue;
            }
            let entries = message_index_entries(
                self.mcap,
                self.summary,
                self.reconstructed,
                &chunk_index,
                channel_id,
            )?;
            if let Ok(pos) = entries.binary_search_by_key(&log_time, |e| e.log_time) {
                let offset = entries[pos].offset;
                let (header, data) = self.read_record_at(chunk_idx, offset)?;
                return self.to_message(header, data).map(Some);
            }
        }
        Ok(None)
    }
}

/// Looks up the message-index entries for one channel within one chunk, preferring an
/// in-memory reconstructed index (if supplied) over the file's own `MessageIndex` records.
fn message_index_entries(
    mcap: &[u8],
    summary: &Summary,
    reconstructed: Option<&ReconstructedIndex>,
    chunk_index: &records::ChunkIndex,
    channel_id: u16,
) -> McapResult<Vec<records::MessageIndexEntry>> {
    if let Some(map) = reconstructed {
        return Ok(map
            .get(&(chunk_index.chunk_start_offset, channel_id))
            .cloned()
            .unwrap_or_default());
    }
    let channel = summary
        .channels
        .get(&channel_id)
        .cloned()
        .ok_or(McapError::UnknownChannel(0, channel_id))?;
    let indexes = summary.read_message_indexes(mcap, chunk_index)?;
    Ok(indexes.get(&channel).cloned().unwrap_or_default())
}

impl Iterator for MessageIterator<'_> {
    type Item = McapResult<Message<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.heap.pop() else {
                if !self.advance_group() {
                    return None;
                }
                continue;
            };

            let (chunk_idx, offset) = {
                let cursor = &mut self.cursors[item.cursor_idx];
                let entry = *cursor.head().expect("heap item implies a live head");
                cursor.pos += 1;
                if let Some(next_entry) = cursor.head() {
                    self.heap.push(HeapItem {
                        key: (
                            next_entry.log_time,
                            self.summary.chunk_indexes[cursor.chunk_idx].chunk_start_offset,
                            next_entry.offset,
                        ),
                        cursor_idx: item.cursor_idx,
                    });
                }
                (cursor.chunk_idx, entry.offset)
            };

            let (header, data) = match self.read_record_at(chunk_idx, offset) {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };

            if let Some(predicate) = &self.predicate {
                if !predicate(&header, &data) {
                    continue;
                }
            }

            return Some(self.to_message(header, data));
        }
    }
}

// Silence an unused-import warning on builds where `op` isn't otherwise referenced; kept for
// parity with the rest of the record-handling modules, which all name their opcode constants
// explicitly in doc links.
#[allow(unused_imports)]
use op as _opcodes;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::WriteOptions;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    fn sample_mcap(in_chunks: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = WriteOptions::new()
                .use_chunks(in_chunks)
                .compression(None)
                .create(Cursor::new(&mut buf))
                .unwrap();
            let schema = Arc::new(crate::Schema {
                id: 1,
                name: "std_msgs/Empty".to_string(),
                encoding: "ros2msg".to_string(),
                data: Cow::Owned(Vec::new()),
            });
            let channel_a = Arc::new(Channel {
                id: 0,
                topic: "topic_a".to_string(),
                schema: Some(schema.clone()),
                message_encoding: "cdr".to_string(),
                metadata: BTreeMap::new(),
            });
            let channel_b = Arc::new(Channel {
                id: 1,
                topic: "topic_b".to_string(),
                schema: Some(schema.clone()),
                message_encoding: "cdr".to_string(),
                metadata: BTreeMap::new(),
            });

            for i in 0..20u64 {
                let channel = if i % 2 == 0 { channel_a.clone() } else { channel_b.clone() };
                writer
                    .write(&Message {
                        channel,
                        sequence: i as u32,
                        log_time: i * 10,
                        publish_time: i * 10,
                        data: Cow::Owned(vec![i as u8]),
                    })
                    .unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn forward_log_time_order_is_monotonic() {
        let buf = sample_mcap(true);
        let summary = Summary::read(&buf).unwrap().unwrap();
        let iter = MessageIterator::new(&buf, &summary, MessageIteratorOptions::new(TopicFilter::All)).unwrap();
        let times: Vec<u64> = iter.map(|m| m.unwrap().log_time).collect();
        assert_eq!(times.len(), 20);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn reverse_is_strictly_decreasing_and_symmetric() {
        let buf = sample_mcap(true);
        let summary = Summary::read(&buf).unwrap().unwrap();
        let forward: Vec<u64> = MessageIterator::new(&buf, &summary, MessageIteratorOptions::new(TopicFilter::All))
            .unwrap()
            .map(|m| m.unwrap().log_time)
            .collect();
        let mut reverse: Vec<u64> = MessageIterator::new(
            &buf,
            &summary,
            MessageIteratorOptions::new(TopicFilter::All).reverse(true),
        )
        .unwrap()
        .map(|m| m.unwrap().log_time)
        .collect();
        reverse.reverse();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn topic_filter_selects_only_matching_channel() {
        let buf = sample_mcap(true);
        let summary = Summary::read(&buf).unwrap().unwrap();
        let iter = MessageIterator::new(
            &buf,
            &summary,
            MessageIteratorOptions::new(TopicFilter::Topic("topic_a".to_string())),
        )
        .unwrap();
        let messages: Vec<_> = iter.map(|m| m.unwrap()).collect();
        assert_eq!(messages.len(), 10);
        assert!(messages.iter().all(|m| m.channel.topic == "topic_a"));
    }

    #[test]
    fn time_bounds_exclude_outside_range() {
        let buf = sample_mcap(true);
        let summary = Summary::read(&buf).unwrap().unwrap();
        let iter = MessageIterator::new(
            &buf,
            &summary,
            MessageIteratorOptions::new(TopicFilter::All)
                .start_time(50)
                .end_time(100),
        )
        .unwrap();
        let times: Vec<u64> = iter.map(|m| m.unwrap().log_time).collect();
        assert!(times.iter().all(|&t| (50..=100).contains(&t)));
        assert_eq!(times, vec![50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn predicate_filters_after_header_before_decode() {
        let buf = sample_mcap(true);
        let summary = Summary::read(&buf).unwrap().unwrap();
        let iter = MessageIterator::new(
            &buf,
            &summary,
            MessageIteratorOptions::new(TopicFilter::All)
                .predicate(Box::new(|header, _data| header.sequence % 4 == 0)),
        )
        .unwrap();
        let seqs: Vec<u32> = iter.map(|m| m.unwrap().sequence).collect();
        assert!(seqs.iter().all(|s| s % 4 == 0));
    }

    #[test]
    fn get_message_random_access_matches_iteration() {
        let buf = sample_mcap(true);
        let summary = Summary::read(&buf).unwrap().unwrap();
        let mut iter =
            MessageIterator::new(&buf, &summary, MessageIteratorOptions::new(TopicFilter::All)).unwrap();
        let channel_a = summary
            .channels
            .values()
            .find(|c| c.topic == "topic_a")
            .unwrap()
            .id;
        let msg = iter.get_message(channel_a, 40).unwrap().unwrap();
        assert_eq!(msg.log_time, 40);
        assert_eq!(msg.channel.topic, "topic_a");
        assert!(iter.get_message(channel_a, 41).unwrap().is_none());
    }

    #[test]
    fn build_summary_from_data_matches_native_summary() {
        let buf = sample_mcap(true);
        let native = Summary::read(&buf).unwrap().unwrap();
        let built = build_summary(&buf, ReconstructionMode::Always).unwrap();
        assert_eq!(built.summary.chunk_indexes.len(), native.chunk_indexes.len());
        assert_eq!(built.summary.channels.len(), native.channels.len());

        let mut iter = MessageIterator::with_reconstructed(
            &buf,
            &built.summary,
            built.reconstructed_index.as_ref(),
            MessageIteratorOptions::new(TopicFilter::All),
        )
        .unwrap();
        let times: Vec<u64> = (&mut iter).map(|m| m.unwrap().log_time).collect();
        assert_eq!(times.len(), 20);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn build_summary_never_mode_requires_existing_summary() {
        let buf = sample_mcap(true);
        // Strip everything from the footer's summary_start onward to simulate a file with no
        // summary section, leaving the leading magic and data section intact.
        let foot = crate::read::footer(&buf).unwrap();
        assert_ne!(foot.summary_start, 0);
        let result = build_summary(&buf[..foot.summary_start as usize], ReconstructionMode::Never);
        assert!(result.is_err());
    }

    #[test]
    fn glob_matches_full_topic_without_crossing_slash() {
        assert!(glob_match("/robot/*/pose", "/robot/left_arm/pose"));
        assert!(!glob_match("/robot/*/pose", "/robot/left_arm/extra/pose"));
        assert!(glob_match("/robot/?rm/pose", "/robot/arm/pose"));
        assert!(glob_match("*", "anything"));
    }
}
