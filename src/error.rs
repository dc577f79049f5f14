//! The error type returned by most fallible operations in this crate.

use thiserror::Error;

/// A result type carrying [`McapError`] as its error variant.
pub type McapResult<T> = Result<T, McapError>;

/// Everything that can go wrong reading or writing an MCAP file, parsing a
/// ROS 2 message schema, or running a compiled decode/encode plan against a
/// CDR (or ROS 1) payload.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum McapError {
    #[error("Bad magic bytes")]
    BadMagic,
    #[error("Bad footer")]
    BadFooter,
    #[error("Record parse failed")]
    Parse(#[from] binrw::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Schema ID {0} was not found")]
    UnknownSchema(String, u16),
    #[error("Schema ID 0 given to a channel with a non-empty schema name")]
    InvalidSchemaId,
    #[error("Message {0} referenced unknown channel ID {1}")]
    UnknownChannel(u32, u16),
    #[error("Channel id {0} appeared twice with different content")]
    ConflictingChannels(String),
    #[error("Schema id {0} appeared twice with different content")]
    ConflictingSchemas(String),
    #[error("Chunk ran out of data before reaching the expected length")]
    BadChunkLength { header: u64, available: u64 },
    #[error("Schema has {header} bytes remaining in the record, but only {available} remain")]
    BadSchemaLength { header: u32, available: u32 },
    #[error("Attachment claimed {header} bytes but only {available} remain")]
    BadAttachmentLength { header: u64, available: u64 },
    #[error("Attachment CRC mismatch: saved {saved}, calculated {calculated}")]
    BadAttachmentCrc { saved: u32, calculated: u32 },
    #[error("Chunk decompressed CRC mismatch: saved {saved}, calculated {calculated}")]
    BadChunkCrc { saved: u32, calculated: u32 },
    #[error("Data section CRC mismatch: saved {saved}, calculated {calculated}")]
    BadDataCrc { saved: u32, calculated: u32 },
    #[error("Summary section CRC mismatch: saved {saved}, calculated {calculated}")]
    BadSummaryCrc { saved: u32, calculated: u32 },
    #[error("Chunk start offset {0} plus its fixed header fields overflows u64")]
    BadChunkStartOffset(u64),
    #[error("Index pointed to a record that didn't parse as expected")]
    BadIndex,
    #[error("Unexpected end of file")]
    UnexpectedEof,
    #[error("Unexpected end of chunk")]
    UnexpectedEoc,
    #[error("Record of opcode {opcode:#x} declared length {len}, larger than this process can address")]
    RecordTooLarge { opcode: u8, len: u64 },
    #[error("Chunk of {0} uncompressed bytes exceeds configured limit")]
    ChunkTooLarge(u64),
    #[error("Requested chunk buffer of {0} bytes does not fit in memory on this platform")]
    ChunkBufferTooLarge(u64),
    #[error("Unrecognized or disabled compression scheme {0:?}")]
    UnsupportedCompression(String),
    #[error("Summary section is absent in strict reconstruction mode")]
    NoSummarySection,
    #[error("Summary-offset index is absent in strict reconstruction mode")]
    NoSummaryIndex,
    #[error("No chunk index is available and a chunked iterator was requested")]
    NoChunkIndex,
    #[error("Footer declared a non-zero summary CRC but no summary section")]
    SummaryCrcWithoutSummary,
    #[error("All 65536 channel IDs are in use")]
    TooManyChannels,
    #[error("All 65536 schema IDs are in use")]
    TooManySchemas,
    #[error("start_attachment() called while a previous attachment was still open")]
    AttachmentInProgress,
    #[error("put_attachment_bytes() called without a call to start_attachment() first")]
    AttachmentNotInProgress,
    #[error("Attachment write exceeded its declared length by {excess} bytes (declared {attachment_length})")]
    AttachmentTooLarge { excess: u64, attachment_length: u64 },
    #[error("Attachment finished with {current} of {expected} declared bytes written")]
    AttachmentIncomplete { expected: u64, current: u64 },

    // --- Schema parser (ROS 2 .msg text) ---
    #[error("Schema text parse error at line {line}: {message}")]
    SchemaParse { line: usize, message: String },
    #[error("Schema references undefined nested type {0:?}")]
    UnresolvedNestedType(String),

    // --- Codec compiler / CDR and ROS1 dialect ---
    #[error("CDR decode read past the end of the payload")]
    MalformedCdr,
    #[error("Length prefix {declared} exceeds {available} remaining bytes")]
    SchemaMismatch { declared: u64, available: u64 },
    #[error("Value for field {0:?} is out of range for its declared primitive type")]
    ValueOutOfRange(String),
    #[error("Value is missing required field {0:?}")]
    MissingField(String),
    #[error("Unsupported encapsulation representation id {0}")]
    UnsupportedRepresentation(u8),
    #[error("Unsupported message encoding {0:?}; expected \"cdr\" or \"ros1\"")]
    UnsupportedMessageEncoding(String),
    #[error("Channel {0:?} has no schema to decode or encode against")]
    MissingSchema(String),

    // --- Public Reader/Writer surface ---
    #[error("No channel has been registered for topic {0:?}")]
    UnknownTopic(String),
}
