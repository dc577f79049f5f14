use std::io::{Cursor, Seek, SeekFrom, Write};

/// The kind of writer that should be used for writing chunks.
///
/// This is used to select what [`ChunkSink`] should be used by the MCAP writer.
#[derive(Default)]
pub(crate) enum ChunkMode {
    /// Mode specifying that chunks should be written directly to the output.
    #[default]
    Direct,
    /// Mode specifying that chunks should be buffered before writing to the output.
    Buffered {
        /// The reusable buffer used by the [`ChunkSink`] when writing to [`ChunkSink::Buffered`].
        buffer: Vec<u8>,
    },
}

/// The writer used for writing chunks: either straight through to the output, or into a
/// reusable in-memory buffer that's flushed to the output once the chunk is closed.
///
/// Buffered mode exists for writers whose underlying output doesn't support seeking
/// ([`crate::write::NoSeek`]): we still need to seek backward to patch in the chunk's final
/// header once its length and CRC are known, so we do that against the buffer instead.
pub(crate) enum ChunkSink<W> {
    Direct(W),
    Buffered(W, Cursor<Vec<u8>>),
}

impl<W: Write> Write for ChunkSink<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ChunkSink::Direct(w) => w.write(buf),
            ChunkSink::Buffered(_, cur) => cur.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ChunkSink::Direct(w) => w.flush(),
            ChunkSink::Buffered(_, cur) => cur.flush(),
        }
    }
}

impl<W: Seek> Seek for ChunkSink<W> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            ChunkSink::Direct(w) => w.seek(pos),
            ChunkSink::Buffered(_, cur) => cur.seek(pos),
        }
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        match self {
            ChunkSink::Direct(w) => w.stream_position(),
            ChunkSink::Buffered(_, cur) => cur.stream_position(),
        }
    }
}
