//! Direct, synchronous record-frame walker over a byte slice.
//!
//! This is the single-threaded replacement for an event-driven sans-io reader: given
//! `&[u8]`, it walks `opcode:u8, length:u64_le, payload[length]` frames one at a time and
//! hands each payload to [`records::parse_record`]. [`ChunkFlattener`] layers chunk
//! decompression on top so callers see a flat stream of schema/channel/message records
//! regardless of whether they were chunked.

use crate::error::{McapError, McapResult};
use crate::records::{self, Record};

pub(crate) const RECORD_HEADER_LEN: usize = 9; // 1-byte opcode + 8-byte little-endian length

/// Scans records directly out of a byte slice, with no chunk expansion.
///
/// You probably want [`ChunkFlattener`] (used internally by [`crate::read::RawMessageStream`])
/// unless you specifically want chunk boundaries left intact.
pub struct LinearReader<'a> {
    buf: &'a [u8],
    finished: bool,
    tolerate_missing_end_magic: bool,
}

impl<'a> LinearReader<'a> {
    /// Create a reader for the given file, checking [`crate::MAGIC`] at the start.
    pub fn new(buf: &'a [u8]) -> McapResult<Self> {
        if buf.len() < crate::MAGIC.len() || !buf.starts_with(crate::MAGIC) {
            return Err(McapError::BadMagic);
        }
        Ok(Self {
            buf: &buf[crate::MAGIC.len()..],
            finished: false,
            tolerate_missing_end_magic: false,
        })
    }

    /// Like [`new`](Self::new), but tolerates a missing or truncated end-of-file magic,
    /// for recovering partially-written files.
    pub fn new_lenient(buf: &'a [u8]) -> McapResult<Self> {
        let mut reader = Self::new(buf)?;
        reader.tolerate_missing_end_magic = true;
        Ok(reader)
    }

    /// Like [`new`](Self::new), but assumes `buf` has the magic bytes sliced off.
    ///
    /// Useful for iterating through slices of an MCAP file instead of the whole thing
    /// (e.g. the summary section, or a single chunk's decompressed contents).
    pub fn sans_magic(buf: &'a [u8]) -> Self {
        Self {
            buf,
            finished: false,
            tolerate_missing_end_magic: true,
        }
    }

    fn read_one(&mut self) -> Option<McapResult<Record<'a>>> {
        if self.buf.is_empty() {
            self.finished = true;
            return None;
        }
        if self.buf.len() < RECORD_HEADER_LEN {
            self.finished = true;
            if self.buf == crate::MAGIC || self.tolerate_missing_end_magic {
                return None;
            }
            return Some(Err(McapError::BadMagic));
        }
        let opcode = self.buf[0];
        let len = u64::from_le_bytes(self.buf[1..RECORD_HEADER_LEN].try_into().unwrap());
        let body_start = RECORD_HEADER_LEN;
        let body_end = match body_start.checked_add(len as usize) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                self.finished = true;
                return Some(Err(McapError::RecordTooLarge { opcode, len }));
            }
        };
        let body = &self.buf[body_start..body_end];
        self.buf = &self.buf[body_end..];
        match records::parse_record(opcode, body) {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> Iterator for LinearReader<'a> {
    type Item = McapResult<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.read_one()
    }
}

/// Streams records out of a [`Record::Chunk`], decompressing (and CRC-checking) the
/// chunk once up front.
pub struct ChunkReader<'a> {
    records: std::vec::IntoIter<McapResult<Record<'a>>>,
}

impl<'a> ChunkReader<'a> {
    pub fn new(header: records::ChunkHeader, compressed: &'a [u8]) -> McapResult<Self> {
        Self::new_with_crc_check(header, compressed, true)
    }

    pub fn new_with_crc_check(
        header: records::ChunkHeader,
        compressed: &'a [u8],
        validate_crc: bool,
    ) -> McapResult<Self> {
        let decompressed = crate::chunk_codec::decompress_chunk(&header, compressed, validate_crc)?;
        let records: Vec<McapResult<Record<'a>>> = LinearReader::sans_magic(&decompressed)
            .map(|r| r.map(|rec| rec.into_owned()))
            .collect();
        Ok(Self {
            records: records.into_iter(),
        })
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = McapResult<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

/// Like [`LinearReader`], but transparently unpacks [`Record::Chunk`] payloads into the
/// stream instead of yielding them as-is.
pub struct ChunkFlattener<'a> {
    outer: LinearReader<'a>,
    pending: std::collections::VecDeque<McapResult<Record<'a>>>,
    validate_crcs: bool,
}

impl<'a> ChunkFlattener<'a> {
    pub fn new(buf: &'a [u8]) -> McapResult<Self> {
        Self::new_with_options(buf, true)
    }

    pub fn new_lenient(buf: &'a [u8]) -> McapResult<Self> {
        let mut flattener = Self::new_with_options(buf, true)?;
        flattener.outer.tolerate_missing_end_magic = true;
        Ok(flattener)
    }

    pub fn new_with_options(buf: &'a [u8], validate_crcs: bool) -> McapResult<Self> {
        Ok(Self {
            outer: LinearReader::new(buf)?,
            pending: Default::default(),
            validate_crcs,
        })
    }
}

impl<'a> Iterator for ChunkFlattener<'a> {
    type Item = McapResult<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(r) = self.pending.pop_front() {
                return Some(r);
            }
            match self.outer.next()? {
                Ok(Record::Chunk { header, data }) => {
                    match crate::chunk_codec::decompress_chunk(&header, &data, self.validate_crcs)
                    {
                        Ok(decompressed) => {
                            let records: Vec<McapResult<Record<'a>>> =
                                LinearReader::sans_magic(&decompressed)
                                    .map(|r| r.map(|rec| rec.into_owned()))
                                    .collect();
                            self.pending.extend(records);
                            continue;
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                Ok(other) => return Some(Ok(other)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DataEnd, Footer, Header};

    #[test]
    fn rejects_missing_start_magic() {
        assert!(matches!(
            LinearReader::new(b"not an mcap file"),
            Err(McapError::BadMagic)
        ));
    }

    #[test]
    fn reads_header_data_end_footer() {
        let mut buf = Vec::new();
        buf.extend_from_slice(crate::MAGIC);
        crate::write::test_support::write_record(
            &mut buf,
            &Record::Header(Header {
                profile: "".into(),
                library: "".into(),
            }),
        );
        crate::write::test_support::write_record(
            &mut buf,
            &Record::DataEnd(DataEnd {
                data_section_crc: 0,
            }),
        );
        crate::write::test_support::write_record(
            &mut buf,
            &Record::Footer(Footer {
                summary_start: 0,
                summary_offset_start: 0,
                summary_crc: 0,
            }),
        );
        buf.extend_from_slice(crate::MAGIC);

        let records: Vec<_> = LinearReader::new(&buf).unwrap().collect();
        assert_eq!(records.len(), 3);
        for r in records {
            r.unwrap();
        }
    }
}
