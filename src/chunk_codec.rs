//! Chunk (de)compression: the `none`/`lz4`/`zstd` payloads nested inside a
//! [`Record::Chunk`](crate::records::Record::Chunk).
//!
//! Writing goes through the streaming [`crate::write::Writer`]'s own `Compressor<W>`, since a
//! chunk is built up message-by-message against a live output stream. Reading, by contrast, only
//! ever needs the whole decompressed chunk at once (to walk its inner records), so this module
//! exposes a single free function rather than a streaming decoder.

use crc32fast::hash as crc32;

use crate::error::{McapError, McapResult};
use crate::records::ChunkHeader;

/// Decompresses a chunk's raw payload according to its header, optionally validating the
/// decompressed CRC.
///
/// `validate_crc` is ignored (treated as true) when `header.uncompressed_crc` is zero, since a
/// zero CRC means "not provided" per the format rather than "known to be zero".
pub fn decompress_chunk(
    header: &ChunkHeader,
    compressed: &[u8],
    validate_crc: bool,
) -> McapResult<Vec<u8>> {
    let data = match header.compression.as_str() {
        "" => compressed.to_vec(),
        "zstd" => decompress_zstd(compressed)?,
        "lz4" => decompress_lz4(compressed)?,
        other => return Err(McapError::UnsupportedCompression(other.to_string())),
    };

    if data.len() as u64 != header.uncompressed_size {
        return Err(McapError::BadChunkLength {
            header: header.uncompressed_size,
            available: data.len() as u64,
        });
    }

    if validate_crc && header.uncompressed_crc != 0 {
        let calculated = crc32(&data);
        if calculated != header.uncompressed_crc {
            return Err(McapError::BadChunkCrc {
                saved: header.uncompressed_crc,
                calculated,
            });
        }
    }

    Ok(data)
}

#[cfg(feature = "zstd")]
fn decompress_zstd(compressed: &[u8]) -> McapResult<Vec<u8>> {
    Ok(zstd::stream::decode_all(compressed)?)
}

#[cfg(not(feature = "zstd"))]
fn decompress_zstd(_compressed: &[u8]) -> McapResult<Vec<u8>> {
    Err(McapError::UnsupportedCompression("zstd".into()))
}

#[cfg(feature = "lz4")]
fn decompress_lz4(compressed: &[u8]) -> McapResult<Vec<u8>> {
    use std::io::Read;
    let mut decoder = lz4::Decoder::new(compressed)?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(not(feature = "lz4"))]
fn decompress_lz4(_compressed: &[u8]) -> McapResult<Vec<u8>> {
    Err(McapError::UnsupportedCompression("lz4".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_uncompressed() {
        let header = ChunkHeader {
            message_start_time: 0,
            message_end_time: 0,
            uncompressed_size: 5,
            uncompressed_crc: crc32(b"hello"),
            compression: String::new(),
            compressed_size: 5,
        };
        let out = decompress_chunk(&header, b"hello", true).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn catches_crc_mismatch() {
        let header = ChunkHeader {
            message_start_time: 0,
            message_end_time: 0,
            uncompressed_size: 5,
            uncompressed_crc: 0xdead_beef,
            compression: String::new(),
            compressed_size: 5,
        };
        assert!(matches!(
            decompress_chunk(&header, b"hello", true),
            Err(McapError::BadChunkCrc { .. })
        ));
    }

    #[test]
    fn rejects_unknown_compression() {
        let header = ChunkHeader {
            message_start_time: 0,
            message_end_time: 0,
            uncompressed_size: 5,
            uncompressed_crc: 0,
            compression: "brotli".into(),
            compressed_size: 5,
        };
        assert!(matches!(
            decompress_chunk(&header, b"hello", true),
            Err(McapError::UnsupportedCompression(_))
        ));
    }
}
