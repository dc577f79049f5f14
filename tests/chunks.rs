mod common;

use std::io::Cursor;

use anyhow::Result;
use itertools::Itertools;

/// Checks that the writer will automatically close chunks when they hit a target size, and
/// that doing so doesn't change which messages come back out.
#[test]
fn auto_cut_chunks() -> Result<()> {
    let original = common::default_sample_mcap();
    let messages = mcap::MessageStream::new(&original)?;

    let mut tmp: Vec<u8> = Vec::new();
    {
        // Chunk size 0 ensures every message gets written to its own chunk.
        let mut writer = mcap::WriteOptions::new()
            .chunk_size(Some(0))
            .create(Cursor::new(&mut tmp))?;

        for m in messages {
            writer.write(&m?)?;
        }
        writer.finish()?;
    }

    for (theirs, ours) in
        mcap::MessageStream::new(&original)?.zip_eq(mcap::MessageStream::new(&tmp)?)
    {
        assert_eq!(ours?, theirs?);
    }

    let summary = mcap::Summary::read(&tmp)?.unwrap();
    assert!(summary.chunk_indexes.len() > 1);

    Ok(())
}
