mod common;

use std::io::Cursor;

use anyhow::Result;
use itertools::Itertools;

fn round_trip(comp: Option<mcap::Compression>) -> Result<()> {
    let original = common::default_sample_mcap();

    let mut tmp = Vec::new();
    {
        let mut writer = mcap::WriteOptions::new()
            .compression(comp)
            .profile("fooey")
            .create(Cursor::new(&mut tmp))?;

        for m in mcap::MessageStream::new(&original)? {
            // IRL, we'd add channels, then write messages to known channels,
            // which skips having to re-hash the channel and its schema each time.
            // But since here we'd need to do the same anyways...
            writer.write(&m?)?;
        }
        writer.finish()?;
    }

    // Compare the message stream of our MCAP to the original one.
    for (theirs, ours) in
        mcap::MessageStream::new(&original)?.zip_eq(mcap::MessageStream::new(&tmp)?)
    {
        assert_eq!(ours?, theirs?)
    }

    Ok(())
}

#[test]
fn uncompressed_round_trip() -> Result<()> {
    round_trip(None)
}

#[cfg(feature = "zstd")]
#[test]
fn zstd_round_trip() -> Result<()> {
    round_trip(Some(mcap::Compression::Zstd))
}

#[cfg(feature = "lz4")]
#[test]
fn lz4_round_trip() -> Result<()> {
    round_trip(Some(mcap::Compression::Lz4))
}
