mod common;

use mcap::WriteOptions;

use std::io::Cursor;

use anyhow::Result;
use itertools::Itertools;
use rayon::prelude::*;

fn demo_round_trip_for_opts(opts: WriteOptions) -> Result<()> {
    let original = common::default_sample_mcap();
    let messages = mcap::MessageStream::new(&original)?;

    let mut tmp = Vec::new();
    {
        let mut writer = opts.create(Cursor::new(&mut tmp))?;

        for m in messages {
            // IRL, we'd add channels, then write messages to known channels,
            // which skips having to re-hash the channel and its schema each time.
            // But since here we'd need to do the same anyways...
            writer.write(&m?)?;
        }
        writer.finish()?;
    }

    // Compare the message stream of our MCAP to the reference one.
    for (theirs, ours) in
        mcap::MessageStream::new(&original)?.zip_eq(mcap::MessageStream::new(&tmp)?)
    {
        assert_eq!(ours?, theirs?)
    }

    // We don't use them, but verify the summary offsets got written.
    let footer = mcap::read::footer(&tmp)?;
    assert_ne!(footer.summary_offset_start, 0);

    // Verify the summary and its connectivity.
    let summary = mcap::Summary::read(&tmp)?.unwrap();
    assert!(summary.attachment_indexes.is_empty());
    assert!(summary.metadata_indexes.is_empty());
    assert!(!summary.chunk_indexes.is_empty());

    // EZ mode: Streamed chunks should match up with a file-level message stream.
    for (whole, by_chunk) in mcap::MessageStream::new(&tmp)?.zip_eq(
        summary
            .chunk_indexes
            .iter()
            .flat_map(|ci| summary.stream_chunk(&tmp, ci).unwrap()),
    ) {
        assert_eq!(whole?, by_chunk?);
    }

    // Hard mode: randomly access every message in the MCAP.
    // Yes, this is dumb and O(n^2).
    let mut messages = Vec::new();

    for ci in &summary.chunk_indexes {
        let mut offsets_and_messages = summary
            .read_message_indexes(&tmp, ci)
            .unwrap()
            // At least parallelize the dumb.
            .into_par_iter()
            .flat_map(|(_k, v)| v)
            .map(|e| (e.offset, summary.seek_message(&tmp, ci, &e).unwrap()))
            .collect::<Vec<(u64, mcap::Message)>>();

        offsets_and_messages.sort_unstable_by_key(|im| im.0);

        for om in offsets_and_messages {
            messages.push(om.1);
        }
    }

    for (streamed, seeked) in mcap::MessageStream::new(&tmp)?.zip_eq(messages.into_iter()) {
        assert_eq!(streamed?, seeked);
    }

    Ok(())
}

#[test]
fn demo_round_trip() -> Result<()> {
    demo_round_trip_for_opts(Default::default())
}

#[test]
fn demo_round_trip_no_seeking() -> Result<()> {
    demo_round_trip_for_opts(WriteOptions::default().disable_seeking(true))
}

#[test]
fn demo_random_chunk_access() -> Result<()> {
    let original = common::default_sample_mcap();

    let summary = mcap::Summary::read(&original)?.unwrap();
    assert!(summary.chunk_indexes.len() > 1);

    // Random access of the second chunk should match the stream of the whole file.
    let messages_in_first_chunk: usize = summary
        .read_message_indexes(&original, &summary.chunk_indexes[0])?
        .values()
        .map(|entries| entries.len())
        .sum();
    let messages_in_second_chunk: usize = summary
        .read_message_indexes(&original, &summary.chunk_indexes[1])?
        .values()
        .map(|entries| entries.len())
        .sum();

    for (whole, random) in mcap::MessageStream::new(&original)?
        .skip(messages_in_first_chunk)
        .take(messages_in_second_chunk)
        .zip_eq(summary.stream_chunk(&original, &summary.chunk_indexes[1])?)
    {
        assert_eq!(whole?, random?);
    }

    // Let's poke around the message indexes.
    let mut index_entries = summary
        .read_message_indexes(&original, &summary.chunk_indexes[1])?
        .values()
        .flatten()
        .copied()
        .collect::<Vec<mcap::records::MessageIndexEntry>>();

    index_entries.sort_unstable_by_key(|e| e.offset);

    // Do a big dumb n^2 seek of each message (dear god, don't ever actually do this).
    for (entry, message) in index_entries
        .iter()
        .zip_eq(summary.stream_chunk(&original, &summary.chunk_indexes[1])?)
    {
        let seeked = summary.seek_message(&original, &summary.chunk_indexes[1], entry)?;
        assert_eq!(seeked, message?);
    }

    Ok(())
}
