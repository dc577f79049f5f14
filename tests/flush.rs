mod common;

use std::io::Cursor;

use anyhow::Result;
use itertools::Itertools;

#[test]
fn flush_and_cut_chunks() -> Result<()> {
    let original = common::default_sample_mcap();
    let messages = mcap::MessageStream::new(&original)?;

    let mut tmp = Vec::new();
    {
        let mut writer = mcap::Writer::new(Cursor::new(&mut tmp))?;

        for (i, m) in messages.enumerate() {
            writer.write(&m?)?;
            // Cut a new chunk every other message.
            if i % 2 == 0 {
                writer.flush()?;
            }
        }
        writer.finish()?;
    }

    // Compare the message stream of our MCAP to the original one.
    // Regardless of the chunk boundaries, they should be the same.
    for (theirs, ours) in
        mcap::MessageStream::new(&original)?.zip_eq(mcap::MessageStream::new(&tmp)?)
    {
        assert_eq!(ours?, theirs?)
    }

    Ok(())
}
