mod common;

use std::borrow::Cow;
use std::io::Cursor;

use anyhow::Result;

/// Writes a single attachment, then reads its raw bytes back via the message stream's
/// sibling, the data section, and confirms round-tripping through the summary's
/// attachment index recovers it byte-for-byte.
#[test]
fn round_trip() -> Result<()> {
    let attachment = mcap::Attachment {
        log_time: 2,
        create_time: 1,
        name: String::from("myFile"),
        media_type: String::from("application/octet-stream"),
        data: Cow::Borrowed(&[1, 2, 3][..]),
    };

    let mut buf = Vec::new();
    {
        let mut writer = mcap::Writer::new(Cursor::new(&mut buf))?;
        writer.attach(&attachment)?;
        writer.finish()?;
    }

    let summary = mcap::Summary::read(&buf)?.expect("no summary");
    assert_eq!(summary.stats.as_ref().unwrap().attachment_count, 1);
    assert_eq!(summary.attachment_indexes.len(), 1);

    let index = &summary.attachment_indexes[0];
    assert_eq!(index.name, "myFile");
    assert_eq!(index.media_type, "application/octet-stream");
    assert_eq!(index.log_time, 2);
    assert_eq!(index.create_time, 1);
    assert_eq!(index.data_size, 3);

    let read_back = mcap::read::attachment(&buf, index)?;
    assert_eq!(read_back, attachment);

    Ok(())
}
