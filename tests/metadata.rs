mod common;

use std::io::Cursor;

use anyhow::Result;

/// Writes a single metadata record, then reads it back through the summary's metadata index.
#[test]
fn round_trip() -> Result<()> {
    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert("foo".to_string(), "bar".to_string());
    let record = mcap::records::Metadata {
        name: String::from("myMetadata"),
        metadata,
    };

    let mut buf = Vec::new();
    {
        let mut writer = mcap::Writer::new(Cursor::new(&mut buf))?;
        writer.write_metadata(&record)?;
        writer.finish()?;
    }

    let summary = mcap::Summary::read(&buf)?.expect("no summary");
    assert_eq!(summary.stats.as_ref().unwrap().metadata_count, 1);
    assert_eq!(summary.metadata_indexes.len(), 1);
    assert_eq!(summary.metadata_indexes[0].name, "myMetadata");

    let read_back = mcap::read::metadata(&buf, &summary.metadata_indexes[0])?;
    assert_eq!(read_back, record);

    Ok(())
}
