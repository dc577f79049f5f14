mod common;

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::Result;

/// Writes a single message on a single schema'd channel, then reads it straight back.
#[test]
fn smoke() -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut writer = mcap::Writer::new(Cursor::new(&mut buf))?;
        let schema_id = writer.add_schema("Example", "c", &[4, 5, 6])?;
        let mut metadata = BTreeMap::new();
        metadata.insert("foo".to_string(), "bar".to_string());
        let channel_id = writer.add_channel(schema_id, "example", "a", &metadata)?;
        writer.write_to_known_channel(
            &mcap::records::MessageHeader {
                channel_id,
                sequence: 10,
                log_time: 2,
                publish_time: 1,
            },
            &[1, 2, 3],
        )?;
        writer.finish()?;
    }

    let messages = mcap::MessageStream::new(&buf)?.collect::<mcap::McapResult<Vec<_>>>()?;
    assert_eq!(messages.len(), 1);

    let message = &messages[0];
    assert_eq!(message.sequence, 10);
    assert_eq!(message.log_time, 2);
    assert_eq!(message.publish_time, 1);
    assert_eq!(&*message.data, &[1, 2, 3]);
    assert_eq!(message.channel.topic, "example");
    assert_eq!(message.channel.message_encoding, "a");
    let schema = message.channel.schema.as_ref().unwrap();
    assert_eq!(schema.name, "Example");
    assert_eq!(schema.encoding, "c");
    assert_eq!(&*schema.data, &[4, 5, 6]);

    Ok(())
}

/// Round-trips the sample fixture through a writer and checks that the summary and the
/// message stream both survive unchanged.
#[test]
fn round_trip() -> Result<()> {
    let original = common::default_sample_mcap();
    let messages = mcap::MessageStream::new(&original)?.collect::<mcap::McapResult<Vec<_>>>()?;

    let mut buf = Vec::new();
    {
        let mut writer = mcap::Writer::new(Cursor::new(&mut buf))?;
        for message in &messages {
            writer.write(message)?;
        }
        writer.finish()?;
    }

    let summary = mcap::Summary::read(&buf)?.unwrap();
    assert_eq!(summary.stats.as_ref().unwrap().message_count, 20);
    assert_eq!(summary.channels.len(), 2);
    assert_eq!(summary.schemas.len(), 1);
    assert!(summary.attachment_indexes.is_empty());
    assert!(summary.metadata_indexes.is_empty());

    let round_tripped =
        mcap::MessageStream::new(&buf)?.collect::<mcap::McapResult<Vec<_>>>()?;
    assert_eq!(round_tripped, messages);

    Ok(())
}
