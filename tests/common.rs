use std::collections::BTreeMap;
use std::io::Cursor;

use mcap::{records::MessageHeader, WriteOptions, Writer};

/// Writes a small, self-contained MCAP with one schema, two channels, and twenty messages
/// spread `10` nanoseconds apart across several chunks, using `opts`. Odd-sequence messages
/// land on `/beta`, even ones on `/alpha`.
pub fn sample_mcap(opts: WriteOptions) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut writer: Writer<_> = opts.create(Cursor::new(&mut buf)).unwrap();
        write_sample_messages(&mut writer);
        writer.finish().unwrap();
    }
    buf
}

/// Like [`sample_mcap`], but with the default [`WriteOptions`].
pub fn default_sample_mcap() -> Vec<u8> {
    sample_mcap(WriteOptions::new())
}

fn write_sample_messages<W: std::io::Write + std::io::Seek>(writer: &mut Writer<W>) {
    let schema_id = writer
        .add_schema("example_msgs/msg/Sample", "ros2msg", b"float64 x\n")
        .unwrap();
    let channel_a = writer
        .add_channel(schema_id, "/alpha", "cdr", &BTreeMap::new())
        .unwrap();
    let channel_b = writer
        .add_channel(schema_id, "/beta", "cdr", &BTreeMap::new())
        .unwrap();

    for i in 0..20u64 {
        let channel_id = if i % 2 == 0 { channel_a } else { channel_b };
        writer
            .write_to_known_channel(
                &MessageHeader {
                    channel_id,
                    sequence: i as u32,
                    log_time: i * 10,
                    publish_time: i * 10,
                },
                &[i as u8],
            )
            .unwrap();
    }
}
