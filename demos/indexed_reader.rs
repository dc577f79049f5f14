#[path = "common/logsetup.rs"]
mod logsetup;

use std::{fs, process};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::*;
use mcap::{MessageIterator, MessageIteratorOptions, ReconstructionMode, TopicFilter};
use memmap2::Mmap;

#[derive(Parser, Debug)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[clap(short, long, parse(from_occurrences))]
    verbose: u8,

    #[clap(short, long, arg_enum, default_value = "auto")]
    color: logsetup::Color,

    /// Only print messages on topics matching this glob (`*`/`?`); defaults to all topics.
    #[clap(short, long)]
    topic: Option<String>,

    /// Only print messages with `log_time >= start`.
    #[clap(long)]
    start: Option<u64>,

    /// Only print messages with `log_time <= end`.
    #[clap(long)]
    end: Option<u64>,

    /// Walk the query results oldest-last instead of oldest-first.
    #[clap(long)]
    reverse: bool,

    mcap: Utf8PathBuf,
}

fn map_mcap(p: &Utf8Path) -> Result<Mmap> {
    let fd = fs::File::open(p).context("Couldn't open MCAP file")?;
    unsafe { Mmap::map(&fd) }.context("Couldn't map MCAP file")
}

fn run() -> Result<()> {
    let args = Args::parse();
    logsetup::init_logger(args.verbose, args.color);

    let mapped = map_mcap(&args.mcap)?;

    // Load whatever summary the file already carries; if it's missing or only partially
    // indexed, rebuild it by walking every chunk directly rather than failing outright.
    let built = mcap::build_summary(&mapped, ReconstructionMode::Missing)?;

    let topics = match args.topic {
        Some(t) if t.contains(['*', '?']) => TopicFilter::Glob(t),
        Some(t) => TopicFilter::Topic(t),
        None => TopicFilter::All,
    };
    let mut options = MessageIteratorOptions::new(topics).reverse(args.reverse);
    if let Some(start) = args.start {
        options = options.start_time(start);
    }
    if let Some(end) = args.end {
        options = options.end_time(end);
    }

    let iter = MessageIterator::with_reconstructed(
        &mapped,
        &built.summary,
        built.reconstructed_index.as_ref(),
        options,
    )?;

    let mut count = 0;
    for message in iter {
        let message = message?;
        println!("{} {}", message.log_time, message.channel.topic);
        count += 1;
    }
    info!("printed {count} messages");
    Ok(())
}

fn main() {
    run().unwrap_or_else(|e| {
        error!("{e:?}");
        process::exit(1);
    });
}
