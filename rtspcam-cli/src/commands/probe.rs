//! Probe command - inspect the shared frame channel

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use rtspcam_core::{
    channel::{self, ChannelHeader, ChannelReader, SharedFrameChannel, DEFAULT_CHANNEL_NAME},
    formats,
    types::TICKS_PER_SECOND,
};
use serde::Serialize;

/// Arguments for the probe command
#[derive(Args)]
pub struct ProbeArgs {
    /// Shared memory channel name
    #[arg(short, long, default_value = DEFAULT_CHANNEL_NAME)]
    channel: String,

    /// Print the header as JSON
    #[arg(long)]
    json: bool,

    /// Read this many frames and report their sequence numbers
    #[arg(short, long, default_value = "0")]
    frames: u32,

    /// Remove a channel left behind by a crashed producer
    #[arg(long, conflicts_with_all = ["json", "frames"])]
    reset: bool,

    /// With --reset, remove the channel even if its header says it is live
    #[arg(long, requires = "reset")]
    force: bool,
}

#[derive(Serialize)]
struct ProbeReport {
    channel: String,
    region_size: usize,
    format: String,
    fps: f64,
    #[serde(flatten)]
    header: ChannelHeader,
}

/// Inspect the frame channel
pub async fn probe(args: ProbeArgs) -> Result<()> {
    if args.reset {
        match SharedFrameChannel::remove_stale(&args.channel, args.force) {
            Ok(true) => println!("Removed frame channel '{}'.", args.channel),
            Ok(false) => println!("No frame channel named '{}'.", args.channel),
            Err(e) if e.is_channel_in_use() => bail!(
                "Frame channel '{}' looks live; stop its producer first, or pass --force if it crashed",
                args.channel
            ),
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    if !channel::channel_exists(&args.channel) {
        println!("No frame channel named '{}'.", args.channel);
        println!("Start a relay with: rtspcam start <URL>");
        return Ok(());
    }

    let mut reader = ChannelReader::open(&args.channel)
        .with_context(|| format!("Failed to open frame channel '{}'", args.channel))?;
    let header = reader.header()?;

    let fps = if header.frame_interval > 0 {
        TICKS_PER_SECOND as f64 / header.frame_interval as f64
    } else {
        0.0
    };

    if args.json {
        let report = ProbeReport {
            channel: args.channel.clone(),
            region_size: reader.region_size(),
            format: formats::format_name(header.format).to_string(),
            fps,
            header,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("rtspcam - Frame Channel\n");
    println!("  Name:        {}", reader.name());
    println!("  Size:        {} bytes", reader.region_size());
    println!("  State:       {}", header.state);
    println!("  Format:      {}", formats::format_name(header.format));
    println!("  Resolution:  {}x{}", header.width, header.height);
    println!("  Interval:    {} ticks ({:.2} fps)", header.frame_interval, fps);
    println!("  Write index: {}", header.write_index);
    println!("  Read index:  {}", header.read_index);
    match header.latest_slot() {
        Some(slot) => println!("  Latest slot: {}", slot),
        None => println!("  Latest slot: none (no frame published yet)"),
    }
    println!("  Slot offsets: {:?}", header.slot_offsets);

    if args.frames > 0 {
        println!();
        println!("Reading {} frames...", args.frames);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut read = 0;
        while read < args.frames && Instant::now() < deadline {
            match reader.read_latest()? {
                Some(frame) => {
                    read += 1;
                    println!(
                        "  #{:<8} t={:<14} {} bytes",
                        frame.sequence,
                        frame.timestamp,
                        frame.data.len()
                    );
                }
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }

        if read < args.frames {
            println!("Timed out after {} of {} frames.", read, args.frames);
        }
    }

    Ok(())
}
