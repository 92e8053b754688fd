//! Integration tests for the shared memory frame channel
//!
//! These create real POSIX shared memory regions under unique names.

mod mocks;

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use mocks::unique_channel_name;
use rtspcam_core::channel::layout::offsets::SLOT_GENERATION;
use rtspcam_core::channel::{
    channel_exists, ChannelReader, ChannelState, SharedFrameChannel, HEADER_SIZE, SLOT_COUNT,
};
use rtspcam_core::error::RtspCamError;
use rtspcam_core::formats::{fourcc, PixelLayout};
use rtspcam_core::types::Frame;

fn nv12_frame(width: u32, height: u32, fill: u8, sequence: u64) -> Frame {
    let mut frame = Frame::new(width, height, PixelLayout::Nv12);
    frame.data.fill(fill);
    frame.sequence = sequence;
    frame.timestamp = sequence as i64 * 333_333;
    frame
}

#[test]
fn test_second_producer_is_rejected_until_stop() {
    let name = unique_channel_name("exclusive");
    let mut first = SharedFrameChannel::new(name.clone());
    let mut second = SharedFrameChannel::new(name.clone());

    first.start(64, 32, 30).unwrap();

    let err = second.start(64, 32, 30).unwrap_err();
    assert!(err.is_channel_in_use(), "unexpected error: {}", err);
    assert!(matches!(err, RtspCamError::ChannelInUse { .. }));
    assert!(!second.is_started());

    first.stop();
    assert!(!channel_exists(&name));

    second.start(64, 32, 30).unwrap();
    assert!(second.is_started());
    second.stop();
}

#[test]
fn test_start_twice_on_same_channel_fails() {
    let mut channel = SharedFrameChannel::new(unique_channel_name("twice"));
    channel.start(16, 16, 30).unwrap();
    assert!(matches!(
        channel.start(16, 16, 30),
        Err(RtspCamError::SessionAlreadyRunning)
    ));
}

#[test]
fn test_geometry_reads_back_from_header() {
    let name = unique_channel_name("geometry");
    let mut channel = SharedFrameChannel::new(name.clone());
    let geometry = channel.start(1280, 720, 30).unwrap();

    let reader = ChannelReader::open(&name).unwrap();
    let header = reader.header().unwrap();

    assert_eq!(header.width, 1280);
    assert_eq!(header.height, 720);
    assert_eq!(header.frame_interval, 10_000_000 / 30);
    assert_eq!(header.frame_interval, 333_333);
    assert_eq!(header.format, fourcc::NV12);
    assert_eq!(header.state, ChannelState::Starting);
    assert_eq!(header.write_index, 0);
    assert_eq!(header.latest_slot(), None);

    for i in 0..SLOT_COUNT {
        assert_eq!(
            header.slot_offsets[i] as usize,
            HEADER_SIZE + i * geometry.slot_size
        );
    }
    assert_eq!(reader.region_size(), geometry.total_size);
}

#[test]
fn test_write_index_increments_by_one() {
    let name = unique_channel_name("monotonic");
    let mut channel = SharedFrameChannel::new(name.clone());
    channel.start(32, 16, 30).unwrap();
    let reader = ChannelReader::open(&name).unwrap();

    for i in 1..=10u32 {
        channel.publish(&nv12_frame(32, 16, i as u8, i as u64)).unwrap();

        let header = reader.header().unwrap();
        assert_eq!(header.write_index, i);
        assert_eq!(header.read_index, i);
        assert_eq!(header.latest_slot(), Some((i as usize - 1) % SLOT_COUNT));
        assert_eq!(channel.write_index(), i);
    }

    assert_eq!(reader.state().unwrap(), ChannelState::Ready);
}

#[test]
fn test_reader_sees_latest_frame() {
    let name = unique_channel_name("latest");
    let mut channel = SharedFrameChannel::new(name.clone());
    channel.start(8, 4, 30).unwrap();
    let mut reader = ChannelReader::open(&name).unwrap();

    // Nothing published yet
    assert!(reader.read_latest().unwrap().is_none());
    assert!(!reader.has_new_frame().unwrap());

    for seq in 1..=4u64 {
        channel.publish(&nv12_frame(8, 4, seq as u8 * 10, seq)).unwrap();
    }

    assert!(reader.has_new_frame().unwrap());
    let frame = reader.read_latest().unwrap().unwrap();
    assert_eq!(frame.dimensions(), (8, 4));
    assert_eq!(frame.layout, PixelLayout::Nv12);
    assert_eq!(frame.sequence, 4);
    assert_eq!(frame.timestamp, 4 * 333_333);
    assert!(frame.data.iter().all(|&b| b == 40));

    // Already consumed
    assert!(reader.read_latest().unwrap().is_none());

    channel.publish(&nv12_frame(8, 4, 99, 5)).unwrap();
    let frame = reader.read_latest().unwrap().unwrap();
    assert_eq!(frame.sequence, 5);
    assert_eq!(frame.data[0], 99);
}

#[test]
fn test_publish_before_start_is_ignored() {
    let mut channel = SharedFrameChannel::new(unique_channel_name("unstarted"));
    channel.publish(&nv12_frame(8, 4, 0, 1)).unwrap();
    assert_eq!(channel.write_index(), 0);
    assert!(!channel.is_started());
}

#[test]
fn test_publish_rejects_wrong_frames() {
    let mut channel = SharedFrameChannel::new(unique_channel_name("reject"));
    channel.start(8, 4, 30).unwrap();

    let err = channel.publish(&nv12_frame(16, 4, 0, 1)).unwrap_err();
    assert!(matches!(err, RtspCamError::GeometryMismatch { .. }));

    let packed = Frame::new(8, 4, PixelLayout::PackedBgra);
    assert!(channel.publish(&packed).is_err());

    let mut short = nv12_frame(8, 4, 0, 1);
    short.data.truncate(10);
    assert!(channel.publish(&short).is_err());

    assert_eq!(channel.write_index(), 0);
}

#[test]
fn test_invalid_geometry_is_rejected_at_start() {
    let name = unique_channel_name("invalid");
    let mut channel = SharedFrameChannel::new(name.clone());
    assert!(channel.start(7, 4, 30).is_err());
    assert!(channel.start(8, 4, 0).is_err());
    assert!(!channel_exists(&name));
}

#[test]
fn test_stop_is_visible_to_reader_and_idempotent() {
    let name = unique_channel_name("stop");
    let mut channel = SharedFrameChannel::new(name.clone());
    channel.start(8, 4, 30).unwrap();
    channel.publish(&nv12_frame(8, 4, 1, 1)).unwrap();

    let reader = ChannelReader::open(&name).unwrap();
    channel.stop();
    channel.stop();

    assert_eq!(channel.state(), ChannelState::Stopping);
    assert_eq!(reader.state().unwrap(), ChannelState::Stopping);
    assert!(!channel_exists(&name));
}

#[test]
fn test_drop_releases_name() {
    let name = unique_channel_name("drop");
    {
        let mut channel = SharedFrameChannel::new(name.clone());
        channel.start(8, 4, 30).unwrap();
        assert!(channel_exists(&name));
    }
    assert!(!channel_exists(&name));
}

/// Backing file of a POSIX shared memory object on Linux
fn shm_path(name: &str) -> PathBuf {
    Path::new("/dev/shm").join(name)
}

#[test]
fn test_remove_stale_missing_and_unsized() {
    let name = unique_channel_name("stale");
    assert!(!SharedFrameChannel::remove_stale(&name, false).unwrap());

    // A region created but never sized has no readable header
    std::fs::write(shm_path(&name), b"").unwrap();
    assert!(channel_exists(&name));
    assert!(SharedFrameChannel::remove_stale(&name, false).unwrap());
    assert!(!channel_exists(&name));
}

#[test]
fn test_remove_stale_refuses_live_channel() {
    let name = unique_channel_name("live");
    let mut channel = SharedFrameChannel::new(name.clone());
    channel.start(8, 4, 30).unwrap();

    let err = SharedFrameChannel::remove_stale(&name, false).unwrap_err();
    assert!(err.is_channel_in_use());

    channel.publish(&nv12_frame(8, 4, 16, 1)).unwrap();
    assert!(SharedFrameChannel::remove_stale(&name, false).is_err());
    assert!(channel_exists(&name));
}

#[test]
fn test_forced_removal_keeps_successor_exclusive() {
    let name = unique_channel_name("takeover");
    let mut first = SharedFrameChannel::new(name.clone());
    first.start(8, 4, 30).unwrap();

    assert!(SharedFrameChannel::remove_stale(&name, true).unwrap());
    assert!(!channel_exists(&name));

    let mut second = SharedFrameChannel::new(name.clone());
    second.start(8, 4, 30).unwrap();

    // Stopping the old producer must not unlink the successor's region
    first.stop();
    assert!(second.is_started());
    assert!(channel_exists(&name));

    let mut third = SharedFrameChannel::new(name.clone());
    assert!(third.start(8, 4, 30).unwrap_err().is_channel_in_use());

    second.publish(&nv12_frame(8, 4, 200, 1)).unwrap();
    let mut reader = ChannelReader::open(&name).unwrap();
    assert_eq!(reader.read_latest().unwrap().unwrap().data[0], 200);

    second.stop();
    assert!(!channel_exists(&name));
}

#[test]
fn test_reader_skips_slot_being_written() {
    let name = unique_channel_name("inflight");
    let mut channel = SharedFrameChannel::new(name.clone());
    channel.start(8, 4, 30).unwrap();
    channel.publish(&nv12_frame(8, 4, 50, 1)).unwrap();

    let mut reader = ChannelReader::open(&name).unwrap();
    let slot_offset = reader.header().unwrap().slot_offsets[0] as u64;

    // Generation 0 is what the producer leaves while a slot is mid-write
    let file = OpenOptions::new().write(true).open(shm_path(&name)).unwrap();
    file.write_all_at(&0u64.to_ne_bytes(), slot_offset + SLOT_GENERATION as u64)
        .unwrap();

    assert!(reader.read_latest().unwrap().is_none());

    // The next completed slot is readable again
    channel.publish(&nv12_frame(8, 4, 60, 2)).unwrap();
    let frame = reader.read_latest().unwrap().unwrap();
    assert_eq!(frame.sequence, 2);
    assert!(frame.data.iter().all(|&b| b == 60));
}

#[test]
fn test_concurrent_reads_are_never_torn() {
    const FRAMES: u64 = 3000;
    let (width, height) = (320, 240);
    let name = unique_channel_name("torn");

    let mut channel = SharedFrameChannel::new(name.clone());
    channel.start(width, height, 30).unwrap();
    let mut reader = ChannelReader::open(&name).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let producer_done = done.clone();
    let producer = thread::spawn(move || {
        for sequence in 1..=FRAMES {
            let fill = (sequence % 251) as u8;
            channel
                .publish(&nv12_frame(width, height, fill, sequence))
                .unwrap();
        }
        producer_done.store(true, Ordering::Release);
        channel
    });

    let mut reads = 0;
    let mut last_sequence = 0;
    while !done.load(Ordering::Acquire) {
        if let Some(frame) = reader.read_latest().unwrap() {
            let fill = (frame.sequence % 251) as u8;
            assert!(
                frame.data.iter().all(|&b| b == fill),
                "frame {} mixes payloads",
                frame.sequence
            );
            assert_eq!(frame.timestamp, frame.sequence as i64 * 333_333);
            assert!(frame.sequence >= last_sequence);
            last_sequence = frame.sequence;
            reads += 1;
        }
    }

    let channel = producer.join().unwrap();
    assert_eq!(channel.write_index(), FRAMES as u32);
    assert!(reads > 0);
}

#[test]
fn test_reader_open_missing_channel_fails() {
    assert!(ChannelReader::open(&unique_channel_name("missing")).is_err());
}
