//! Frame channel wire layout
//!
//! The region starts with a 128-byte header followed by three frame slots:
//!
//! ```text
//! offset  size  field
//!      0     4  write index
//!      4     4  read index (mirrors write index once a frame is published)
//!      8     4  state (ChannelState)
//!     12    12  slot byte offsets, 3 x u32
//!     24     4  format fourcc (NV12)
//!     28     4  width
//!     32     4  height
//!     36     8  frame interval in 100 ns ticks
//! ```
//!
//! Each slot is a 32-byte [`SlotHeader`] (timestamp at 0, sequence at 8,
//! payload length at 16, write generation at 24) followed by the NV12
//! payload, padded to a multiple of 32 bytes. Multi-byte fields use native
//! byte order.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

use crate::convert::check_geometry;
use crate::error::{Result, RtspCamError};
use crate::formats::{fourcc, PixelLayout};
use crate::types::frame_interval_ticks;

/// Header size including alignment padding
pub const HEADER_SIZE: usize = 128;
/// Per-slot header size
pub const SLOT_HEADER_SIZE: usize = 32;
/// Number of ring slots
pub const SLOT_COUNT: usize = 3;
/// Slot alignment
pub const SLOT_ALIGN: usize = 32;

/// Byte offsets of the header fields
pub mod offsets {
    pub const WRITE_INDEX: usize = 0;
    pub const READ_INDEX: usize = 4;
    pub const STATE: usize = 8;
    pub const SLOT_OFFSETS: usize = 12;
    pub const FORMAT: usize = 24;
    pub const WIDTH: usize = 28;
    pub const HEIGHT: usize = 32;
    pub const FRAME_INTERVAL: usize = 36;
    /// Slot header fields, relative to the slot start
    pub const SLOT_TIMESTAMP: usize = 0;
    pub const SLOT_SEQUENCE: usize = 8;
    pub const SLOT_PAYLOAD_LEN: usize = 16;
    pub const SLOT_GENERATION: usize = 24;
}

/// Round `value` up to a multiple of `align` (a power of two)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Channel lifecycle state as stored in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum ChannelState {
    /// No producer has initialized the region
    #[default]
    Invalid = 0,
    /// Header written, no frame published yet
    Starting = 1,
    /// At least one frame published
    Ready = 2,
    /// Producer is tearing the region down
    Stopping = 3,
}

impl ChannelState {
    /// Decode a raw header value, unknown values map to `Invalid`
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Stopping,
            _ => Self::Invalid,
        }
    }

    /// Raw header value
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Header of a single ring slot
///
/// `generation` is 0 while the slot is being written and is set last, so a
/// reader can compare it before and after copying the payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SlotHeader {
    /// Capture timestamp in 100 ns ticks
    pub timestamp: i64,
    /// Relay sequence number of the frame
    pub sequence: u64,
    /// Payload length in bytes
    pub payload_len: u32,
    pub reserved: u32,
    /// Slot write generation, 0 while in progress
    pub generation: u64,
}

/// Geometry and sizes computed once at channel start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Ticks per frame
    pub frame_interval: i64,
    /// NV12 payload size per frame
    pub payload_size: usize,
    /// Slot header + payload, aligned
    pub slot_size: usize,
    /// Whole region size
    pub total_size: usize,
    /// Byte offset of each slot from the region start
    pub slot_offsets: [u32; SLOT_COUNT],
}

impl ChannelGeometry {
    /// Compute the layout for a session
    pub fn new(width: u32, height: u32, fps: u32) -> Result<Self> {
        check_geometry(width, height)?;
        if fps == 0 {
            return Err(RtspCamError::config("Framerate cannot be zero"));
        }

        let payload_size = PixelLayout::Nv12.buffer_size(width, height);
        let slot_size = align_up(SLOT_HEADER_SIZE + payload_size, SLOT_ALIGN);
        let total_size = HEADER_SIZE + SLOT_COUNT * slot_size;

        if total_size > u32::MAX as usize {
            return Err(RtspCamError::invalid_geometry(format!(
                "{}x{} does not fit 32-bit slot offsets",
                width, height
            )));
        }

        let mut slot_offsets = [0u32; SLOT_COUNT];
        for (i, offset) in slot_offsets.iter_mut().enumerate() {
            *offset = (HEADER_SIZE + i * slot_size) as u32;
        }

        Ok(Self {
            width,
            height,
            fps,
            frame_interval: frame_interval_ticks(fps),
            payload_size,
            slot_size,
            total_size,
            slot_offsets,
        })
    }

    /// Initial header for this geometry
    pub fn initial_header(&self) -> ChannelHeader {
        ChannelHeader {
            write_index: 0,
            read_index: 0,
            state: ChannelState::Starting,
            slot_offsets: self.slot_offsets,
            format: fourcc::NV12,
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
        }
    }
}

/// Decoded copy of the channel header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelHeader {
    pub write_index: u32,
    pub read_index: u32,
    pub state: ChannelState,
    pub slot_offsets: [u32; SLOT_COUNT],
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub frame_interval: i64,
}

fn put<T: Pod>(buf: &mut [u8], offset: usize, value: T) {
    let bytes = bytemuck::bytes_of(&value);
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn get<T: Pod>(buf: &[u8], offset: usize) -> T {
    bytemuck::pod_read_unaligned(&buf[offset..offset + std::mem::size_of::<T>()])
}

impl ChannelHeader {
    /// Serialize into the 128-byte wire header
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        put(&mut buf, offsets::WRITE_INDEX, self.write_index);
        put(&mut buf, offsets::READ_INDEX, self.read_index);
        put(&mut buf, offsets::STATE, self.state.as_raw());
        for (i, offset) in self.slot_offsets.iter().enumerate() {
            put(&mut buf, offsets::SLOT_OFFSETS + i * 4, *offset);
        }
        put(&mut buf, offsets::FORMAT, self.format);
        put(&mut buf, offsets::WIDTH, self.width);
        put(&mut buf, offsets::HEIGHT, self.height);
        put(&mut buf, offsets::FRAME_INTERVAL, self.frame_interval);
        buf
    }

    /// Parse a wire header
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(RtspCamError::channel(format!(
                "header needs {} bytes, region has {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let mut slot_offsets = [0u32; SLOT_COUNT];
        for (i, offset) in slot_offsets.iter_mut().enumerate() {
            *offset = get(buf, offsets::SLOT_OFFSETS + i * 4);
        }

        Ok(Self {
            write_index: get(buf, offsets::WRITE_INDEX),
            read_index: get(buf, offsets::READ_INDEX),
            state: ChannelState::from_raw(get(buf, offsets::STATE)),
            slot_offsets,
            format: get(buf, offsets::FORMAT),
            width: get(buf, offsets::WIDTH),
            height: get(buf, offsets::HEIGHT),
            frame_interval: get(buf, offsets::FRAME_INTERVAL),
        })
    }

    /// Slot holding the most recently published frame, if any
    pub fn latest_slot(&self) -> Option<usize> {
        if self.write_index == 0 {
            return None;
        }
        Some((self.write_index.wrapping_sub(1) as usize) % SLOT_COUNT)
    }

    /// NV12 payload size implied by the geometry fields
    pub fn payload_size(&self) -> usize {
        PixelLayout::Nv12.buffer_size(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_header_layout() {
        assert_eq!(std::mem::size_of::<SlotHeader>(), SLOT_HEADER_SIZE);

        let header = SlotHeader {
            timestamp: 42,
            sequence: 7,
            payload_len: 6,
            reserved: 0,
            generation: 3,
        };
        let bytes = bytemuck::bytes_of(&header);
        assert_eq!(&bytes[offsets::SLOT_TIMESTAMP..8], &42i64.to_ne_bytes());
        assert_eq!(&bytes[offsets::SLOT_SEQUENCE..16], &7u64.to_ne_bytes());
        assert_eq!(&bytes[offsets::SLOT_PAYLOAD_LEN..20], &6u32.to_ne_bytes());
        assert_eq!(&bytes[offsets::SLOT_GENERATION..32], &3u64.to_ne_bytes());

        // Generation is the trailing word, published separately from the rest
        assert_eq!(
            std::mem::offset_of!(SlotHeader, generation),
            offsets::SLOT_GENERATION
        );
        assert_eq!(offsets::SLOT_GENERATION + 8, SLOT_HEADER_SIZE);
    }

    #[test]
    fn test_geometry_720p() {
        let g = ChannelGeometry::new(1280, 720, 30).unwrap();
        assert_eq!(g.payload_size, 1_382_400);
        assert_eq!(g.slot_size, 1_382_432);
        assert_eq!(g.total_size, 128 + 3 * 1_382_432);
        assert_eq!(g.slot_offsets, [128, 128 + 1_382_432, 128 + 2 * 1_382_432]);
        assert_eq!(g.frame_interval, 333_333);
    }

    #[test]
    fn test_slot_size_aligned() {
        // 6x2 NV12 = 18 bytes, + 32 header = 50 -> 64
        let g = ChannelGeometry::new(6, 2, 30).unwrap();
        assert_eq!(g.slot_size, 64);
        assert_eq!(g.slot_size % SLOT_ALIGN, 0);
    }

    #[test]
    fn test_header_field_offsets() {
        let header = ChannelGeometry::new(1280, 720, 30).unwrap().initial_header();
        let buf = header.encode();
        assert_eq!(&buf[28..32], &1280u32.to_ne_bytes());
        assert_eq!(&buf[32..36], &720u32.to_ne_bytes());
        assert_eq!(&buf[36..44], &333_333i64.to_ne_bytes());
        assert_eq!(&buf[24..28], &fourcc::NV12.to_ne_bytes());
        assert_eq!(ChannelHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_latest_slot_wraps() {
        let mut header = ChannelGeometry::new(2, 2, 30).unwrap().initial_header();
        assert_eq!(header.latest_slot(), None);
        header.write_index = 1;
        assert_eq!(header.latest_slot(), Some(0));
        header.write_index = 4;
        assert_eq!(header.latest_slot(), Some(0));
        header.write_index = 6;
        assert_eq!(header.latest_slot(), Some(2));
    }

    #[test]
    fn test_rejects_zero_fps_and_odd_size() {
        assert!(ChannelGeometry::new(1280, 720, 0).is_err());
        assert!(ChannelGeometry::new(1279, 720, 30).is_err());
    }
}
