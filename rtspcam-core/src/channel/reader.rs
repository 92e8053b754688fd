//! Consumer side of the frame channel
//!
//! Used by `rtspcam probe` and by tests. The virtual camera driver implements
//! the same protocol independently.

use std::sync::atomic::{fence, Ordering};

use tracing::{debug, trace, warn};

use super::layout::{
    offsets, ChannelHeader, ChannelState, SlotHeader, HEADER_SIZE, SLOT_HEADER_SIZE,
};
use super::shm::ShmRegion;
use crate::error::{Result, RtspCamError};
use crate::formats::{fourcc, PixelLayout};
use crate::types::Frame;

/// Read-only view of a frame channel
pub struct ChannelReader {
    region: ShmRegion,
    last_write_index: Option<u32>,
}

impl ChannelReader {
    /// Map an existing channel
    pub fn open(name: &str) -> Result<Self> {
        let region = ShmRegion::open_read_only(name)?;
        if region.len() < HEADER_SIZE {
            return Err(RtspCamError::channel(format!(
                "frame channel '{}' is {} bytes, smaller than its header",
                name,
                region.len()
            )));
        }
        debug!(name, len = region.len(), "Opened frame channel reader");
        Ok(Self {
            region,
            last_write_index: None,
        })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Mapped size in bytes
    pub fn region_size(&self) -> usize {
        self.region.len()
    }

    /// Snapshot of the header
    pub fn header(&self) -> Result<ChannelHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.region.read_into(0, &mut buf)?;
        let mut header = ChannelHeader::decode(&buf)?;

        // Index and state fields are written atomically by the producer
        header.write_index = self.region.load_u32(offsets::WRITE_INDEX, Ordering::Acquire)?;
        header.read_index = self.region.load_u32(offsets::READ_INDEX, Ordering::Acquire)?;
        header.state =
            ChannelState::from_raw(self.region.load_u32(offsets::STATE, Ordering::Acquire)?);
        Ok(header)
    }

    /// Current producer state
    pub fn state(&self) -> Result<ChannelState> {
        Ok(ChannelState::from_raw(
            self.region.load_u32(offsets::STATE, Ordering::Acquire)?,
        ))
    }

    /// Whether a frame newer than the last one read is available
    pub fn has_new_frame(&self) -> Result<bool> {
        let header = self.header()?;
        Ok(header.state == ChannelState::Ready
            && Some(header.write_index) != self.last_write_index)
    }

    /// Copy out the most recently published frame
    ///
    /// Returns `None` when nothing new has been published since the last
    /// call or the slot is being overwritten on both attempts.
    pub fn read_latest(&mut self) -> Result<Option<Frame>> {
        let header = self.header()?;
        if header.state != ChannelState::Ready {
            trace!(state = %header.state, "Channel not ready");
            return Ok(None);
        }
        if header.format != fourcc::NV12 {
            return Err(RtspCamError::channel(format!(
                "unexpected channel format 0x{:08x}",
                header.format
            )));
        }
        if self.last_write_index == Some(header.write_index) {
            trace!(write_index = header.write_index, "No new frame");
            return Ok(None);
        }
        let Some(slot) = header.latest_slot() else {
            return Ok(None);
        };

        let slot_offset = header.slot_offsets[slot] as usize;
        let payload_size = header.payload_size();
        let generation_offset = slot_offset + offsets::SLOT_GENERATION;
        let mut frame = Frame::new(header.width, header.height, PixelLayout::Nv12);

        for attempt in 0..2 {
            let before = self.region.load_u64(generation_offset, Ordering::Acquire)?;
            if before == 0 {
                debug!(slot, attempt = attempt + 1, "Slot is being written");
                continue;
            }

            let mut raw = [0u8; SLOT_HEADER_SIZE];
            self.region.read_into(slot_offset, &mut raw)?;
            self.region
                .read_into(slot_offset + SLOT_HEADER_SIZE, &mut frame.data)?;

            fence(Ordering::Acquire);
            let after = self.region.load_u64(generation_offset, Ordering::Relaxed)?;

            if before != after {
                debug!(
                    slot,
                    attempt = attempt + 1,
                    before,
                    after,
                    "Slot overwritten during copy"
                );
                continue;
            }

            let slot_header: SlotHeader = bytemuck::pod_read_unaligned(&raw);
            if slot_header.payload_len as usize != payload_size {
                return Err(RtspCamError::channel(format!(
                    "slot payload is {} bytes, header geometry implies {}",
                    slot_header.payload_len, payload_size
                )));
            }

            frame.sequence = slot_header.sequence;
            frame.timestamp = slot_header.timestamp;
            self.last_write_index = Some(header.write_index);
            return Ok(Some(frame));
        }

        warn!(name = self.name(), "Failed slot consistency checks, no frame returned");
        Ok(None)
    }
}
