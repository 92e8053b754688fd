//! Producer side of the frame channel

use std::sync::atomic::{fence, Ordering};

use tracing::{debug, info, trace, warn};

use super::layout::{
    offsets, ChannelGeometry, ChannelState, SlotHeader, SLOT_COUNT, SLOT_HEADER_SIZE,
};
use super::reader::ChannelReader;
use super::shm::ShmRegion;
use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;
use crate::types::Frame;

/// Well-known channel name the virtual camera reader looks for
pub const DEFAULT_CHANNEL_NAME: &str = "rtspcam-frames";

/// Triple-buffered NV12 frame channel in named shared memory
///
/// Exactly one producer may own a channel name at a time. The producer
/// writes into slot `write_index % 3` and then advances the index; readers
/// always take the most recently completed slot.
pub struct SharedFrameChannel {
    name: String,
    region: Option<ShmRegion>,
    geometry: Option<ChannelGeometry>,
    write_index: u32,
    generation: u64,
    state: ChannelState,
}

impl SharedFrameChannel {
    /// Create an unstarted channel with the given region name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            geometry: None,
            write_index: 0,
            generation: 0,
            state: ChannelState::Invalid,
        }
    }

    /// Create an unstarted channel under the well-known name
    pub fn with_default_name() -> Self {
        Self::new(DEFAULT_CHANNEL_NAME)
    }

    /// Region name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current producer-side state
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether `start` has succeeded and `stop` has not run since
    pub fn is_started(&self) -> bool {
        self.region.is_some()
    }

    /// Number of frames published this session
    pub fn write_index(&self) -> u32 {
        self.write_index
    }

    /// Session geometry, once started
    pub fn geometry(&self) -> Option<&ChannelGeometry> {
        self.geometry.as_ref()
    }

    /// Create the region and write the header
    ///
    /// Fails with [`RtspCamError::ChannelInUse`] if any region with this
    /// name already exists.
    pub fn start(&mut self, width: u32, height: u32, fps: u32) -> Result<ChannelGeometry> {
        if self.region.is_some() {
            return Err(RtspCamError::SessionAlreadyRunning);
        }

        let geometry = ChannelGeometry::new(width, height, fps)?;
        let mut region = ShmRegion::create_exclusive(&self.name, geometry.total_size)?;

        region.write(0, &geometry.initial_header().encode())?;
        region.store_u32(
            offsets::STATE,
            ChannelState::Starting.as_raw(),
            Ordering::Release,
        )?;

        info!(
            name = %self.name,
            width,
            height,
            fps,
            slot_size = geometry.slot_size,
            total_size = geometry.total_size,
            "Frame channel started"
        );

        self.region = Some(region);
        self.geometry = Some(geometry);
        self.write_index = 0;
        self.generation = 0;
        self.state = ChannelState::Starting;

        Ok(geometry)
    }

    /// Publish one NV12 frame into the next slot
    ///
    /// Does nothing if the channel has not been started. Fails if the frame
    /// does not match the session geometry.
    pub fn publish(&mut self, frame: &Frame) -> Result<()> {
        let (Some(region), Some(geometry)) = (self.region.as_mut(), self.geometry.as_ref()) else {
            trace!("Publish on unstarted channel ignored");
            return Ok(());
        };

        if frame.layout != PixelLayout::Nv12 {
            return Err(RtspCamError::invalid_geometry(format!(
                "frame channel carries NV12, got {}",
                frame.layout
            )));
        }
        if frame.dimensions() != (geometry.width, geometry.height) {
            return Err(RtspCamError::geometry_mismatch(
                (geometry.width, geometry.height),
                frame.dimensions(),
            ));
        }
        if frame.data.len() != geometry.payload_size {
            return Err(RtspCamError::invalid_geometry(format!(
                "NV12 payload is {} bytes, expected {}",
                frame.data.len(),
                geometry.payload_size
            )));
        }

        let slot = self.write_index as usize % SLOT_COUNT;
        let slot_offset = geometry.slot_offsets[slot] as usize;
        let generation_offset = slot_offset + offsets::SLOT_GENERATION;
        let generation = self.generation + 1;

        // Mark the slot as in progress before touching the payload
        region.store_u64(generation_offset, 0, Ordering::Relaxed)?;
        fence(Ordering::Release);

        let header = SlotHeader {
            timestamp: frame.timestamp,
            generation: 0,
            sequence: frame.sequence,
            payload_len: geometry.payload_size as u32,
            reserved: 0,
        };
        // The generation word is only ever touched atomically
        region.write(
            slot_offset,
            &bytemuck::bytes_of(&header)[..offsets::SLOT_GENERATION],
        )?;
        region.write(slot_offset + SLOT_HEADER_SIZE, &frame.data)?;
        region.store_u64(generation_offset, generation, Ordering::Release)?;

        let next = self.write_index.wrapping_add(1);
        region.store_u32(offsets::WRITE_INDEX, next, Ordering::Release)?;
        region.store_u32(offsets::READ_INDEX, next, Ordering::Release)?;

        if self.state != ChannelState::Ready {
            region.store_u32(offsets::STATE, ChannelState::Ready.as_raw(), Ordering::Release)?;
            debug!(name = %self.name, "First frame published, channel ready");
        }

        self.write_index = next;
        self.generation = generation;
        self.state = ChannelState::Ready;

        trace!(slot, sequence = frame.sequence, "Published frame");
        Ok(())
    }

    /// Mark the channel stopping and release the region
    ///
    /// Idempotent. The name is unlinked so a later session can start again.
    pub fn stop(&mut self) {
        let Some(mut region) = self.region.take() else {
            return;
        };

        // Readers watching the state see Stopping before the name disappears
        if let Err(e) = region.store_u32(
            offsets::STATE,
            ChannelState::Stopping.as_raw(),
            Ordering::Release,
        ) {
            warn!(name = %self.name, "Failed to mark channel stopping: {}", e);
        }
        drop(region);

        self.state = ChannelState::Stopping;
        self.geometry = None;

        info!(
            name = %self.name,
            frames = self.write_index,
            "Frame channel stopped"
        );
    }

    /// Remove a region left behind by a crashed producer
    ///
    /// A region whose header says `Starting` or `Ready` may still have a
    /// live producer and is refused with [`RtspCamError::ChannelInUse`]
    /// unless `force` is set. Returns whether a region was removed.
    pub fn remove_stale(name: &str, force: bool) -> Result<bool> {
        if !ShmRegion::exists(name) {
            return Ok(false);
        }

        if !force {
            match ChannelReader::open(name).and_then(|reader| reader.state()) {
                Ok(state @ (ChannelState::Starting | ChannelState::Ready)) => {
                    debug!(name, %state, "Refusing to remove a channel that looks live");
                    return Err(RtspCamError::ChannelInUse {
                        name: name.to_string(),
                    });
                }
                Ok(state) => debug!(name, %state, "Channel is not live"),
                Err(e) => debug!(name, "Channel header unreadable: {}", e),
            }
        }

        let removed = ShmRegion::unlink(name)?;
        if removed {
            info!(name, "Removed stale frame channel");
        }
        Ok(removed)
    }
}

impl Drop for SharedFrameChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SharedFrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFrameChannel")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("write_index", &self.write_index)
            .field("geometry", &self.geometry)
            .finish()
    }
}
