//! Shared-memory frame channel
//!
//! A named POSIX shared memory region holding a fixed header and three NV12
//! frame slots. The relay is the single producer; a virtual camera driver in
//! another process is the reader.

pub mod layout;
mod producer;
mod reader;
pub mod shm;

pub use layout::{ChannelGeometry, ChannelHeader, ChannelState, SlotHeader, HEADER_SIZE, SLOT_COUNT};
pub use producer::{SharedFrameChannel, DEFAULT_CHANNEL_NAME};
pub use reader::ChannelReader;

/// Whether a channel with this name currently exists
pub fn channel_exists(name: &str) -> bool {
    shm::ShmRegion::exists(name)
}
