//! rtspcam Core Library
//!
//! Relays a live RTSP camera stream into a shared-memory virtual webcam.
//!
//! This library provides:
//! - RTSP demux/decode to packed BGRA via FFmpeg
//! - Flip, brightness/contrast and BGRA to NV12 conversion
//! - A triple-buffered POSIX shared memory frame channel for a virtual camera driver
//! - A throttled, independently adjusted preview path
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────────┐
//! │ RTSP Decoder    │───▶│ Frame Relay      │───▶│ Shared Frame Channel│
//! │ (FFmpeg, BGRA)  │    │ (adjust + NV12)  │    │ (shm, 3 NV12 slots) │
//! └─────────────────┘    └────────┬─────────┘    └─────────────────────┘
//!                                 │
//!                                 ▼
//!                         Preview sink (every Nth frame)
//! ```

pub mod channel;
pub mod config;
pub mod convert;
pub mod decoder;
pub mod error;
pub mod formats;
pub mod performance;
pub mod relay;
pub mod session;
pub mod types;

pub use channel::{ChannelReader, SharedFrameChannel, DEFAULT_CHANNEL_NAME};
pub use config::{ConfigFile, Preset, RelayConfig};
pub use convert::ImageAdjustments;
pub use decoder::{FrameCallbacks, FrameSource, RtspDecoder, RtspTransport, TestPatternSource};
pub use error::{Result, RtspCamError};
pub use relay::{FrameRelay, PreviewFrame, PreviewSink, RelayHandle};
pub use session::{RelaySession, SessionState, SessionStats};
pub use types::{ConnectionEvent, Frame, Handle, StreamSource};
