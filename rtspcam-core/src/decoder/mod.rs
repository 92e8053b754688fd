//! Decoder adapter
//!
//! Sources run on their own named thread and hand every picture to a
//! [`FrameCallbacks`] implementation through a lock/unlock/display triad.
//! The buffer returned by `lock` is only valid until `display` returns.

pub mod pattern;
pub mod rtsp;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::convert::check_geometry;
use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;
use crate::types::ConnectionEvent;

pub use pattern::TestPatternSource;
pub use rtsp::RtspDecoder;

/// Default stream read timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Output format negotiated with `configure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFormat {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl DecodedFormat {
    /// Packed BGRA at the given size
    pub fn packed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layout: PixelLayout::PackedBgra,
        }
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.layout.stride(self.width)
    }

    /// Bytes per picture
    pub fn buffer_size(&self) -> usize {
        self.layout.buffer_size(self.width, self.height)
    }

    /// Validate a requested output format
    pub fn validate(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        if layout != PixelLayout::PackedBgra {
            return Err(RtspCamError::Unsupported(format!(
                "decoder output must be packed BGRA, not {}",
                layout
            )));
        }
        check_geometry(width, height)?;
        Ok(Self::packed(width, height))
    }
}

/// Receiver of decoded pictures, called on the source thread
pub trait FrameCallbacks: Send + 'static {
    /// Provide a destination buffer of `format.buffer_size()` bytes
    fn lock(&mut self, format: &DecodedFormat) -> &mut [u8];

    /// The buffer from `lock` has been filled
    fn unlock(&mut self) {}

    /// Consume the filled buffer
    fn display(&mut self);

    /// Stream connected or disconnected
    fn connection_changed(&mut self, _event: &ConnectionEvent) {}
}

/// A source of decoded pictures
pub trait FrameSource: Send {
    /// Set the output format; must be called before `start`
    fn configure(&mut self, width: u32, height: u32, layout: PixelLayout) -> Result<()>;

    /// Spawn the source thread, delivering pictures to `callbacks`
    fn start(&mut self, callbacks: Box<dyn FrameCallbacks>) -> Result<()>;

    /// Stop the source thread and wait for it; idempotent
    fn stop(&mut self);

    /// Whether the source thread is alive
    fn is_running(&self) -> bool;

    /// Subscribe to connection events
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Pictures delivered since the source was created
    fn frames_delivered(&self) -> u64;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// RTSP lower transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    /// Interleaved over the RTSP TCP connection
    #[default]
    Tcp,
    /// Separate RTP/UDP ports
    Udp,
}

impl RtspTransport {
    /// Value of FFmpeg's `rtsp_transport` option
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl std::fmt::Display for RtspTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RtspTransport {
    type Err = RtspCamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(RtspCamError::config(format!(
                "Unknown RTSP transport '{}'. Valid options: tcp, udp",
                s
            ))),
        }
    }
}

static RUNTIME_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time FFmpeg setup; later calls are no-ops
pub fn init_runtime() -> Result<()> {
    if RUNTIME_INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        trace!("FFmpeg runtime already initialized");
        return Ok(());
    }

    if let Err(e) = ffmpeg_next::init() {
        RUNTIME_INITIALIZED.store(false, Ordering::Release);
        return Err(RtspCamError::decoder(format!("FFmpeg init failed: {}", e)));
    }
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);

    info!("FFmpeg runtime initialized");
    Ok(())
}

/// Whether `init_runtime` has run
pub fn runtime_initialized() -> bool {
    RUNTIME_INITIALIZED.load(Ordering::Acquire)
}

/// libavformat version as `major.minor.micro`
pub fn ffmpeg_version() -> String {
    let v = ffmpeg_next::format::version();
    format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}

/// Camera codecs and whether this FFmpeg build can decode them
///
/// Call after [`init_runtime`].
pub fn decoder_support() -> Vec<(&'static str, bool)> {
    use ffmpeg_next::codec::Id;

    [("H.264", Id::H264), ("HEVC", Id::HEVC), ("MJPEG", Id::MJPEG)]
        .into_iter()
        .map(|(name, id)| (name, ffmpeg_next::decoder::find(id).is_some()))
        .collect()
}

/// Notify the callbacks and any subscribers of a connection change
pub(crate) fn announce(
    callbacks: &mut dyn FrameCallbacks,
    events: &broadcast::Sender<ConnectionEvent>,
    event: ConnectionEvent,
) {
    debug!("Source {}", event);
    callbacks.connection_changed(&event);
    // No subscribers is fine
    let _ = events.send(event);
}
