//! Frame relay
//!
//! Turns each decoded BGRA picture into a throttled preview emission and an
//! unconditional adjust + convert + publish cycle. Everything runs
//! synchronously on the decoder thread; there is no queue.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::channel::SharedFrameChannel;
use crate::convert::{
    apply_brightness_contrast, apply_flip_into, check_geometry, convert_to_nv12_into,
    ImageAdjustments,
};
use crate::decoder::{DecodedFormat, FrameCallbacks};
use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;
use crate::performance::{RelayMetrics, RelayStats};
use crate::types::{duration_to_ticks, ConnectionEvent, Frame};

/// Frames between progress log lines
pub const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Default preview throttle (every Nth frame)
pub const DEFAULT_PREVIEW_INTERVAL: u32 = 3;

/// Drops/failures between two warnings
const WARN_INTERVAL: u64 = 100;

/// Throttled, already-adjusted packed BGRA frame for on-screen display
#[derive(Debug, Clone, Copy)]
pub struct PreviewFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

/// Receiver of preview frames, called on the decoder thread
pub trait PreviewSink: Send + 'static {
    fn on_preview(&mut self, frame: PreviewFrame<'_>);
}

impl<F> PreviewSink for F
where
    F: FnMut(PreviewFrame<'_>) + Send + 'static,
{
    fn on_preview(&mut self, frame: PreviewFrame<'_>) {
        self(frame)
    }
}

/// Initial relay settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Deliver a preview every Nth frame, 0 disables preview
    pub preview_interval: u32,
    /// Adjustments for the published (virtual camera) path
    pub publish: ImageAdjustments,
    /// Adjustments for the preview path
    pub preview: ImageAdjustments,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            preview_interval: DEFAULT_PREVIEW_INTERVAL,
            publish: ImageAdjustments::NONE,
            preview: ImageAdjustments::NONE,
        }
    }
}

struct RelayShared {
    publish: ArcSwap<ImageAdjustments>,
    preview: ArcSwap<ImageAdjustments>,
    preview_interval: AtomicU32,
    connected: AtomicBool,
    sequence: AtomicU64,
    metrics: RelayMetrics,
    epoch: Instant,
}

/// Cloneable control surface of a relay
///
/// Settings changes take effect on the next frame; each frame reads each
/// adjustment record exactly once.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<RelayShared>,
}

impl RelayHandle {
    /// Create a handle with the given initial settings
    pub fn new(options: RelayOptions) -> Self {
        Self {
            shared: Arc::new(RelayShared {
                publish: ArcSwap::from_pointee(options.publish.clamped()),
                preview: ArcSwap::from_pointee(options.preview.clamped()),
                preview_interval: AtomicU32::new(options.preview_interval),
                connected: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                metrics: RelayMetrics::new(),
                epoch: Instant::now(),
            }),
        }
    }

    /// Replace the publish-path adjustments
    pub fn set_publish_adjustments(&self, adjustments: ImageAdjustments) {
        debug!(?adjustments, "Publish adjustments updated");
        self.shared.publish.store(Arc::new(adjustments.clamped()));
    }

    /// Replace the preview-path adjustments
    pub fn set_preview_adjustments(&self, adjustments: ImageAdjustments) {
        debug!(?adjustments, "Preview adjustments updated");
        self.shared.preview.store(Arc::new(adjustments.clamped()));
    }

    /// Current publish-path adjustments
    pub fn publish_adjustments(&self) -> ImageAdjustments {
        **self.shared.publish.load()
    }

    /// Current preview-path adjustments
    pub fn preview_adjustments(&self) -> ImageAdjustments {
        **self.shared.preview.load()
    }

    /// Change the preview throttle, 0 disables preview
    pub fn set_preview_interval(&self, interval: u32) {
        self.shared.preview_interval.store(interval, Ordering::Relaxed);
    }

    /// Current preview throttle
    pub fn preview_interval(&self) -> u32 {
        self.shared.preview_interval.load(Ordering::Relaxed)
    }

    /// Gate the relay on a connection change
    pub fn on_connection_event(&self, event: &ConnectionEvent) {
        let connected = event.is_connected();
        let was = self.shared.connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            info!("Relay {}", if connected { "active" } else { "paused" });
        }
    }

    /// Whether frames are currently relayed
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Sequence number of the most recent relayed frame (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::Acquire)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RelayStats {
        self.shared.metrics.snapshot()
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("connected", &self.is_connected())
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}

/// Per-frame processing state, separate from the decoder staging buffer
struct RelayCore {
    handle: RelayHandle,
    channel: Arc<Mutex<SharedFrameChannel>>,
    width: u32,
    height: u32,
    work: Vec<u8>,
    preview_work: Vec<u8>,
    frame: Frame,
    preview_sink: Option<Box<dyn PreviewSink>>,
}

/// Flip (or copy) then apply levels
fn adjust_into(
    src: &[u8],
    dst: &mut [u8],
    width: u32,
    height: u32,
    adjustments: &ImageAdjustments,
) -> Result<()> {
    if adjustments.needs_flip() {
        apply_flip_into(
            src,
            dst,
            width,
            height,
            adjustments.flip_horizontal,
            adjustments.flip_vertical,
        )?;
    } else {
        if src.len() != dst.len() {
            return Err(RtspCamError::invalid_geometry(format!(
                "source is {} bytes, work buffer is {}",
                src.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(src);
    }
    apply_brightness_contrast(dst, adjustments.brightness, adjustments.contrast);
    Ok(())
}

impl RelayCore {
    fn process(&mut self, packed: &[u8], width: u32, height: u32) {
        let shared = &self.handle.shared;
        let metrics = &shared.metrics;

        if !shared.connected.load(Ordering::Acquire) {
            let dropped = metrics.record_dropped();
            if dropped == 1 || dropped % WARN_INTERVAL == 0 {
                debug!("Dropping frames while disconnected ({} so far)", dropped);
            }
            return;
        }

        let expected = PixelLayout::PackedBgra.buffer_size(self.width, self.height);
        if (width, height) != (self.width, self.height) || packed.len() != expected {
            let dropped = metrics.record_dropped();
            if dropped == 1 || dropped % WARN_INTERVAL == 0 {
                let err = RtspCamError::geometry_mismatch(
                    (self.width, self.height),
                    (width, height),
                );
                warn!("{} ({} bytes), frame skipped", err, packed.len());
            }
            return;
        }

        let arrival = Instant::now();
        let relayed = metrics.record_relayed(arrival);
        let sequence = shared.sequence.fetch_add(1, Ordering::AcqRel) + 1;

        let interval = shared.preview_interval.load(Ordering::Relaxed) as u64;
        if interval > 0 && sequence % interval == 0 {
            if let Some(sink) = self.preview_sink.as_mut() {
                let adjustments = **shared.preview.load();
                match adjust_into(packed, &mut self.preview_work, width, height, &adjustments) {
                    Ok(()) => {
                        sink.on_preview(PreviewFrame {
                            data: &self.preview_work,
                            width,
                            height,
                            sequence,
                        });
                        metrics.record_previewed();
                    }
                    Err(e) => debug!("Preview skipped: {}", e),
                }
            }
        }

        let adjustments = **shared.publish.load();
        let converted = adjust_into(packed, &mut self.work, width, height, &adjustments)
            .and_then(|()| convert_to_nv12_into(&self.work, &mut self.frame.data, width, height));
        if let Err(e) = converted {
            let failed = metrics.record_failed();
            if failed == 1 || failed % WARN_INTERVAL == 0 {
                warn!("Failed to convert frame {}: {} ({} failures)", sequence, e, failed);
            }
            return;
        }
        metrics.record_convert(arrival.elapsed());

        self.frame.sequence = sequence;
        self.frame.timestamp = duration_to_ticks(arrival.duration_since(shared.epoch));

        let publish_start = Instant::now();
        let published = {
            let mut channel = self.channel.lock();
            if !channel.is_started() {
                drop(channel);
                metrics.record_dropped();
                trace!(sequence, "Channel not started, frame not published");
                return;
            }
            channel.publish(&self.frame)
        };

        match published {
            Ok(()) => metrics.record_published(publish_start.elapsed()),
            Err(e) => {
                let failed = metrics.record_failed();
                if failed == 1 || failed % WARN_INTERVAL == 0 {
                    warn!("Failed to publish frame {}: {} ({} failures)", sequence, e, failed);
                }
            }
        }

        if relayed % PROGRESS_LOG_INTERVAL == 0 {
            info!("Relayed {} frames: {}", relayed, metrics.snapshot().format_line());
        }
    }
}

/// Decoder callbacks that feed the frame channel
///
/// Owns every buffer of the cycle, allocated once at the session geometry.
pub struct FrameRelay {
    staging: Vec<u8>,
    staged: (u32, u32),
    core: RelayCore,
}

impl FrameRelay {
    /// Create a relay publishing `width`x`height` frames into `channel`
    pub fn new(
        handle: RelayHandle,
        channel: Arc<Mutex<SharedFrameChannel>>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        check_geometry(width, height)?;
        let packed = PixelLayout::PackedBgra.buffer_size(width, height);

        Ok(Self {
            staging: vec![0; packed],
            staged: (width, height),
            core: RelayCore {
                handle,
                channel,
                width,
                height,
                work: vec![0; packed],
                preview_work: vec![0; packed],
                frame: Frame::new(width, height, PixelLayout::Nv12),
                preview_sink: None,
            },
        })
    }

    /// Attach a preview sink
    pub fn with_preview_sink(mut self, sink: impl PreviewSink) -> Self {
        self.core.preview_sink = Some(Box::new(sink));
        self
    }

    /// Replace or remove the preview sink
    pub fn set_preview_sink(&mut self, sink: Option<Box<dyn PreviewSink>>) {
        self.core.preview_sink = sink;
    }

    /// Control handle shared with the session
    pub fn handle(&self) -> &RelayHandle {
        &self.core.handle
    }

    /// The NV12 frame most recently produced
    pub fn last_frame(&self) -> &Frame {
        &self.core.frame
    }

    /// Relay one decoded packed BGRA picture
    ///
    /// Never fails; errors are logged and counted.
    pub fn on_decoded_frame(&mut self, packed: &[u8], width: u32, height: u32) {
        self.core.process(packed, width, height);
    }
}

impl FrameCallbacks for FrameRelay {
    fn lock(&mut self, format: &DecodedFormat) -> &mut [u8] {
        let size = format.buffer_size();
        if self.staging.len() != size {
            self.staging.resize(size, 0);
        }
        self.staged = (format.width, format.height);
        &mut self.staging
    }

    fn display(&mut self) {
        let (width, height) = self.staged;
        self.core.process(&self.staging, width, height);
    }

    fn connection_changed(&mut self, event: &ConnectionEvent) {
        self.core.handle.on_connection_event(event);
    }
}
