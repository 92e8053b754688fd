//! Configuration types for rtspcam
//!
//! Provides output presets and the relay session configuration.

mod file;

pub use file::{sample_config, ConfigFile, OutputSettings, PreviewSettings, StreamSettings};

use crate::channel::DEFAULT_CHANNEL_NAME;
use crate::convert::{ImageAdjustments, ADJUSTMENT_RANGE};
use crate::decoder::{RtspTransport, DEFAULT_TIMEOUT_MS};
use crate::error::{Result, RtspCamError};
use crate::relay::{RelayOptions, DEFAULT_PREVIEW_INTERVAL};
use crate::types::StreamSource;
use serde::{Deserialize, Serialize};

/// Output resolution/framerate preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 640x480 @ 30fps
    #[serde(rename = "480p30")]
    P480_30,
    /// 1280x720 @ 30fps (default)
    #[default]
    #[serde(rename = "720p30")]
    P720_30,
    /// 1280x720 @ 60fps
    #[serde(rename = "720p60")]
    P720_60,
    /// 1920x1080 @ 30fps
    #[serde(rename = "1080p30")]
    P1080_30,
    /// 1920x1080 @ 60fps
    #[serde(rename = "1080p60")]
    P1080_60,
    /// Custom resolution/framerate
    Custom {
        width: u32,
        height: u32,
        fps: u32,
    },
}

impl Preset {
    /// Get width in pixels
    pub fn width(&self) -> u32 {
        match self {
            Self::P480_30 => 640,
            Self::P720_30 | Self::P720_60 => 1280,
            Self::P1080_30 | Self::P1080_60 => 1920,
            Self::Custom { width, .. } => *width,
        }
    }

    /// Get height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Self::P480_30 => 480,
            Self::P720_30 | Self::P720_60 => 720,
            Self::P1080_30 | Self::P1080_60 => 1080,
            Self::Custom { height, .. } => *height,
        }
    }

    /// Get framerate
    pub fn fps(&self) -> u32 {
        match self {
            Self::P480_30 | Self::P720_30 | Self::P1080_30 => 30,
            Self::P720_60 | Self::P1080_60 => 60,
            Self::Custom { fps, .. } => *fps,
        }
    }

    /// Bytes per second written into the frame channel
    pub fn channel_bandwidth(&self) -> u64 {
        (self.width() as u64) * (self.height() as u64) * 3 / 2 * (self.fps() as u64)
    }

    /// Get resolution as (width, height) tuple
    pub fn resolution(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P480_30 => write!(f, "480p30"),
            Self::P720_30 => write!(f, "720p30"),
            Self::P720_60 => write!(f, "720p60"),
            Self::P1080_30 => write!(f, "1080p30"),
            Self::P1080_60 => write!(f, "1080p60"),
            Self::Custom { width, height, fps } => write!(f, "{}x{}@{}", width, height, fps),
        }
    }
}

fn parse_custom(s: &str) -> Option<Preset> {
    let (size, fps) = s.split_once('@')?;
    let (width, height) = size.split_once('x')?;
    Some(Preset::Custom {
        width: width.trim().parse().ok()?,
        height: height.trim().parse().ok()?,
        fps: fps.trim().parse().ok()?,
    })
}

impl std::str::FromStr for Preset {
    type Err = RtspCamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "480p30" | "480p" | "vga" => Ok(Self::P480_30),
            "720p30" | "720p" => Ok(Self::P720_30),
            "720p60" => Ok(Self::P720_60),
            "1080p30" | "1080p" => Ok(Self::P1080_30),
            "1080p60" => Ok(Self::P1080_60),
            other => parse_custom(other).ok_or_else(|| {
                RtspCamError::config(format!(
                    "Unknown preset '{}'. Use 480p30, 720p30, 720p60, 1080p30, 1080p60 or WxH@fps",
                    s
                ))
            }),
        }
    }
}

fn default_channel_name() -> String {
    DEFAULT_CHANNEL_NAME.to_string()
}

/// Complete relay session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Where frames come from
    pub source: StreamSource,
    /// Output preset (resolution/framerate)
    pub preset: Preset,
    /// Shared memory channel name
    pub channel_name: String,
    /// RTSP lower transport
    pub transport: RtspTransport,
    /// Socket read timeout in milliseconds
    pub timeout_ms: u64,
    /// Delay before reopening a dropped stream, 0 disables reconnect
    pub reconnect_delay_ms: u64,
    /// Deliver a preview every Nth frame, 0 disables preview
    pub preview_interval: u32,
    /// Adjustments for the published (virtual camera) path
    pub publish: ImageAdjustments,
    /// Adjustments for the preview path
    pub preview: ImageAdjustments,
}

impl RelayConfig {
    /// Create a config relaying an RTSP URL
    pub fn rtsp(url: impl Into<String>) -> Self {
        Self::with_source(StreamSource::rtsp(url))
    }

    /// Create a config relaying the synthetic test pattern
    pub fn test_pattern() -> Self {
        Self::with_source(StreamSource::TestPattern)
    }

    fn with_source(source: StreamSource) -> Self {
        Self {
            source,
            preset: Preset::default(),
            channel_name: default_channel_name(),
            transport: RtspTransport::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reconnect_delay_ms: 0,
            preview_interval: DEFAULT_PREVIEW_INTERVAL,
            publish: ImageAdjustments::NONE,
            preview: ImageAdjustments::NONE,
        }
    }

    /// Set the output preset
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    /// Set the shared memory channel name
    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = name.into();
        self
    }

    /// Set the RTSP transport
    pub fn with_transport(mut self, transport: RtspTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Set the read timeout in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Reopen the stream this long after it drops
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the preview throttle
    pub fn with_preview_interval(mut self, interval: u32) -> Self {
        self.preview_interval = interval;
        self
    }

    /// Set the publish-path adjustments
    pub fn with_publish_adjustments(mut self, adjustments: ImageAdjustments) -> Self {
        self.publish = adjustments;
        self
    }

    /// Set the preview-path adjustments
    pub fn with_preview_adjustments(mut self, adjustments: ImageAdjustments) -> Self {
        self.preview = adjustments;
        self
    }

    /// Get output width
    pub fn width(&self) -> u32 {
        self.preset.width()
    }

    /// Get output height
    pub fn height(&self) -> u32 {
        self.preset.height()
    }

    /// Get output framerate
    pub fn fps(&self) -> u32 {
        self.preset.fps()
    }

    /// Initial relay settings derived from this config
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            preview_interval: self.preview_interval,
            publish: self.publish.clamped(),
            preview: self.preview.clamped(),
        }
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (path, adj) in [("publish", &self.publish), ("preview", &self.preview)] {
            if !ADJUSTMENT_RANGE.contains(&adj.brightness) {
                warnings.push(format!(
                    "{} brightness {} is outside [-100, 100] and will be clamped",
                    path, adj.brightness
                ));
            }
            if !ADJUSTMENT_RANGE.contains(&adj.contrast) {
                warnings.push(format!(
                    "{} contrast {} is outside [-100, 100] and will be clamped",
                    path, adj.contrast
                ));
            }
        }

        if self.source.is_network() && self.timeout_ms < 1000 {
            warnings.push(format!(
                "Read timeout of {} ms may disconnect on ordinary network jitter",
                self.timeout_ms
            ));
        }

        if self.fps() > 60 {
            warnings.push(format!(
                "{}fps exceeds what most video-call applications accept. Frames may be dropped downstream.",
                self.fps()
            ));
        }

        // 1080p60 NV12 is ~187 MB/s
        if self.preset.channel_bandwidth() > 200_000_000 {
            warnings.push(format!(
                "{} moves over 200 MB/s through shared memory; conversion may not keep up",
                self.preset
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration cannot work
    pub fn validate_strict(&self) -> Result<()> {
        if let StreamSource::Rtsp { url } = &self.source {
            let lower = url.to_lowercase();
            if !(lower.starts_with("rtsp://") || lower.starts_with("rtsps://")) {
                return Err(RtspCamError::config(format!(
                    "Invalid stream URL '{}'. Must start with rtsp:// or rtsps://",
                    crate::types::redact_url(url)
                )));
            }
        }

        if self.width() == 0 || self.height() == 0 {
            return Err(RtspCamError::config("Resolution cannot be zero"));
        }

        if self.width() % 2 != 0 || self.height() % 2 != 0 {
            return Err(RtspCamError::config(format!(
                "Resolution {}x{} must be even in both dimensions for NV12",
                self.width(),
                self.height()
            )));
        }

        if self.fps() == 0 {
            return Err(RtspCamError::config("Framerate cannot be zero"));
        }

        if self.width() > 7680 || self.height() > 4320 {
            return Err(RtspCamError::config(format!(
                "Resolution {}x{} exceeds maximum supported (7680x4320)",
                self.width(),
                self.height()
            )));
        }

        if self.fps() > 240 {
            return Err(RtspCamError::config(format!(
                "Framerate {} exceeds maximum supported (240)",
                self.fps()
            )));
        }

        if self.channel_name.is_empty() || self.channel_name.contains('/') {
            return Err(RtspCamError::config(format!(
                "Channel name '{}' must be non-empty and cannot contain '/'",
                self.channel_name
            )));
        }

        if self.timeout_ms == 0 {
            return Err(RtspCamError::config("Read timeout cannot be zero"));
        }

        Ok(())
    }
}
