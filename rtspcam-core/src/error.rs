//! Error types for rtspcam

use thiserror::Error;

/// Result type alias using RtspCamError
pub type Result<T> = std::result::Result<T, RtspCamError>;

/// Main error type for rtspcam operations
#[derive(Debug, Error)]
pub enum RtspCamError {
    /// Could not open or read the network stream
    #[error("Stream connection error: {0}")]
    Connection(String),

    /// FFmpeg decode/scale error
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Shared memory channel error
    #[error("Frame channel error: {0}")]
    Channel(String),

    /// Another producer already owns the well-known channel name
    #[error("Frame channel '{name}' is already in use by another producer")]
    ChannelInUse {
        /// Channel name that is held by someone else
        name: String,
    },

    /// Frame geometry does not match the negotiated session geometry
    #[error("Frame geometry {actual_width}x{actual_height} does not match session geometry {expected_width}x{expected_height}")]
    GeometryMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Geometry that can never be relayed (zero or odd dimensions, bad buffer size)
    #[error("Invalid frame geometry: {0}")]
    InvalidGeometry(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session already running
    #[error("Relay session already running")]
    SessionAlreadyRunning,

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RtspCamError>,
    },
}

impl RtspCamError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a decoder error
    pub fn decoder(msg: impl Into<String>) -> Self {
        Self::Decoder(msg.into())
    }

    /// Create a channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid geometry error
    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Create a geometry mismatch error
    pub fn geometry_mismatch(expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::GeometryMismatch {
            expected_width: expected.0,
            expected_height: expected.1,
            actual_width: actual.0,
            actual_height: actual.1,
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &RtspCamError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error means another producer owns the channel
    pub fn is_channel_in_use(&self) -> bool {
        matches!(self.root(), Self::ChannelInUse { .. })
    }

    /// Actionable hint for the user, if there is one
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::Connection(_) => Some(
                "Check the RTSP URL, credentials and that the camera is reachable; try --transport tcp",
            ),
            Self::Decoder(_) => {
                Some("Make sure FFmpeg was built with the codec the camera streams (H.264/H.265)")
            }
            Self::ChannelInUse { .. } => Some(
                "Another rtspcam instance is publishing to the virtual camera. Stop it first, or run 'rtspcam probe --reset --force' if it crashed",
            ),
            Self::Channel(_) => Some("Check that /dev/shm is mounted and writable"),
            Self::GeometryMismatch { .. } => {
                Some("The stream resolution changed; restart the session to renegotiate")
            }
            Self::InvalidGeometry(_) => Some("Use a resolution with even, non-zero width and height"),
            Self::Config(_) => Some("Check ~/.config/rtspcam/config.toml or run 'rtspcam config sample'"),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<ffmpeg_next::Error> for RtspCamError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Decoder(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_in_use_survives_context() {
        let err = RtspCamError::ChannelInUse {
            name: "rtspcam-frames".into(),
        }
        .with_context("Starting session");
        assert!(err.is_channel_in_use());
        assert!(err.user_hint().unwrap().contains("probe --reset"));
    }

    #[test]
    fn test_geometry_mismatch_message() {
        let err = RtspCamError::geometry_mismatch((1280, 720), (640, 480));
        assert_eq!(
            err.to_string(),
            "Frame geometry 640x480 does not match session geometry 1280x720"
        );
    }
}
