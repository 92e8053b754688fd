//! Pixel format constants and buffer size helpers
//!
//! Only two layouts flow through the relay: packed 32-bit BGRA coming out of
//! the decoder and NV12 going into the frame channel.

use serde::{Deserialize, Serialize};

/// DRM-style fourcc codes used on the wire
pub mod fourcc {
    /// BGRA8888 - 32-bit B,G,R,A byte order
    pub const BGRA8888: u32 = 0x41524742; // BGRA
    /// NV12 - Y plane followed by interleaved U/V at quarter resolution
    pub const NV12: u32 = 0x3231564E; // NV12
}

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Packed interleaved B,G,R,A, 4 bytes per pixel
    PackedBgra,
    /// Planar luma + interleaved 4:2:0 chroma, 1.5 bytes per pixel
    Nv12,
}

impl PixelLayout {
    /// Wire fourcc for this layout
    pub fn fourcc(&self) -> u32 {
        match self {
            Self::PackedBgra => fourcc::BGRA8888,
            Self::Nv12 => fourcc::NV12,
        }
    }

    /// Layout for a fourcc, if it is one we carry
    pub fn from_fourcc(code: u32) -> Option<Self> {
        match code {
            fourcc::BGRA8888 => Some(Self::PackedBgra),
            fourcc::NV12 => Some(Self::Nv12),
            _ => None,
        }
    }

    /// Exact buffer size in bytes for a frame of this layout
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::PackedBgra => pixels * 4,
            Self::Nv12 => pixels * 3 / 2,
        }
    }

    /// Bytes per row of the first plane
    pub fn stride(&self, width: u32) -> usize {
        match self {
            Self::PackedBgra => width as usize * 4,
            Self::Nv12 => width as usize,
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(format_name(self.fourcc()))
    }
}

/// Format information for debugging
pub fn format_name(code: u32) -> &'static str {
    match code {
        fourcc::BGRA8888 => "BGRA8888",
        fourcc::NV12 => "NV12",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size() {
        assert_eq!(PixelLayout::PackedBgra.buffer_size(1280, 720), 1280 * 720 * 4);
        assert_eq!(PixelLayout::Nv12.buffer_size(1280, 720), 1280 * 720 * 3 / 2);
    }

    #[test]
    fn test_fourcc_round_trip() {
        assert_eq!(
            PixelLayout::from_fourcc(fourcc::NV12),
            Some(PixelLayout::Nv12)
        );
        assert_eq!(PixelLayout::from_fourcc(0xDEADBEEF), None);
    }

    #[test]
    fn test_format_name() {
        assert_eq!(format_name(fourcc::NV12), "NV12");
        assert_eq!(PixelLayout::PackedBgra.to_string(), "BGRA8888");
        assert_eq!(format_name(0xDEADBEEF), "Unknown");
    }
}
