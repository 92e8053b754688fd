//! Pixel conversion and image adjustment
//!
//! Pure functions over fixed-size buffers, applied by the relay in a fixed
//! order: flip, then brightness/contrast, then BGRA to NV12.
//!
//! The NV12 conversion uses the fixed-point BT.601 studio-range coefficients
//! the external virtual camera reader expects, so the integer constants must
//! not be changed.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;

/// Allowed range for brightness and contrast
pub const ADJUSTMENT_RANGE: std::ops::RangeInclusive<i32> = -100..=100;

/// Per-path image adjustments (mirroring and linear brightness/contrast)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAdjustments {
    /// Mirror left/right
    pub flip_horizontal: bool,
    /// Mirror top/bottom
    pub flip_vertical: bool,
    /// Additive offset in [-100, 100], scaled to the full 0-255 range
    pub brightness: i32,
    /// Contrast around mid-gray in [-100, 100]
    pub contrast: i32,
}

impl ImageAdjustments {
    /// Adjustments that leave a frame untouched
    pub const NONE: Self = Self {
        flip_horizontal: false,
        flip_vertical: false,
        brightness: 0,
        contrast: 0,
    };

    /// Set the flip flags
    pub fn with_flip(mut self, horizontal: bool, vertical: bool) -> Self {
        self.flip_horizontal = horizontal;
        self.flip_vertical = vertical;
        self
    }

    /// Set brightness (clamped to [-100, 100])
    pub fn with_brightness(mut self, brightness: i32) -> Self {
        self.brightness = clamp_adjustment(brightness);
        self
    }

    /// Set contrast (clamped to [-100, 100])
    pub fn with_contrast(mut self, contrast: i32) -> Self {
        self.contrast = clamp_adjustment(contrast);
        self
    }

    /// Copy with brightness and contrast forced into range
    pub fn clamped(self) -> Self {
        Self {
            brightness: clamp_adjustment(self.brightness),
            contrast: clamp_adjustment(self.contrast),
            ..self
        }
    }

    /// Whether any flip is requested
    pub fn needs_flip(&self) -> bool {
        self.flip_horizontal || self.flip_vertical
    }

    /// Whether brightness/contrast would change any pixel
    pub fn needs_levels(&self) -> bool {
        self.brightness != 0 || self.contrast != 0
    }

    /// Whether these adjustments are a no-op
    pub fn is_identity(&self) -> bool {
        !self.needs_flip() && !self.needs_levels()
    }
}

fn clamp_adjustment(value: i32) -> i32 {
    value.clamp(*ADJUSTMENT_RANGE.start(), *ADJUSTMENT_RANGE.end())
}

/// Reject geometry the 4:2:0 sampler cannot handle
pub fn check_geometry(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(RtspCamError::invalid_geometry(format!(
            "{}x{} has a zero dimension",
            width, height
        )));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(RtspCamError::invalid_geometry(format!(
            "{}x{} is not even in both dimensions",
            width, height
        )));
    }
    Ok(())
}

fn check_len(what: &str, buf: &[u8], layout: PixelLayout, width: u32, height: u32) -> Result<()> {
    let expected = layout.buffer_size(width, height);
    if buf.len() != expected {
        return Err(RtspCamError::invalid_geometry(format!(
            "{} buffer is {} bytes, expected {} for {} {}x{}",
            what,
            buf.len(),
            expected,
            layout,
            width,
            height
        )));
    }
    Ok(())
}

/// Mirror a packed BGRA frame into a new buffer
///
/// Output pixel (x, y) reads input pixel
/// (`flip_h ? w-1-x : x`, `flip_v ? h-1-y : y`).
pub fn apply_flip(
    frame: &[u8],
    width: u32,
    height: u32,
    flip_horizontal: bool,
    flip_vertical: bool,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; frame.len()];
    apply_flip_into(frame, &mut out, width, height, flip_horizontal, flip_vertical)?;
    Ok(out)
}

/// Mirror a packed BGRA frame into a caller-provided buffer of the same size
pub fn apply_flip_into(
    src: &[u8],
    dst: &mut [u8],
    width: u32,
    height: u32,
    flip_horizontal: bool,
    flip_vertical: bool,
) -> Result<()> {
    // Odd sizes flip fine, only empty frames are rejected
    if width == 0 || height == 0 {
        return Err(RtspCamError::invalid_geometry(format!(
            "cannot flip a {}x{} frame",
            width, height
        )));
    }
    check_len("source", src, PixelLayout::PackedBgra, width, height)?;
    check_len("destination", dst, PixelLayout::PackedBgra, width, height)?;

    let stride = PixelLayout::PackedBgra.stride(width);
    let w = width as usize;
    let h = height as usize;

    for (y, dst_row) in dst.chunks_exact_mut(stride).enumerate() {
        let sy = if flip_vertical { h - 1 - y } else { y };
        let src_row = &src[sy * stride..(sy + 1) * stride];

        if !flip_horizontal {
            dst_row.copy_from_slice(src_row);
            continue;
        }

        for (x, px) in dst_row.chunks_exact_mut(4).enumerate() {
            let sx = (w - 1 - x) * 4;
            px.copy_from_slice(&src_row[sx..sx + 4]);
        }
    }

    Ok(())
}

/// Build the 256-entry lookup table for a brightness/contrast pair
fn levels_lut(brightness: i32, contrast: i32) -> [u8; 256] {
    let gain = (100 + clamp_adjustment(contrast)) as f32 / 100.0;
    let offset = clamp_adjustment(brightness) as f32 / 100.0 * 255.0;

    let mut lut = [0u8; 256];
    for (v, entry) in lut.iter_mut().enumerate() {
        let value = (v as f32 - 128.0) * gain + 128.0 + offset;
        *entry = value.clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Apply brightness/contrast in place to the B, G and R channels
///
/// `v' = clamp((v - 128) * (100 + contrast) / 100 + 128 + brightness / 100 * 255)`.
/// Alpha is left untouched. Does nothing when both parameters are zero.
pub fn apply_brightness_contrast(frame: &mut [u8], brightness: i32, contrast: i32) {
    if brightness == 0 && contrast == 0 {
        return;
    }

    let lut = levels_lut(brightness, contrast);
    for px in frame.chunks_exact_mut(4) {
        px[0] = lut[px[0] as usize];
        px[1] = lut[px[1] as usize];
        px[2] = lut[px[2] as usize];
    }
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// BT.601 studio-range luma
#[inline]
pub fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

/// BT.601 studio-range blue-difference chroma
#[inline]
pub fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128)
}

/// BT.601 studio-range red-difference chroma
#[inline]
pub fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128)
}

/// Convert a packed BGRA frame to a new NV12 buffer of `w*h*3/2` bytes
pub fn convert_to_nv12(bgra: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut out = vec![0u8; PixelLayout::Nv12.buffer_size(width, height)];
    convert_to_nv12_into(bgra, &mut out, width, height)?;
    Ok(out)
}

/// Convert a packed BGRA frame to NV12 in a caller-provided buffer
///
/// Chroma is taken from the top-left pixel of each 2x2 block and written as
/// interleaved U,V pairs right after the luma plane. Both dimensions must be
/// even.
pub fn convert_to_nv12_into(bgra: &[u8], nv12: &mut [u8], width: u32, height: u32) -> Result<()> {
    check_geometry(width, height)?;
    check_len("source", bgra, PixelLayout::PackedBgra, width, height)?;
    check_len("destination", nv12, PixelLayout::Nv12, width, height)?;

    let w = width as usize;
    let stride = PixelLayout::PackedBgra.stride(width);
    let (luma, chroma) = nv12.split_at_mut(w * height as usize);

    for (y, row) in bgra.chunks_exact(stride).enumerate() {
        let luma_row = &mut luma[y * w..(y + 1) * w];
        let sample_chroma = y % 2 == 0;
        let chroma_row_start = (y / 2) * w;

        for (x, px) in row.chunks_exact(4).enumerate() {
            let b = px[0] as i32;
            let g = px[1] as i32;
            let r = px[2] as i32;

            luma_row[x] = rgb_to_y(r, g, b);

            if sample_chroma && x % 2 == 0 {
                let idx = chroma_row_start + x;
                chroma[idx] = rgb_to_u(r, g, b);
                chroma[idx + 1] = rgb_to_v(r, g, b);
            }
        }
    }

    Ok(())
}
