//! Mock infrastructure for testing
//!
//! Provides frame generators, a recording callback sink and helpers for
//! working with uniquely named frame channels.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtspcam_core::decoder::{DecodedFormat, FrameCallbacks};
use rtspcam_core::types::ConnectionEvent;

/// Representative palette as (name, [r, g, b])
pub const PALETTE: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("gray", [128, 128, 128]),
];

/// Solid packed BGRA frame
///
/// # Arguments
/// * `width` - Frame width in pixels
/// * `height` - Frame height in pixels
/// * `color` - BGRA color values [B, G, R, A]
pub fn solid_bgra(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..(width * height) {
        data.extend_from_slice(&color);
    }
    data
}

/// Packed BGRA frame where every pixel is unique enough to track mirroring
pub fn gradient_bgra(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x * 255) / width.max(1)) as u8;
            let g = ((y * 255) / height.max(1)) as u8;
            let b = ((x + y) % 256) as u8;
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    data
}

/// 4x2 checkerboard of pure colors
///
/// ```text
/// R G B W
/// G R W B
/// ```
pub fn checkerboard_4x2() -> Vec<u8> {
    let red = [0, 0, 255, 255];
    let green = [0, 255, 0, 255];
    let blue = [255, 0, 0, 255];
    let white = [255, 255, 255, 255];
    [red, green, blue, white, green, red, white, blue].concat()
}

/// BGRA pixel at (x, y)
pub fn pixel(frame: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * width + x) * 4) as usize;
    [frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]
}

/// Floating point BT.601 studio-range (Y, U, V) for an RGB triple
pub fn bt601_reference(rgb: [u8; 3]) -> (f64, f64, f64) {
    let r = rgb[0] as f64;
    let g = rgb[1] as f64;
    let b = rgb[2] as f64;
    let y = 16.0 + (65.481 * r + 128.553 * g + 24.966 * b) / 255.0;
    let u = 128.0 + (-37.797 * r - 74.203 * g + 112.0 * b) / 255.0;
    let v = 128.0 + (112.0 * r - 93.786 * g - 18.214 * b) / 255.0;
    (y, u, v)
}

/// Channel name no other test process will use
pub fn unique_channel_name(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "rtspcam-test-{}-{}-{}",
        std::process::id(),
        tag,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// What a [`RecordingCallbacks`] has seen
#[derive(Debug, Default)]
pub struct Recorded {
    pub formats: Vec<DecodedFormat>,
    pub displayed: u64,
    pub unlocked: u64,
    pub events: Vec<ConnectionEvent>,
    pub last_picture: Vec<u8>,
}

/// Frame callbacks that record every call
pub struct RecordingCallbacks {
    buffer: Vec<u8>,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingCallbacks {
    /// Create callbacks and the shared record they write to
    pub fn new() -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (
            Self {
                buffer: Vec::new(),
                recorded: recorded.clone(),
            },
            recorded,
        )
    }
}

impl FrameCallbacks for RecordingCallbacks {
    fn lock(&mut self, format: &DecodedFormat) -> &mut [u8] {
        {
            let mut recorded = self.recorded.lock();
            if recorded.formats.last() != Some(format) {
                recorded.formats.push(*format);
            }
        }
        self.buffer.resize(format.buffer_size(), 0);
        &mut self.buffer
    }

    fn unlock(&mut self) {
        self.recorded.lock().unlocked += 1;
    }

    fn display(&mut self) {
        let mut recorded = self.recorded.lock();
        recorded.displayed += 1;
        recorded.last_picture.clone_from(&self.buffer);
    }

    fn connection_changed(&mut self, event: &ConnectionEvent) {
        self.recorded.lock().events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_bgra_size() {
        let frame = solid_bgra(100, 100, [0, 255, 0, 255]);
        assert_eq!(frame.len(), 100 * 100 * 4);
        assert_eq!(pixel(&frame, 100, 99, 99), [0, 255, 0, 255]);
    }

    #[test]
    fn test_checkerboard_layout() {
        let frame = checkerboard_4x2();
        assert_eq!(frame.len(), 4 * 2 * 4);
        assert_eq!(pixel(&frame, 4, 0, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&frame, 4, 3, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn test_unique_channel_names() {
        assert_ne!(unique_channel_name("a"), unique_channel_name("a"));
    }
}
