//! Synthetic test-pattern source
//!
//! Produces a moving BGRA gradient at a fixed rate through the same callback
//! triad as the RTSP decoder. Needs no network and no FFmpeg.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use super::{announce, DecodedFormat, FrameCallbacks, FrameSource};
use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;
use crate::types::ConnectionEvent;

struct PatternShared {
    shutdown: AtomicBool,
    running: AtomicBool,
    frames: AtomicU64,
}

/// Moving gradient source
pub struct TestPatternSource {
    fps: u32,
    max_frames: Option<u64>,
    output: Option<DecodedFormat>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<PatternShared>,
}

impl TestPatternSource {
    /// Create a source emitting `fps` pictures per second
    pub fn new(fps: u32) -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            fps,
            max_frames: None,
            output: None,
            events_tx,
            thread: None,
            shared: Arc::new(PatternShared {
                shutdown: AtomicBool::new(false),
                running: AtomicBool::new(false),
                frames: AtomicU64::new(0),
            }),
        }
    }

    /// Disconnect after emitting `frames` pictures
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Pictures per second
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl FrameSource for TestPatternSource {
    fn configure(&mut self, width: u32, height: u32, layout: PixelLayout) -> Result<()> {
        if self.thread.is_some() {
            return Err(RtspCamError::Unsupported(
                "cannot reconfigure a running source".into(),
            ));
        }
        self.output = Some(DecodedFormat::validate(width, height, layout)?);
        Ok(())
    }

    fn start(&mut self, callbacks: Box<dyn FrameCallbacks>) -> Result<()> {
        let output = self
            .output
            .ok_or_else(|| RtspCamError::config("Source must be configured before start"))?;
        if self.thread.is_some() {
            return Err(RtspCamError::SessionAlreadyRunning);
        }
        if self.fps == 0 {
            return Err(RtspCamError::config("Framerate cannot be zero"));
        }

        info!(
            "Starting test pattern {}x{} @ {}fps",
            output.width, output.height, self.fps
        );

        self.shared.shutdown.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let interval = Duration::from_secs(1) / self.fps;
        let max_frames = self.max_frames;
        let events_tx = self.events_tx.clone();
        let shared = self.shared.clone();

        let thread = std::thread::Builder::new()
            .name("rtspcam-pattern".to_string())
            .spawn(move || {
                pattern_thread(output, interval, max_frames, callbacks, events_tx, shared)
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                RtspCamError::decoder(format!("Failed to spawn pattern thread: {}", e))
            })?;

        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.shared.shutdown.store(true, Ordering::SeqCst);
        if thread.join().is_err() {
            error!("Pattern thread panicked");
        }
        self.shared.running.store(false, Ordering::SeqCst);
        debug!("Test pattern stopped");
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
            && self
                .thread
                .as_ref()
                .map(|t| !t.is_finished())
                .unwrap_or(false)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    fn frames_delivered(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    fn describe(&self) -> String {
        format!("test pattern @ {}fps", self.fps)
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fill a packed BGRA buffer with the gradient for picture `n`
pub fn fill_pattern(buf: &mut [u8], width: u32, height: u32, n: u64) {
    let w = width as usize;
    let h = height.max(1) as usize;
    let shift = (n % 256) as usize;
    let bar = (n as usize * 4) % w.max(1);

    for (y, row) in buf.chunks_exact_mut(w * 4).take(h).enumerate() {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            if x.abs_diff(bar) < 4 {
                px.copy_from_slice(&[255, 255, 255, 255]);
                continue;
            }
            px[0] = ((x * 255 / w.max(1) + shift) % 256) as u8;
            px[1] = ((y * 255 / h + shift / 2) % 256) as u8;
            px[2] = (((x + y) * 255 / (w + h) + 255 - shift) % 256) as u8;
            px[3] = 255;
        }
    }
}

fn pattern_thread(
    output: DecodedFormat,
    interval: Duration,
    max_frames: Option<u64>,
    mut callbacks: Box<dyn FrameCallbacks>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    shared: Arc<PatternShared>,
) {
    announce(
        callbacks.as_mut(),
        &events_tx,
        ConnectionEvent::Connected {
            width: output.width,
            height: output.height,
        },
    );

    let mut next = Instant::now();
    let mut n = 0u64;

    while !shared.shutdown.load(Ordering::SeqCst) {
        if max_frames.is_some_and(|limit| n >= limit) {
            debug!("Test pattern reached its frame limit ({})", n);
            break;
        }

        let buf = callbacks.lock(&output);
        if buf.len() >= output.buffer_size() {
            fill_pattern(buf, output.width, output.height, n);
            callbacks.unlock();
            callbacks.display();
            shared.frames.fetch_add(1, Ordering::Relaxed);
        } else {
            callbacks.unlock();
        }
        n += 1;

        if n % 300 == 0 {
            trace!("Test pattern emitted {} frames", n);
        }

        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            // Fell behind; don't try to catch up with a burst
            next = now;
        }
    }

    announce(
        callbacks.as_mut(),
        &events_tx,
        ConnectionEvent::Disconnected { error: None },
    );
    shared.running.store(false, Ordering::SeqCst);
}
