//! RTSP decoding via FFmpeg
//!
//! Opens the stream with `rtsp_transport`/`timeout` options, decodes the best
//! video track and scales every picture to packed BGRA at the configured
//! geometry before handing it to the callbacks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg_next as ffmpeg;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    announce, init_runtime, DecodedFormat, FrameCallbacks, FrameSource, RtspTransport,
    DEFAULT_TIMEOUT_MS,
};
use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;
use crate::types::{redact_url, ConnectionEvent};

/// Decode errors between two log lines
const DECODE_ERROR_LOG_INTERVAL: u64 = 50;

/// State shared with the decode thread
struct DecoderShared {
    shutdown: AtomicBool,
    running: AtomicBool,
    frames: AtomicU64,
    decode_errors: AtomicU64,
}

/// Everything the decode thread needs to open the stream
#[derive(Debug, Clone)]
struct StreamParams {
    url: String,
    transport: RtspTransport,
    timeout: Duration,
    output: DecodedFormat,
}

/// RTSP source backed by FFmpeg
pub struct RtspDecoder {
    url: String,
    transport: RtspTransport,
    timeout: Duration,
    output: Option<DecodedFormat>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<DecoderShared>,
}

impl RtspDecoder {
    /// Create a decoder for `url` with TCP transport and the default timeout
    pub fn new(url: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            url: url.into(),
            transport: RtspTransport::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            output: None,
            events_tx,
            thread: None,
            shared: Arc::new(DecoderShared {
                shutdown: AtomicBool::new(false),
                running: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Set the RTSP lower transport
    pub fn with_transport(mut self, transport: RtspTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Set the socket read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stream URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Configured output format, if any
    pub fn output_format(&self) -> Option<DecodedFormat> {
        self.output
    }

    /// Decode errors seen since creation
    pub fn decode_errors(&self) -> u64 {
        self.shared.decode_errors.load(Ordering::Relaxed)
    }
}

impl FrameSource for RtspDecoder {
    fn configure(&mut self, width: u32, height: u32, layout: PixelLayout) -> Result<()> {
        if self.thread.is_some() {
            return Err(RtspCamError::Unsupported(
                "cannot reconfigure a running decoder".into(),
            ));
        }
        let format = DecodedFormat::validate(width, height, layout)?;
        debug!(width, height, "Decoder output configured");
        self.output = Some(format);
        Ok(())
    }

    fn start(&mut self, callbacks: Box<dyn FrameCallbacks>) -> Result<()> {
        let output = self
            .output
            .ok_or_else(|| RtspCamError::config("Decoder must be configured before start"))?;
        if self.thread.is_some() {
            return Err(RtspCamError::SessionAlreadyRunning);
        }

        init_runtime()?;

        let params = StreamParams {
            url: self.url.clone(),
            transport: self.transport,
            timeout: self.timeout,
            output,
        };

        info!(
            "Opening {} over {} ({}x{} BGRA, timeout {:?})",
            redact_url(&self.url),
            self.transport,
            output.width,
            output.height,
            self.timeout
        );

        self.shared.shutdown.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let events_tx = self.events_tx.clone();
        let shared = self.shared.clone();

        let thread = std::thread::Builder::new()
            .name("rtspcam-decode".to_string())
            .spawn(move || decode_thread(params, callbacks, events_tx, shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                RtspCamError::decoder(format!("Failed to spawn decode thread: {}", e))
            })?;

        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        info!("Stopping RTSP decoder");
        self.shared.shutdown.store(true, Ordering::SeqCst);

        // A blocked read returns within the configured timeout
        if thread.join().is_err() {
            error!("Decode thread panicked");
        }

        self.shared.running.store(false, Ordering::SeqCst);
        info!(
            frames = self.shared.frames.load(Ordering::Relaxed),
            decode_errors = self.decode_errors(),
            "RTSP decoder stopped"
        );
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
        format!("RTSP {} ({})", redact_url(&self.url), self.transport)
    }
}

impl Drop for RtspDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the `rtspcam-decode` thread
fn decode_thread(
    params: StreamParams,
    mut callbacks: Box<dyn FrameCallbacks>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    shared: Arc<DecoderShared>,
) {
    let error = match run_stream(&params, callbacks.as_mut(), &events_tx, &shared) {
        Ok(()) => None,
        Err(e) => {
            warn!("RTSP stream ended: {}", e);
            Some(e.to_string())
        }
    };

    announce(
        callbacks.as_mut(),
        &events_tx,
        ConnectionEvent::Disconnected { error },
    );
    shared.running.store(false, Ordering::SeqCst);
}

fn open_input(params: &StreamParams) -> Result<ffmpeg::format::context::Input> {
    let mut options = ffmpeg::Dictionary::new();
    options.set("rtsp_transport", params.transport.as_str());
    // FFmpeg expects microseconds
    options.set("timeout", &params.timeout.as_micros().to_string());

    ffmpeg::format::input_with_dictionary(&params.url, options).map_err(|e| {
        RtspCamError::connection(format!("Failed to open {}: {}", redact_url(&params.url), e))
    })
}

fn build_scaler(decoded: &Video, output: &DecodedFormat) -> Result<scaling::Context> {
    scaling::Context::get(
        decoded.format(),
        decoded.width(),
        decoded.height(),
        Pixel::BGRA,
        output.width,
        output.height,
        Flags::BILINEAR,
    )
    .map_err(|e| RtspCamError::decoder(format!("Failed to create scaler: {}", e)))
}

fn note_decode_error(shared: &DecoderShared, err: &ffmpeg::Error) {
    let count = shared.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
    if count == 1 || count % DECODE_ERROR_LOG_INTERVAL == 0 {
        warn!("Decode errors: {} (latest: {})", count, err);
    }
}

fn run_stream(
    params: &StreamParams,
    callbacks: &mut dyn FrameCallbacks,
    events_tx: &broadcast::Sender<ConnectionEvent>,
    shared: &DecoderShared,
) -> Result<()> {
    let mut ictx = open_input(params)?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| RtspCamError::connection("Stream has no video track"))?;
    let stream_index = stream.index();
    let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    let mut decoder = context.decoder().video()?;

    let (native_width, native_height) = (decoder.width(), decoder.height());
    info!(
        "Connected: {:?} {}x{} (stream #{})",
        decoder.id(),
        native_width,
        native_height,
        stream_index
    );

    announce(
        callbacks,
        events_tx,
        ConnectionEvent::Connected {
            width: native_width,
            height: native_height,
        },
    );

    let mut decoded = Video::empty();
    let mut scaled = Video::empty();
    let mut scaler: Option<scaling::Context> = None;

    while !shared.shutdown.load(Ordering::SeqCst) {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut ictx) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                info!("RTSP stream reached end of file");
                return Ok(());
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                continue;
            }
            Err(e) => {
                return Err(RtspCamError::connection(format!("Read failed: {}", e)));
            }
        }

        if packet.stream() != stream_index {
            continue;
        }

        if let Err(e) = decoder.send_packet(&packet) {
            note_decode_error(shared, &e);
            continue;
        }

        while decoder.receive_frame(&mut decoded).is_ok() {
            let input_changed = scaler.as_ref().is_none_or(|s| {
                let input = s.input();
                input.format != decoded.format()
                    || input.width != decoded.width()
                    || input.height != decoded.height()
            });
            if input_changed {
                if scaler.is_some() {
                    info!(
                        "Stream resolution changed to {}x{}",
                        decoded.width(),
                        decoded.height()
                    );
                }
                scaler = Some(build_scaler(&decoded, &params.output)?);
            }

            let Some(scaler) = scaler.as_mut() else {
                continue;
            };
            if let Err(e) = scaler.run(&decoded, &mut scaled) {
                note_decode_error(shared, &e);
                continue;
            }

            deliver(&scaled, &params.output, callbacks);
            shared.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    debug!("Decode loop shut down");
    Ok(())
}

/// Run the lock/unlock/display triad for one scaled picture
fn deliver(picture: &Video, format: &DecodedFormat, callbacks: &mut dyn FrameCallbacks) {
    let row_bytes = format.stride();
    let src_stride = picture.stride(0);
    let src = picture.data(0);

    let dst = callbacks.lock(format);
    if dst.len() < format.buffer_size() {
        warn!(
            "Callback buffer is {} bytes, need {}",
            dst.len(),
            format.buffer_size()
        );
        callbacks.unlock();
        return;
    }

    for (y, row) in dst
        .chunks_exact_mut(row_bytes)
        .take(format.height as usize)
        .enumerate()
    {
        let start = y * src_stride;
        row.copy_from_slice(&src[start..start + row_bytes]);
    }

    callbacks.unlock();
    callbacks.display();
}
