//! Relay session
//!
//! Orchestrates one stream to virtual camera activation: channel start,
//! source start, connection event pump, optional reconnect and stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{ChannelGeometry, SharedFrameChannel};
use crate::config::RelayConfig;
use crate::decoder::{FrameSource, RtspDecoder, TestPatternSource};
use crate::error::{Result, RtspCamError};
use crate::formats::PixelLayout;
use crate::performance::RelayStats;
use crate::relay::{FrameRelay, PreviewFrame, PreviewSink, RelayHandle};
use crate::types::{ConnectionEvent, Handle, StreamSource};

/// How long `process` waits for an event before returning
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created but not started
    Idle,
    /// Channel up, waiting for the source to connect
    Connecting,
    /// Frames flowing
    Running,
    /// Source dropped, waiting to reopen it
    Reconnecting,
    /// Tearing down
    Stopping,
    /// Stopped cleanly
    Stopped,
    /// Stopped after a failure
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Reconnecting => "reconnecting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What `start` set up
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub channel_name: String,
    pub source: String,
    pub geometry: ChannelGeometry,
}

/// Session statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub state: SessionState,
    pub source: String,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub frames_decoded: u64,
    pub reconnects: u64,
    pub elapsed_seconds: f64,
    pub last_error: Option<String>,
    pub relay: RelayStats,
}

/// Preview sink shared across source restarts
#[derive(Clone)]
struct SharedPreviewSink(Arc<Mutex<Box<dyn PreviewSink>>>);

impl PreviewSink for SharedPreviewSink {
    fn on_preview(&mut self, frame: PreviewFrame<'_>) {
        self.0.lock().on_preview(frame);
    }
}

/// One stream to virtual camera activation
pub struct RelaySession {
    handle: Handle,
    config: RelayConfig,
    channel: Arc<Mutex<SharedFrameChannel>>,
    relay: RelayHandle,
    preview_sink: Option<SharedPreviewSink>,
    source: Option<Box<dyn FrameSource>>,
    events: Option<broadcast::Receiver<ConnectionEvent>>,
    state: SessionState,
    start_time: Option<Instant>,
    frames_decoded: u64,
    reconnects: u64,
    last_error: Option<String>,
}

impl RelaySession {
    /// Create a session, rejecting configurations that cannot work
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate_strict()?;
        for warning in config.validate() {
            warn!("{}", warning);
        }

        let relay = RelayHandle::new(config.relay_options());
        let channel = Arc::new(Mutex::new(SharedFrameChannel::new(
            config.channel_name.clone(),
        )));

        Ok(Self {
            handle: Handle::new(),
            config,
            channel,
            relay,
            preview_sink: None,
            source: None,
            events: None,
            state: SessionState::Idle,
            start_time: None,
            frames_decoded: 0,
            reconnects: 0,
            last_error: None,
        })
    }

    /// Deliver throttled preview frames to `sink`
    pub fn with_preview_sink(mut self, sink: impl PreviewSink) -> Self {
        self.preview_sink = Some(SharedPreviewSink(Arc::new(Mutex::new(Box::new(sink)))));
        self
    }

    /// Session handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay control handle, for adjusting settings while running
    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Error that ended the last connection, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the session holds the channel and a source
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connecting | SessionState::Running | SessionState::Reconnecting
        )
    }

    /// Start the channel and the source
    ///
    /// Fails with [`RtspCamError::ChannelInUse`] if another producer holds
    /// the channel name.
    pub fn start(&mut self) -> Result<SessionInfo> {
        if self.is_running() {
            return Err(RtspCamError::SessionAlreadyRunning);
        }

        let (width, height, fps) = (self.config.width(), self.config.height(), self.config.fps());
        info!(
            "Starting session {}: {} -> '{}' at {}",
            self.handle, self.config.source, self.config.channel_name, self.config.preset
        );

        let geometry = match self.channel.lock().start(width, height, fps) {
            Ok(geometry) => geometry,
            Err(e) => {
                self.state = SessionState::Error;
                if e.is_channel_in_use() {
                    error!("{}", e);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.launch_source() {
            self.channel.lock().stop();
            self.state = SessionState::Error;
            return Err(e.with_context("Starting frame source"));
        }

        self.state = SessionState::Connecting;
        self.start_time = Some(Instant::now());
        self.last_error = None;

        let source = self
            .source
            .as_ref()
            .map(|s| s.describe())
            .unwrap_or_default();

        Ok(SessionInfo {
            channel_name: self.config.channel_name.clone(),
            source,
            geometry,
        })
    }

    fn build_source(&self) -> Box<dyn FrameSource> {
        match &self.config.source {
            StreamSource::Rtsp { url } => Box::new(
                RtspDecoder::new(url.clone())
                    .with_transport(self.config.transport)
                    .with_timeout(Duration::from_millis(self.config.timeout_ms)),
            ),
            StreamSource::TestPattern => Box::new(TestPatternSource::new(self.config.fps())),
        }
    }

    fn launch_source(&mut self) -> Result<()> {
        let (width, height) = (self.config.width(), self.config.height());

        let mut source = self.build_source();
        source.configure(width, height, PixelLayout::PackedBgra)?;

        let mut relay = FrameRelay::new(self.relay.clone(), self.channel.clone(), width, height)?;
        if let Some(sink) = &self.preview_sink {
            relay.set_preview_sink(Some(Box::new(sink.clone())));
        }

        // Subscribe first so the Connected event cannot be missed
        self.events = Some(source.subscribe());
        source.start(Box::new(relay))?;

        debug!("Source started: {}", source.describe());
        self.source = Some(source);
        Ok(())
    }

    fn stop_source(&mut self) {
        self.events = None;
        if let Some(mut source) = self.source.take() {
            source.stop();
            self.frames_decoded += source.frames_delivered();
        }
    }

    fn reconnect_enabled(&self) -> bool {
        self.config.reconnect_delay_ms > 0 && self.config.source.is_network()
    }

    /// Pump connection events
    ///
    /// Call in a loop while the session runs. Returns false once the session
    /// has ended.
    pub async fn process(&mut self) -> Result<bool> {
        match self.state {
            SessionState::Idle
            | SessionState::Stopping
            | SessionState::Stopped
            | SessionState::Error => return Ok(false),
            SessionState::Reconnecting => {
                tokio::time::sleep(Duration::from_millis(self.config.reconnect_delay_ms)).await;
                self.reconnects += 1;
                info!("Reconnecting (attempt {})", self.reconnects);
                match self.launch_source() {
                    Ok(()) => self.state = SessionState::Connecting,
                    Err(e) => warn!("Reconnect failed: {}", e),
                }
                return Ok(true);
            }
            SessionState::Connecting | SessionState::Running => {}
        }

        let Some(events) = self.events.as_mut() else {
            self.state = SessionState::Error;
            return Ok(false);
        };

        let received = tokio::time::timeout(EVENT_POLL_INTERVAL, events.recv()).await;
        match received {
            Ok(Ok(ConnectionEvent::Connected { width, height })) => {
                info!(
                    "Stream connected ({}x{} native, relaying at {}x{})",
                    width,
                    height,
                    self.config.width(),
                    self.config.height()
                );
                self.state = SessionState::Running;
                Ok(true)
            }
            Ok(Ok(ConnectionEvent::Disconnected { error })) => {
                self.last_error = error.clone();
                if self.reconnect_enabled() {
                    warn!(
                        "Stream disconnected{}, retrying in {} ms",
                        error.map(|e| format!(": {}", e)).unwrap_or_default(),
                        self.config.reconnect_delay_ms
                    );
                    self.stop_source();
                    self.state = SessionState::Reconnecting;
                    return Ok(true);
                }

                self.stop_source();
                self.channel.lock().stop();
                self.state = match error {
                    Some(e) => {
                        error!("Stream disconnected: {}", e);
                        SessionState::Error
                    }
                    None => {
                        info!("Stream ended");
                        SessionState::Stopped
                    }
                };
                Ok(false)
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                debug!("Missed {} connection events", n);
                Ok(true)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                info!("Source event channel closed");
                self.stop_source();
                self.channel.lock().stop();
                self.state = SessionState::Stopped;
                Ok(false)
            }
            Err(_) => {
                trace!("No connection event (timeout)");
                Ok(true)
            }
        }
    }

    /// Stop the source, then the channel; idempotent
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped && self.source.is_none() {
            return;
        }

        self.state = SessionState::Stopping;
        info!("Stopping session {}", self.handle);

        self.stop_source();
        self.channel.lock().stop();

        self.state = SessionState::Stopped;
        info!(
            "Session {} stopped: {}",
            self.handle,
            self.relay.stats().format_line()
        );
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        let live = self
            .source
            .as_ref()
            .map(|s| s.frames_delivered())
            .unwrap_or(0);

        SessionStats {
            state: self.state,
            source: self.config.source.to_string(),
            resolution: (self.config.width(), self.config.height()),
            fps: self.config.fps(),
            frames_decoded: self.frames_decoded + live,
            reconnects: self.reconnects,
            elapsed_seconds: self
                .start_time
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            last_error: self.last_error.clone(),
            relay: self.relay.stats(),
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if self.source.is_some() || self.channel.lock().is_started() {
            self.stop();
        }
    }
}
