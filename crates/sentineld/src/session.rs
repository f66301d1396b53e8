//! The monitoring session engine.
//!
//! One dedicated OS thread owns the camera, the face encoder, and the
//! per-session state. D-Bus handlers talk to it through a bounded mpsc
//! channel with oneshot replies. While idle the thread blocks on the
//! channel; while monitoring it drains pending requests between frames so
//! control stays responsive without a second thread touching the camera.
//!
//! Session states: idle, monitoring, monitoring-and-recording. Recording
//! and snapshots are only reachable from monitoring; invalid transitions
//! (including redundant ones) are rejected, never coerced.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use sentinel_core::{
    EuclideanMatcher, FaceEncoder, Gallery, GalleryError, Identity, Matcher, SightingGuard,
};
use sentinel_hw::{CameraError, Frame, FrameSource, RecorderError, VideoRecorder};

use crate::alert::AlertSink;
use crate::event_log::{DetectionEvent, EventLog};

/// Pause between frame passes; keeps a 640x480 pipeline well under one
/// core without starving the command channel.
const FRAME_PAUSE: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),
    #[error("session thread exited")]
    ChannelClosed,
}

/// Snapshot of the engine state for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub monitoring: bool,
    pub recording: bool,
    pub uptime_secs: u64,
    pub gallery_size: usize,
    pub frames_processed: u64,
}

/// Engine tunables, resolved from daemon configuration at startup.
pub struct SessionConfig {
    pub gallery_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub video_dir: PathBuf,
    pub tolerance: f32,
    pub detect_interval: u32,
    pub record_fps: u32,
    pub max_capture_failures: u32,
    /// Per-pass sleep; tests set this to zero.
    pub frame_pause: Duration,
}

impl SessionConfig {
    pub fn frame_pause_default() -> Duration {
        FRAME_PAUSE
    }
}

/// Messages sent from D-Bus handlers to the session thread.
enum SessionRequest {
    StartMonitoring {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    StopMonitoring {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    StartRecording {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<PathBuf, SessionError>>,
    },
    CaptureSnapshot {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    ReloadGallery {
        reply: oneshot::Sender<Result<usize, SessionError>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Clone-safe handle to the session thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

macro_rules! request {
    ($self:expr, $variant:ident) => {{
        let (reply_tx, reply_rx) = oneshot::channel();
        $self
            .tx
            .send(SessionRequest::$variant { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }};
}

impl SessionHandle {
    pub async fn start_monitoring(&self) -> Result<(), SessionError> {
        request!(self, StartMonitoring)
    }

    pub async fn stop_monitoring(&self) -> Result<(), SessionError> {
        request!(self, StopMonitoring)
    }

    pub async fn start_recording(&self) -> Result<(), SessionError> {
        request!(self, StartRecording)
    }

    /// Stop the active recording and return the finalized file path.
    pub async fn stop_recording(&self) -> Result<PathBuf, SessionError> {
        request!(self, StopRecording)
    }

    /// Arm a one-shot snapshot; the next captured frame is written out.
    pub async fn capture_snapshot(&self) -> Result<(), SessionError> {
        request!(self, CaptureSnapshot)
    }

    /// Re-read the enrollment directory; returns the new gallery size.
    pub async fn reload_gallery(&self) -> Result<usize, SessionError> {
        request!(self, ReloadGallery)
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }
}

/// Spawn the session engine on a dedicated OS thread.
///
/// Loads the gallery synchronously (fail-fast: a daemon with nobody
/// enrolled cannot classify anything), then enters the request loop. The
/// camera is opened lazily per monitoring session via `open_source`.
pub fn spawn_session<S, E, F>(
    config: SessionConfig,
    open_source: F,
    mut encoder: E,
    sink: Arc<dyn AlertSink>,
    log: Arc<Mutex<EventLog>>,
) -> Result<SessionHandle, SessionError>
where
    S: FrameSource + Send + 'static,
    E: FaceEncoder + Send + 'static,
    F: FnMut() -> Result<S, CameraError> + Send + 'static,
{
    let gallery = Gallery::load(&mut encoder, &config.gallery_dir)?;

    let (tx, mut rx) = mpsc::channel::<SessionRequest>(16);

    let mut engine = Engine::new(config, open_source, encoder, gallery, sink, log);

    std::thread::Builder::new()
        .name("sentinel-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            loop {
                if engine.is_monitoring() {
                    // Drain pending control requests without blocking.
                    loop {
                        match rx.try_recv() {
                            Ok(req) => engine.handle(req),
                            Err(mpsc::error::TryRecvError::Empty) => break,
                            Err(mpsc::error::TryRecvError::Disconnected) => {
                                engine.shutdown();
                                return;
                            }
                        }
                    }
                    if engine.is_monitoring() {
                        engine.step_frame();
                        std::thread::sleep(engine.config.frame_pause);
                    }
                } else {
                    match rx.blocking_recv() {
                        Some(req) => engine.handle(req),
                        None => {
                            engine.shutdown();
                            return;
                        }
                    }
                }
            }
        })
        .expect("failed to spawn session thread");

    Ok(SessionHandle { tx })
}

struct Engine<S, E, F> {
    config: SessionConfig,
    open_source: F,
    encoder: E,
    gallery: Gallery,
    matcher: EuclideanMatcher,
    sink: Arc<dyn AlertSink>,
    log: Arc<Mutex<EventLog>>,

    // Per-session state, reset on every stop.
    source: Option<S>,
    recorder: Option<VideoRecorder>,
    guard: SightingGuard,
    started_at: Option<Instant>,
    snapshot_armed: bool,
    frame_count: u64,
    consecutive_failures: u32,
}

impl<S, E, F> Engine<S, E, F>
where
    S: FrameSource,
    E: FaceEncoder,
    F: FnMut() -> Result<S, CameraError>,
{
    fn new(
        config: SessionConfig,
        open_source: F,
        encoder: E,
        gallery: Gallery,
        sink: Arc<dyn AlertSink>,
        log: Arc<Mutex<EventLog>>,
    ) -> Self {
        Self {
            config,
            open_source,
            encoder,
            gallery,
            matcher: EuclideanMatcher,
            sink,
            log,
            source: None,
            recorder: None,
            guard: SightingGuard::new(),
            started_at: None,
            snapshot_armed: false,
            frame_count: 0,
            consecutive_failures: 0,
        }
    }

    fn is_monitoring(&self) -> bool {
        self.source.is_some()
    }

    fn handle(&mut self, req: SessionRequest) {
        match req {
            SessionRequest::StartMonitoring { reply } => {
                let _ = reply.send(self.start_monitoring());
            }
            SessionRequest::StopMonitoring { reply } => {
                let _ = reply.send(self.stop_monitoring());
            }
            SessionRequest::StartRecording { reply } => {
                let _ = reply.send(self.start_recording());
            }
            SessionRequest::StopRecording { reply } => {
                let _ = reply.send(self.stop_recording());
            }
            SessionRequest::CaptureSnapshot { reply } => {
                let _ = reply.send(self.capture_snapshot());
            }
            SessionRequest::ReloadGallery { reply } => {
                let _ = reply.send(self.reload_gallery());
            }
            SessionRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn start_monitoring(&mut self) -> Result<(), SessionError> {
        if self.is_monitoring() {
            return Err(SessionError::InvalidState("monitoring already active"));
        }

        let source = (self.open_source)()?;
        let (width, height) = source.resolution();
        self.source = Some(source);
        self.guard.reset();
        self.started_at = Some(Instant::now());
        self.snapshot_armed = false;
        self.frame_count = 0;
        self.consecutive_failures = 0;

        tracing::info!(width, height, "monitoring started");
        Ok(())
    }

    fn stop_monitoring(&mut self) -> Result<(), SessionError> {
        if !self.is_monitoring() {
            return Err(SessionError::InvalidState("monitoring is not active"));
        }
        self.teardown_session();
        tracing::info!("monitoring stopped");
        Ok(())
    }

    /// Release everything tied to the current session. Safe to call from
    /// any state.
    fn teardown_session(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            match recorder.finalize() {
                Ok(path) => tracing::info!(path = %path.display(), "recording finalized"),
                Err(e) => tracing::warn!(error = %e, "recording finalize failed"),
            }
        }
        self.source = None;
        self.guard.reset();
        self.started_at = None;
        self.snapshot_armed = false;
    }

    fn shutdown(&mut self) {
        if self.is_monitoring() {
            self.teardown_session();
        }
        tracing::info!("session thread exiting");
    }

    fn start_recording(&mut self) -> Result<(), SessionError> {
        if self.recorder.is_some() {
            return Err(SessionError::InvalidState("recording already active"));
        }
        let Some(source) = self.source.as_ref() else {
            return Err(SessionError::InvalidState(
                "cannot record while idle; start monitoring first",
            ));
        };

        let (width, height) = source.resolution();
        let recorder = VideoRecorder::create(
            &self.config.video_dir,
            width,
            height,
            self.config.record_fps,
        )?;
        self.recorder = Some(recorder);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<PathBuf, SessionError> {
        match self.recorder.take() {
            Some(recorder) => Ok(recorder.finalize()?),
            None => Err(SessionError::InvalidState("recording is not active")),
        }
    }

    fn capture_snapshot(&mut self) -> Result<(), SessionError> {
        if !self.is_monitoring() {
            return Err(SessionError::InvalidState(
                "no frames to capture while idle",
            ));
        }
        // Consumed by the next frame pass; repeated requests before that
        // pass still produce a single snapshot.
        self.snapshot_armed = true;
        Ok(())
    }

    fn reload_gallery(&mut self) -> Result<usize, SessionError> {
        // The previous gallery stays in effect if the reload fails.
        let gallery = Gallery::load(&mut self.encoder, &self.config.gallery_dir)?;
        tracing::info!(entries = gallery.len(), "gallery reloaded");
        self.gallery = gallery;
        Ok(self.gallery.len())
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            monitoring: self.is_monitoring(),
            recording: self.recorder.is_some(),
            uptime_secs: self
                .started_at
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            gallery_size: self.gallery.len(),
            frames_processed: self.frame_count,
        }
    }

    /// One pass of the monitoring loop: pull a frame, analyze on the
    /// configured cadence, service the snapshot flag and the recorder.
    fn step_frame(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };

        let frame = match source.read_frame() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                frame
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    consecutive = self.consecutive_failures,
                    "frame capture failed"
                );
                if self.consecutive_failures >= self.config.max_capture_failures {
                    tracing::error!(
                        failures = self.consecutive_failures,
                        "capture failure budget exhausted; stopping monitoring"
                    );
                    self.teardown_session();
                }
                return;
            }
        };

        self.frame_count += 1;
        if self.frame_count % u64::from(self.config.detect_interval) == 0 {
            self.analyze_frame(&frame);
        }

        if self.snapshot_armed {
            self.snapshot_armed = false;
            match sentinel_hw::write_snapshot(&frame, &self.config.snapshot_dir) {
                Ok(path) => self.dispatch_attachment("Snapshot captured", path),
                Err(e) => tracing::warn!(error = %e, "snapshot write failed"),
            }
        }

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_frame(&frame) {
                // Drop the frame, keep the recording.
                tracing::warn!(error = %e, "frame not written to recording");
            }
        }
    }

    fn analyze_frame(&mut self, frame: &Frame) {
        let detections = match self
            .encoder
            .encode_faces(&frame.data, frame.width, frame.height)
        {
            Ok(detections) => detections,
            Err(e) => {
                // Analysis failure affects this frame only.
                tracing::warn!(error = %e, "frame analysis failed");
                return;
            }
        };

        for detection in detections {
            let identity = self.matcher.identify(
                &detection.descriptor,
                self.gallery.entries(),
                self.config.tolerance,
            );
            let label = identity.label();

            if !self.guard.should_emit(label, &detection.descriptor) {
                continue;
            }

            let event = DetectionEvent::record(label);
            let alert = event.alert_triggered;
            let timestamp = event.timestamp;

            {
                let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
                if let Err(e) = log.append(event) {
                    tracing::warn!(error = %e, "event not persisted; retained for retry");
                }
            }

            tracing::info!(label, alert, "sighting logged");

            if let Identity::Unknown = identity {
                self.dispatch_alert(format!(
                    "Intruder detected at {}",
                    timestamp.format(crate::event_log::TIMESTAMP_FORMAT)
                ));
            }
        }
    }

    /// Fire-and-forget delivery on a detached thread; the detection path
    /// never waits on the network.
    fn dispatch_alert(&self, message: String) {
        let sink = Arc::clone(&self.sink);
        std::thread::spawn(move || {
            if let Err(e) = sink.notify(&message) {
                tracing::warn!(error = %e, "alert delivery failed");
            }
        });
    }

    fn dispatch_attachment(&self, message: &'static str, artifact: PathBuf) {
        let sink = Arc::clone(&self.sink);
        std::thread::spawn(move || {
            if let Err(e) = sink.notify_with_attachment(message, &artifact) {
                tracing::warn!(error = %e, "artifact notification failed");
            }
        });
    }
}
