use std::sync::{Arc, Mutex};
use zbus::interface;

use crate::alert::AlertSink;
use crate::event_log::EventLog;
use crate::session::{SessionError, SessionHandle};

/// D-Bus interface for the Sentinel monitoring daemon.
///
/// Bus name: org.sentinel.Monitor1
/// Object path: /org/sentinel/Monitor1
pub struct MonitorService {
    session: SessionHandle,
    log: Arc<Mutex<EventLog>>,
    sink: Arc<dyn AlertSink>,
}

impl MonitorService {
    pub fn new(
        session: SessionHandle,
        log: Arc<Mutex<EventLog>>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self { session, log, sink }
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, EventLog> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn to_fdo(e: SessionError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.sentinel.Monitor1")]
impl MonitorService {
    /// Begin a monitoring session: open the camera and start classifying.
    async fn start_monitoring(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_monitoring requested");
        self.session.start_monitoring().await.map_err(to_fdo)
    }

    /// End the monitoring session, finalizing any active recording.
    async fn stop_monitoring(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_monitoring requested");
        self.session.stop_monitoring().await.map_err(to_fdo)
    }

    /// Start recording the live feed. Requires an active session.
    async fn start_recording(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_recording requested");
        self.session.start_recording().await.map_err(to_fdo)
    }

    /// Stop recording and return the finalized video path.
    async fn stop_recording(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop_recording requested");
        let path = self.session.stop_recording().await.map_err(to_fdo)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Write the next captured frame to the snapshot directory.
    async fn capture_snapshot(&self) -> zbus::fdo::Result<()> {
        tracing::info!("capture_snapshot requested");
        self.session.capture_snapshot().await.map_err(to_fdo)
    }

    /// Re-read the enrollment directory; returns the new gallery size.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("reload_gallery requested");
        let size = self.session.reload_gallery().await.map_err(to_fdo)?;
        Ok(size as u32)
    }

    /// Send a test message through the configured alert channel.
    async fn test_notify(&self) -> zbus::fdo::Result<()> {
        tracing::info!("test_notify requested");
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.notify("Alert test"))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let session = self.session.status().await.map_err(to_fdo)?;
        let (events_total, last_alert) = {
            let log = self.lock_log();
            (
                log.len(),
                log.last_alert_time()
                    .map(|t| t.format(crate::event_log::TIMESTAMP_FORMAT).to_string()),
            )
        };

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "monitoring": session.monitoring,
            "recording": session.recording,
            "uptime_secs": session.uptime_secs,
            "gallery_size": session.gallery_size,
            "frames_processed": session.frames_processed,
            "events_total": events_total,
            "last_alert": last_alert,
        })
        .to_string())
    }

    /// Today's detection counts as JSON: total sightings and intrusions.
    async fn query_today(&self) -> zbus::fdo::Result<String> {
        let stats = self.lock_log().query_today();
        serde_json::to_string(&stats).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// The last `n` detection events as a JSON array, oldest first.
    async fn tail(&self, n: u32) -> zbus::fdo::Result<String> {
        let events = self.lock_log().tail(n as usize);
        serde_json::to_string(&events).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Timestamp of the most recent alert, or the empty string.
    async fn last_alert(&self) -> zbus::fdo::Result<String> {
        Ok(self
            .lock_log()
            .last_alert_time()
            .map(|t| t.format(crate::event_log::TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default())
    }
}
