use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use sentinel_core::{FaceDetector, FaceEmbedder, OnnxFaceEncoder};
use sentinel_hw::Camera;

mod alert;
mod config;
mod dbus_interface;
mod event_log;
mod session;

use alert::{AlertSink, CallMeBotSink, NullSink};
use config::Config;
use dbus_interface::MonitorService;
use event_log::EventLog;
use session::{spawn_session, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("sentineld starting");

    let config = Config::from_env();

    let log = EventLog::open(&config.log_path)
        .with_context(|| format!("failed to open detection log at {}", config.log_path.display()))?;
    let log = Arc::new(Mutex::new(log));

    let detector = FaceDetector::load_with_downsample(&config.detector_model_path(), config.downsample)
        .context("failed to load face detection model")?;
    tracing::info!(path = %config.detector_model_path(), "detector loaded");

    let embedder = FaceEmbedder::load(&config.embedder_model_path())
        .context("failed to load face embedding model")?;
    tracing::info!(path = %config.embedder_model_path(), "embedder loaded");

    let encoder = OnnxFaceEncoder::new(detector, embedder);

    let sink: Arc<dyn AlertSink> = match (&config.callmebot_phone, &config.callmebot_apikey) {
        (Some(phone), Some(key)) => {
            tracing::info!(phone = %phone, "CallMeBot alerts enabled");
            Arc::new(CallMeBotSink::new(phone.clone(), key.clone()))
        }
        _ => {
            tracing::warn!("SENTINEL_CALLMEBOT_PHONE/APIKEY not set; alerts log-only");
            Arc::new(NullSink)
        }
    };

    let session_config = SessionConfig {
        gallery_dir: config.gallery_dir.clone(),
        snapshot_dir: config.snapshot_dir.clone(),
        video_dir: config.video_dir.clone(),
        tolerance: config.tolerance,
        detect_interval: config.detect_interval,
        record_fps: config.record_fps,
        max_capture_failures: config.max_capture_failures,
        frame_pause: SessionConfig::frame_pause_default(),
    };

    let device = config.camera_device.clone();
    let read_timeout = config.read_timeout;
    let session = spawn_session(
        session_config,
        move || Camera::open(&device, read_timeout),
        encoder,
        Arc::clone(&sink),
        Arc::clone(&log),
    )
    .context("failed to start session engine")?;

    let service = MonitorService::new(session, Arc::clone(&log), Arc::clone(&sink));

    let _connection = zbus::connection::Builder::session()?
        .name("org.sentinel.Monitor1")?
        .serve_at("/org/sentinel/Monitor1", service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!("sentineld ready on org.sentinel.Monitor1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("sentineld shutting down");

    Ok(())
}
