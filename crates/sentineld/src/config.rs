use std::path::PathBuf;
use std::time::Duration;

use sentinel_core::DEFAULT_TOLERANCE;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of enrollment portraits, one image per person.
    pub gallery_dir: PathBuf,
    /// Path to the detection log file.
    pub log_path: PathBuf,
    /// Directory snapshot JPEGs are written to.
    pub snapshot_dir: PathBuf,
    /// Directory session recordings are written to.
    pub video_dir: PathBuf,
    /// Euclidean distance below which a face matches a gallery entry.
    pub tolerance: f32,
    /// Run detection every Nth frame (intermediate frames only feed
    /// recording and snapshots).
    pub detect_interval: u32,
    /// Integer factor frames are shrunk by before detection.
    pub downsample: u32,
    /// Frame rate stamped into session recordings.
    pub record_fps: u32,
    /// How long a single frame read may block before it times out.
    pub read_timeout: Duration,
    /// Consecutive capture failures tolerated before monitoring stops.
    pub max_capture_failures: u32,
    /// WhatsApp number for CallMeBot alerts; alerts are disabled when unset.
    pub callmebot_phone: Option<String>,
    /// CallMeBot API key for the configured number.
    pub callmebot_apikey: Option<String>,
}

impl Config {
    /// Load configuration from `SENTINEL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("SENTINEL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_dir());

        Self {
            camera_device: std::env::var("SENTINEL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            gallery_dir: env_path("SENTINEL_GALLERY_DIR", "known_faces"),
            log_path: env_path("SENTINEL_LOG_PATH", "detections.csv"),
            snapshot_dir: env_path("SENTINEL_SNAPSHOT_DIR", "snapshots"),
            video_dir: env_path("SENTINEL_VIDEO_DIR", "video_records"),
            tolerance: env_f32("SENTINEL_TOLERANCE", DEFAULT_TOLERANCE),
            detect_interval: env_u32("SENTINEL_DETECT_INTERVAL", 5).max(1),
            downsample: env_u32("SENTINEL_DOWNSAMPLE", sentinel_core::DEFAULT_DOWNSAMPLE).max(1),
            record_fps: env_u32("SENTINEL_RECORD_FPS", 20).max(1),
            read_timeout: Duration::from_millis(env_u64("SENTINEL_READ_TIMEOUT_MS", 2000)),
            max_capture_failures: env_u32("SENTINEL_MAX_CAPTURE_FAILURES", 10).max(1),
            callmebot_phone: env_nonempty("SENTINEL_CALLMEBOT_PHONE"),
            callmebot_apikey: env_nonempty("SENTINEL_CALLMEBOT_APIKEY"),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn default_model_dir() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("sentinel/models")
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
