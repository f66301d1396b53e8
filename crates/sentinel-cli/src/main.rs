use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sentinel", about = "Sentinel monitoring daemon CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a monitoring session
    Start,
    /// Stop the monitoring session
    Stop,
    /// Start recording the live feed
    RecordStart,
    /// Stop recording and print the video path
    RecordStop,
    /// Capture a snapshot from the live feed
    Snapshot,
    /// Re-read the enrollment directory
    ReloadGallery,
    /// Send a test message through the alert channel
    TestNotify,
    /// Show daemon status
    Status,
    /// Show today's detection counts
    Today,
    /// Show the most recent detection events
    Tail {
        /// Number of events to show
        #[arg(short, default_value_t = 10)]
        n: u32,
    },
    /// Show the timestamp of the most recent alert
    LastAlert,
    /// List local V4L2 capture devices (bypasses the daemon)
    Devices,
}

// `#[zbus::proxy]` generates `MonitorProxy` (async) from this trait.
#[zbus::proxy(
    interface = "org.sentinel.Monitor1",
    default_service = "org.sentinel.Monitor1",
    default_path = "/org/sentinel/Monitor1"
)]
trait Monitor {
    async fn start_monitoring(&self) -> zbus::Result<()>;
    async fn stop_monitoring(&self) -> zbus::Result<()>;
    async fn start_recording(&self) -> zbus::Result<()>;
    async fn stop_recording(&self) -> zbus::Result<String>;
    async fn capture_snapshot(&self) -> zbus::Result<()>;
    async fn reload_gallery(&self) -> zbus::Result<u32>;
    async fn test_notify(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn query_today(&self) -> zbus::Result<String>;
    async fn tail(&self, n: u32) -> zbus::Result<String>;
    async fn last_alert(&self) -> zbus::Result<String>;
}

fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Local diagnostics: no daemon required.
    if let Commands::Devices = cli.command {
        let devices = sentinel_hw::Camera::list_devices();
        if devices.is_empty() {
            println!("No V4L2 capture devices found");
        }
        for dev in devices {
            println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
        }
        return Ok(());
    }

    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = MonitorProxy::new(&connection)
        .await
        .context("is sentineld running?")?;

    match cli.command {
        Commands::Start => {
            proxy.start_monitoring().await?;
            println!("Monitoring started");
        }
        Commands::Stop => {
            proxy.stop_monitoring().await?;
            println!("Monitoring stopped");
        }
        Commands::RecordStart => {
            proxy.start_recording().await?;
            println!("Recording started");
        }
        Commands::RecordStop => {
            let path = proxy.stop_recording().await?;
            println!("Recording saved: {path}");
        }
        Commands::Snapshot => {
            proxy.capture_snapshot().await?;
            println!("Snapshot requested");
        }
        Commands::ReloadGallery => {
            let size = proxy.reload_gallery().await?;
            println!("Gallery reloaded: {size} enrolled");
        }
        Commands::TestNotify => {
            proxy.test_notify().await?;
            println!("Test notification sent");
        }
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?));
        }
        Commands::Today => {
            println!("{}", pretty(&proxy.query_today().await?));
        }
        Commands::Tail { n } => {
            println!("{}", pretty(&proxy.tail(n).await?));
        }
        Commands::LastAlert => {
            let ts = proxy.last_alert().await?;
            if ts.is_empty() {
                println!("No alerts recorded");
            } else {
                println!("{ts}");
            }
        }
        Commands::Devices => unreachable!("handled before bus connection"),
    }

    Ok(())
}
