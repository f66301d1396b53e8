//! Outbound alert delivery.
//!
//! Alerts are best-effort: the pipeline dispatches them from a detached
//! thread and delivery failure is logged, never propagated back into the
//! detection path.

use std::path::Path;
use thiserror::Error;

const CALLMEBOT_ENDPOINT: &str = "https://api.callmebot.com/whatsapp.php";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("unexpected response status: {0}")]
    Status(u16),
    #[error("attachment unreadable: {0}")]
    Attachment(#[from] std::io::Error),
}

/// Destination for intrusion alerts and capture notices.
pub trait AlertSink: Send + Sync {
    fn notify(&self, message: &str) -> Result<(), SinkError>;

    /// Deliver `message` together with a captured artifact. Sinks that
    /// cannot carry attachments fall back to referencing it by name.
    fn notify_with_attachment(&self, message: &str, artifact: &Path) -> Result<(), SinkError> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.display().to_string());
        self.notify(&format!("{message} ({name})"))
    }
}

/// WhatsApp alerts via the CallMeBot relay.
pub struct CallMeBotSink {
    phone: String,
    api_key: String,
}

impl CallMeBotSink {
    pub fn new(phone: String, api_key: String) -> Self {
        Self { phone, api_key }
    }

    fn message_url(&self, message: &str) -> String {
        format!(
            "{CALLMEBOT_ENDPOINT}?phone={}&text={}&apikey={}",
            percent_encode(&self.phone),
            percent_encode(message),
            percent_encode(&self.api_key),
        )
    }
}

impl AlertSink for CallMeBotSink {
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        let response = ureq::get(&self.message_url(message))
            .call()
            .map_err(|e| SinkError::Http(e.to_string()))?;

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(SinkError::Status(status));
        }
        tracing::info!(phone = %self.phone, "alert delivered");
        Ok(())
    }
}

/// Sink used when no alert channel is configured. Every notification is
/// logged locally and reported as delivered.
pub struct NullSink;

impl AlertSink for NullSink {
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        tracing::info!(message, "alert channel not configured; logging only");
        Ok(())
    }
}

/// Query-string percent encoding, RFC 3986 unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode_passes_unreserved() {
        assert_eq!(percent_encode("abcXYZ019-_.~"), "abcXYZ019-_.~");
    }

    #[test]
    fn test_percent_encode_escapes_specials() {
        assert_eq!(
            percent_encode("Intruder detected at 09:15"),
            "Intruder%20detected%20at%2009%3A15"
        );
        assert_eq!(percent_encode("+491701234567"), "%2B491701234567");
    }

    #[test]
    fn test_message_url_shape() {
        let sink = CallMeBotSink::new("491701234567".into(), "abc123".into());
        let url = sink.message_url("hello world");
        assert_eq!(
            url,
            "https://api.callmebot.com/whatsapp.php?phone=491701234567&text=hello%20world&apikey=abc123"
        );
    }

    #[test]
    fn test_null_sink_always_delivers() {
        let sink = NullSink;
        assert!(sink.notify("anything").is_ok());
        assert!(sink
            .notify_with_attachment("snap", Path::new("/tmp/x.jpg"))
            .is_ok());
    }
}
