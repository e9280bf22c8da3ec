use async_trait::async_trait;
use tracing::warn;

/// Delivery of human-readable failure/status messages.
///
/// Delivery is best effort by contract: a sink must never propagate its own
/// failures into the backup pipeline.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Sink used when no notification target is configured.
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn notify(&self, _message: &str) {}
}

/// Posts messages as JSON to a configured webhook endpoint.
///
/// An empty URL disables sending entirely. Transport and HTTP errors are
/// logged and swallowed, never retried.
pub struct WebhookNotifier {
    url: String,
    subject: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, subject: &str) -> Self {
        Self {
            url: url.to_string(),
            subject: subject.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, message: &str) {
        if self.url.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "subject": self.subject,
            "message": message,
        });

        match self.http.post(&self.url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "Notification delivery failed: HTTP {} from {}",
                    response.status(),
                    self.url
                );
            }
            Ok(_) => {}
            Err(err) => warn!("Notification delivery failed: {}", err),
        }
    }
}

#[cfg(feature = "mock")]
pub use recording::RecordingNotifier;

#[cfg(feature = "mock")]
mod recording {
    use super::NotificationSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Captures every message for assertions in tests.
    #[derive(Default)]
    pub struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_captures_messages() {
        let sink = RecordingNotifier::new();
        sink.notify("first").await;
        sink.notify("second").await;

        assert_eq!(sink.messages(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn empty_webhook_url_disables_sending() {
        // must return without attempting any request
        let sink = WebhookNotifier::new("", "VM Backup");
        sink.notify("ignored").await;
    }
}
