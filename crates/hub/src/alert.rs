//! Alert sinks.  Delivery is best-effort: a failed alert is logged by the
//! caller and never aborts a cycle.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::ports::Notifier;
use crate::state::SharedState;

/// Logs the alert and records it in the status event buffer.
pub struct LogNotifier {
    shared: SharedState,
}

impl LogNotifier {
    pub fn new(shared: SharedState) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        warn!(alert = %message, "alert");
        self.shared.write().await.record_alert(message.to_string());
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    text: &'a str,
}

/// POSTs `{"text": message}` to a chat/incident webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookBody { text: message })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned {status}");
        }
        Ok(())
    }
}

/// Delivers to every sink; fails if any sink failed, after trying them all.
pub struct FanOutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanOutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Notifier for FanOutNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(message).await {
                failures.push(format!("{e:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} of {} alert sink(s) failed: {}",
                failures.len(),
                self.sinks.len(),
                failures.join("; ")
            )
        }
    }
}
