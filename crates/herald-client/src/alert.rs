use std::time::Duration;

use herald_core::alert::Alert;
use herald_core::error::AppError;
use herald_core::traits::{AlertSink, TracingAlertSink};
use reqwest::Client;

/// Posts each alert as JSON to a webhook (Slack-compatible `text` included).
#[derive(Clone)]
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl AlertSink for WebhookAlertSink {
    async fn raise_alert(&self, alert: &Alert) -> Result<(), AppError> {
        let payload = serde_json::json!({
            "text": format!(
                "[herald] {} {}: {}",
                alert.severity, alert.category, alert.context.message
            ),
            "alert": alert,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(10)
                } else {
                    AppError::NetworkError(format!("Alert webhook unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        tracing::debug!(category = %alert.category, "Alert delivered to webhook");
        Ok(())
    }
}

/// Where a binary sends alerts: the webhook when
/// `HERALD_ALERT_WEBHOOK_URL` is set, the log otherwise.
#[derive(Clone)]
pub enum AlertTarget {
    Webhook(WebhookAlertSink),
    Log(TracingAlertSink),
}

impl AlertTarget {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        match lookup("HERALD_ALERT_WEBHOOK_URL") {
            Some(url) if !url.trim().is_empty() => {
                Ok(Self::Webhook(WebhookAlertSink::new(url.trim())?))
            }
            _ => Ok(Self::Log(TracingAlertSink)),
        }
    }
}

impl AlertSink for AlertTarget {
    async fn raise_alert(&self, alert: &Alert) -> Result<(), AppError> {
        match self {
            AlertTarget::Webhook(sink) => sink.raise_alert(alert).await,
            AlertTarget::Log(sink) => sink.raise_alert(alert).await,
        }
    }
}
