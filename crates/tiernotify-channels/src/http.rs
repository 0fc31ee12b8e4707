//! HTTP notification-center channel: POSTs one templated message per call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tiernotify_core::config::DeliveryConfig;
use tiernotify_core::traits::DeliveryChannel;
use tiernotify_core::types::TemplateId;
use tiernotify_core::{Result, TierNotifyError};

/// Endpoint, credentials, and per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpDeliveryConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl From<&DeliveryConfig> for HttpDeliveryConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Request body accepted by the notification center.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    email: [&'a str; 1],
    template: &'a str,
    data: &'a Value,
}

pub struct HttpDeliveryChannel {
    config: HttpDeliveryConfig,
    client: reqwest::Client,
}

impl HttpDeliveryChannel {
    pub fn new(config: HttpDeliveryConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn payload(address: &str, template: &TemplateId, data: &Value) -> Result<Value> {
        let body = SendRequest {
            email: [address],
            template: template.as_str(),
            data,
        };
        Ok(serde_json::to_value(body)?)
    }
}

#[async_trait]
impl DeliveryChannel for HttpDeliveryChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn send_templated(&self, address: &str, template: &TemplateId, data: &Value) -> Result<()> {
        let body = Self::payload(address, template, data)?;
        let mut req = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .timeout(self.config.timeout);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TierNotifyError::Http(format!("notification center request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(template = %template, recipient = address, %status, "delivery accepted");
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(TierNotifyError::delivery(format!(
                "notification center returned {status}: {text}"
            )))
        }
    }
}
