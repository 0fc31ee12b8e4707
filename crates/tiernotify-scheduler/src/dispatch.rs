//! Notification dispatch: sends one templated message per recipient through
//! the delivery channel, or only logs it in dry-run mode.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tiernotify_core::traits::DeliveryChannel;
use tiernotify_core::types::{TemplateId, TenantId};

use crate::deadline::bounded;
use crate::recipients::Recipient;

/// What is being sent, for logging.
#[derive(Debug, Clone, Copy)]
pub struct SendContext<'a> {
    pub tenant: &'a TenantId,
    pub notification: &'a str,
}

pub struct Dispatcher {
    channel: Arc<dyn DeliveryChannel>,
    dry_run: bool,
    io_timeout: Duration,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn DeliveryChannel>, dry_run: bool, io_timeout: Duration) -> Self {
        Self {
            channel,
            dry_run,
            io_timeout,
        }
    }

    /// Send to every recipient, returning how many succeeded. Dry-run sends
    /// count as successes. A failed recipient never stops the others.
    pub async fn send(
        &self,
        ctx: SendContext<'_>,
        recipients: &[Recipient],
        template: &TemplateId,
        data: &Map<String, Value>,
    ) -> usize {
        let mut sent = 0;
        for recipient in recipients {
            let mut payload = data.clone();
            payload.insert("name".into(), Value::String(recipient.first_name.clone()));
            let payload = Value::Object(payload);

            if self.dry_run {
                tracing::info!(
                    tenant = %ctx.tenant,
                    notification = ctx.notification,
                    template = %template,
                    recipient = %recipient.email,
                    dry_run = true,
                    data = %payload,
                    "would send notification"
                );
                sent += 1;
                continue;
            }

            let result = bounded(
                "delivery",
                self.io_timeout,
                self.channel.send_templated(&recipient.email, template, &payload),
            )
            .await;
            match result {
                Ok(()) => {
                    tracing::debug!(
                        tenant = %ctx.tenant,
                        notification = ctx.notification,
                        template = %template,
                        recipient = %recipient.email,
                        channel = self.channel.name(),
                        "notification sent"
                    );
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        tenant = %ctx.tenant,
                        notification = ctx.notification,
                        recipient = %recipient.email,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        }
        sent
    }
}
