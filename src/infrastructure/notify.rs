//! Outbound messaging: customer email requests and domain events.
//!
//! Emails are rendered and delivered by a separate mailer that listens on
//! `notifications.email`. Domain events go to `storefront.events.<aggregate>.<type>`.

use async_trait::async_trait;
use tracing::info;

use crate::application::ports::{EventPublisher, Notification, Notifier};
use crate::domain::events::DomainEvent;
use crate::{EcommerceError, Result};

pub const EMAIL_SUBJECT: &str = "notifications.email";
pub const EVENT_SUBJECT_PREFIX: &str = "storefront.events";

pub fn event_subject(event: &DomainEvent) -> Result<String> {
    let value = serde_json::to_value(event)?;
    let aggregate = value["aggregate"].as_str().unwrap_or("unknown");
    let kind = value["type"].as_str().unwrap_or("unknown");
    Ok(format!("{EVENT_SUBJECT_PREFIX}.{aggregate}.{kind}"))
}

#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }

    async fn publish_json<T: serde::Serialize + Sync>(&self, subject: String, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        self.client.publish(subject, payload.into()).await
            .map_err(|e| EcommerceError::Messaging(e.to_string()))
    }
}

#[async_trait]
impl Notifier for NatsBus {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.publish_json(EMAIL_SUBJECT.to_string(), notification).await
    }
}

#[async_trait]
impl EventPublisher for NatsBus {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.publish_json(event_subject(event)?, event).await
    }
}

/// Used when no broker is configured: everything lands in the log.
#[derive(Clone, Default)]
pub struct LogBus;

#[async_trait]
impl Notifier for LogBus {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(template = ?notification.template, to = %notification.to, order_id = %notification.order_id, "email not sent, no broker");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for LogBus {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        info!(subject = %event_subject(event)?, "domain event");
        Ok(())
    }
}
