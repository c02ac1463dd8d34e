use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ConnectorError;

/// Message produced by a NOTIFICATION rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub recipients: Vec<String>,
    pub message: String,
    /// Entities whose metrics met the rule's conditions.
    pub entity_ids: Vec<String>,
    pub triggered_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification) -> Result<(), ConnectorError>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ConnectorError> {
        info!(
            rule_id = %notification.rule_id,
            recipients = ?notification.recipients,
            entities = ?notification.entity_ids,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a delivery webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConnectorError::Connect(err.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ConnectorError> {
        let response = self.http.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(ConnectorError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

/// Keeps delivered notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ConnectorError> {
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> Notification {
        Notification {
            rule_id: Uuid::nil(),
            rule_name: "Low CTR alert".into(),
            recipients: vec!["ops@example.com".into()],
            message: "2 campaigns below 1% CTR".into(),
            entity_ids: vec!["c-1".into(), "c-2".into()],
            triggered_at: "2026-03-01T09:30:00Z".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn webhook_receives_the_notification_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deliver"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "rule_id": "00000000-0000-0000-0000-000000000000",
                "rule_name": "Low CTR alert",
                "recipients": ["ops@example.com"],
                "message": "2 campaigns below 1% CTR",
                "entity_ids": ["c-1", "c-2"],
                "triggered_at": "2026-03-01T09:30:00Z",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/deliver", server.uri()), Duration::from_secs(2)).unwrap();
        notifier.notify(&notification()).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_delivery_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unknown recipient"))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = notifier.notify(&notification()).await.unwrap_err();
        assert_eq!(
            err,
            ConnectorError::Status {
                status: 422,
                body: "unknown recipient".into(),
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn slow_webhook_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_millis(50)).unwrap();
        let err = notifier.notify(&notification()).await.unwrap_err();
        assert_eq!(err, ConnectorError::Timeout);
        assert!(err.is_transient());
    }
}
