//! Outbound webhook POSTs for monitor events.
//!
//! Each delivery makes one attempt plus one retry per configured delay
//! (1 s, 2 s and 4 s by default).

use std::time::Duration;

use chrono::{DateTime, Utc};
use renderwatch_core::types::DbId;
use serde::Serialize;

use crate::bus::MonitorEvent;

const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Per-attempt HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Network, DNS or timeout failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The receiver answered with a non-2xx status.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// JSON body POSTed to the receiver.
#[derive(Debug, Serialize)]
pub struct WebhookBody<'a> {
    pub event_type: &'a str,
    pub payload: &'a serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source_entity_type: Option<&'a str>,
    pub source_entity_id: Option<DbId>,
}

impl<'a> From<&'a MonitorEvent> for WebhookBody<'a> {
    fn from(event: &'a MonitorEvent) -> Self {
        Self {
            event_type: &event.event_type,
            payload: &event.payload,
            timestamp: event.timestamp,
            source_entity_type: event.source_entity_type.as_deref(),
            source_entity_id: event.source_entity_id,
        }
    }
}

#[derive(Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    retry_delays: Vec<Duration>,
}

impl WebhookDelivery {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }

    /// Replace the retry schedule. An empty schedule means a single attempt.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// POST `event` to `url`, stopping at the first 2xx.
    ///
    /// Returns the last attempt's error once the schedule is exhausted.
    pub async fn deliver(&self, url: &str, event: &MonitorEvent) -> Result<(), WebhookError> {
        let body = WebhookBody::from(event);
        let mut waits = self.retry_delays.iter();
        let mut attempt = 1u32;

        loop {
            let err = match self.post(url, &body).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let Some(wait) = waits.next() else {
                tracing::error!(
                    url,
                    attempt,
                    event_type = %event.event_type,
                    error = %err,
                    "Webhook delivery gave up",
                );
                return Err(err);
            };
            tracing::warn!(
                url,
                attempt,
                event_type = %event.event_type,
                error = %err,
                "Webhook delivery failed, retrying",
            );
            tokio::time::sleep(*wait).await;
            attempt += 1;
        }
    }

    async fn post(&self, url: &str, body: &WebhookBody<'_>) -> Result<(), WebhookError> {
        let status = self.client.post(url).json(body).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::HttpStatus(status.as_u16()))
        }
    }
}

impl Default for WebhookDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast() -> WebhookDelivery {
        WebhookDelivery::new().with_retry_delays(vec![Duration::from_millis(10); 3])
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn body_carries_source() {
        let event = MonitorEvent::for_job("job.failed", 9);
        let body = serde_json::to_value(WebhookBody::from(&event)).unwrap();
        assert_eq!(body["event_type"], "job.failed");
        assert_eq!(body["source_entity_id"], 9);
        assert_eq!(body["source_entity_type"], "production_job");
    }

    #[tokio::test]
    async fn delivers_on_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({"event_type": "job.completed"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        fast()
            .deliver(&url, &MonitorEvent::for_job("job.completed", 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_four_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let err = fast()
            .deliver(&server.uri(), &MonitorEvent::new("job.failed"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::HttpStatus(500)));
    }
}
