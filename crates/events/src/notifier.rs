//! Forwards job outcomes to the downstream orchestrator.
//!
//! [`DownstreamNotifier`] listens on the bus for the events in
//! [`DOWNSTREAM_EVENTS`], POSTs each one to the configured webhook and
//! stamps `production_jobs.notified_at` once delivery succeeds, provided
//! the job is still in the status the event announced. Every status change
//! clears the stamp again. Deliveries run in their own tasks so a slow
//! receiver does not stall the bus.

use renderwatch_core::job_events::{status_for_event, DOWNSTREAM_EVENTS};
use renderwatch_db::repositories::ProductionJobRepo;
use renderwatch_db::DbPool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bus::MonitorEvent;
use crate::delivery::webhook::WebhookDelivery;

pub struct DownstreamNotifier {
    pool: DbPool,
    url: Option<String>,
    delivery: WebhookDelivery,
}

impl DownstreamNotifier {
    /// With `url == None` events are only logged.
    pub fn new(pool: DbPool, url: Option<String>) -> Self {
        Self {
            pool,
            url,
            delivery: WebhookDelivery::new(),
        }
    }

    pub fn with_delivery(mut self, delivery: WebhookDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Whether an event type is forwarded downstream.
    pub fn is_forwarded(event_type: &str) -> bool {
        DOWNSTREAM_EVENTS.contains(&event_type)
    }

    /// Run until the bus closes or `cancel` fires, then wait for
    /// in-flight deliveries.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<MonitorEvent>,
        cancel: CancellationToken,
    ) {
        if self.url.is_none() {
            tracing::info!("NOTIFY_WEBHOOK_URL not set, downstream notifications are log-only");
        }
        let tracker = TaskTracker::new();

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) if Self::is_forwarded(&event.event_type) => {
                    let Some(url) = self.url.clone() else {
                        tracing::info!(
                            event_type = %event.event_type,
                            job_id = ?event.job_id(),
                            "Downstream notification (no receiver configured)",
                        );
                        continue;
                    };
                    let pool = self.pool.clone();
                    let delivery = self.delivery.clone();
                    tracker.spawn(async move {
                        Self::notify(&pool, &delivery, &url, &event).await;
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Downstream notifier lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("Downstream notifier stopped");
    }

    async fn notify(pool: &DbPool, delivery: &WebhookDelivery, url: &str, event: &MonitorEvent) {
        if let Err(e) = delivery.deliver(url, event).await {
            tracing::error!(
                event_type = %event.event_type,
                job_id = ?event.job_id(),
                error = %e,
                "Downstream notification failed",
            );
            return;
        }

        let (Some(job_id), Some(status)) = (event.job_id(), status_for_event(&event.event_type))
        else {
            return;
        };
        match ProductionJobRepo::mark_notified(pool, job_id, status).await {
            Ok(true) => {
                tracing::debug!(job_id, event_type = %event.event_type, "Downstream notified");
            }
            Ok(false) => {
                tracing::debug!(
                    job_id,
                    event_type = %event.event_type,
                    "Job moved on before acknowledgement, notified_at left unset",
                );
            }
            Err(e) => tracing::error!(job_id, error = %e, "Failed to stamp notified_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_outcomes_only() {
        assert!(DownstreamNotifier::is_forwarded("job.completed"));
        assert!(DownstreamNotifier::is_forwarded("job.retry_scheduled"));
        assert!(!DownstreamNotifier::is_forwarded("job.resubmitted"));
        assert!(!DownstreamNotifier::is_forwarded("job.cancelled"));
    }
}
