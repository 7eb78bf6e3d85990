//! Writes every bus event to the `events` table.

use renderwatch_db::repositories::EventRepo;
use renderwatch_db::DbPool;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::bus::MonitorEvent;

/// Durable log consumer for the [`EventBus`](crate::bus::EventBus).
pub struct EventPersistence;

impl EventPersistence {
    /// Record events until the bus closes or `cancel` fires.
    ///
    /// Returns how many events were stored. Insert failures are logged and
    /// skipped; a lagging receiver loses the overwritten events.
    pub async fn run(
        pool: DbPool,
        mut receiver: broadcast::Receiver<MonitorEvent>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut stored = 0u64;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Event log fell behind the bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if Self::record(&pool, &event).await {
                stored += 1;
            }
        }
        tracing::info!(stored, "Event log writer stopped");
        stored
    }

    async fn record(pool: &DbPool, event: &MonitorEvent) -> bool {
        let inserted = EventRepo::insert(
            pool,
            &event.event_type,
            event.source_entity_type.as_deref(),
            event.source_entity_id,
            &event.payload,
        )
        .await;
        match inserted {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    event_type = %event.event_type,
                    job_id = ?event.job_id(),
                    "Failed to write event log row",
                );
                false
            }
        }
    }
}
