//! Event bus and downstream notification for job lifecycle changes.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`MonitorEvent`]: the event envelope.
//! - [`EventPersistence`]: background service that writes every event to
//!   the `events` table.
//! - [`WebhookDelivery`]: HTTP POST delivery with retry.
//! - [`DownstreamNotifier`]: forwards terminal and retry events to the
//!   orchestrator and stamps `notified_at`.

pub mod bus;
pub mod delivery;
pub mod notifier;
pub mod persistence;

pub use bus::{EventBus, MonitorEvent};
pub use delivery::webhook::{WebhookDelivery, WebhookError};
pub use notifier::DownstreamNotifier;
pub use persistence::EventPersistence;
