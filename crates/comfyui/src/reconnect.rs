//! Backoff policy for re-establishing the ComfyUI WebSocket.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Geometric backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub ceiling: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 1s, 2s, 4s ... capped at 30s.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Endless sequence of waits, starting at `first`.
    pub fn delays(&self) -> Delays {
        Delays {
            upcoming: self.first.min(self.ceiling),
            policy: self.clone(),
        }
    }
}

/// Iterator returned by [`BackoffPolicy::delays`].
#[derive(Debug, Clone)]
pub struct Delays {
    upcoming: Duration,
    policy: BackoffPolicy,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.upcoming;
        self.upcoming = current.mul_f64(self.policy.factor).min(self.policy.ceiling);
        Some(current)
    }
}

/// Backoff carried across sessions.
///
/// A socket that closes before `ceiling` has elapsed counts as a failed
/// attempt and the next reconnect waits; a session that lasted longer
/// resets the sequence.
#[derive(Debug, Clone)]
pub struct SessionBackoff {
    policy: BackoffPolicy,
    delays: Delays,
}

impl SessionBackoff {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            policy: policy.clone(),
            delays: policy.delays(),
        }
    }

    /// How long to wait before reconnecting after a session of `uptime`.
    pub fn after_session(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.policy.ceiling {
            self.delays = self.policy.delays();
            return Duration::ZERO;
        }
        self.delays.next().unwrap_or(self.policy.ceiling)
    }
}

/// Connect, retrying with backoff until a socket opens.
///
/// The first attempt is immediate. Returns `None` once `cancel` fires.
pub async fn connect_with_backoff(
    client: &ComfyUIClient,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    let mut delays = policy.delays();

    for attempt in 1u32.. {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return None,
            outcome = client.connect() => outcome,
        };
        let wait = delays.next().unwrap_or(policy.ceiling);

        match outcome {
            Ok(conn) => {
                if attempt > 1 {
                    tracing::info!(ws_url = %client.ws_url(), attempt, "ComfyUI socket restored");
                }
                return Some(conn);
            }
            Err(e) => tracing::warn!(
                ws_url = %client.ws_url(),
                attempt,
                retry_in_ms = wait.as_millis() as u64,
                error = %e,
                "ComfyUI socket unavailable",
            ),
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_client() -> ComfyUIClient {
        ComfyUIClient::new("ws://127.0.0.1:1".into(), "test-client".into())
    }

    #[test]
    fn default_delays_double_then_hold_at_ceiling() {
        let secs: Vec<u64> = BackoffPolicy::default()
            .delays()
            .take(8)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn first_delay_is_clamped_to_ceiling() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(90),
            ceiling: Duration::from_secs(10),
            factor: 3.0,
        };
        assert_eq!(policy.delays().next(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn factor_three_grows_faster() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(2),
            ceiling: Duration::from_secs(60),
            factor: 3.0,
        };
        let secs: Vec<u64> = policy.delays().take(4).map(|d| d.as_secs()).collect();
        assert_eq!(secs, [2, 6, 18, 54]);
    }

    #[test]
    fn short_sessions_back_off() {
        let mut backoff = SessionBackoff::new(&BackoffPolicy::default());
        let waits: Vec<u64> = (0..3)
            .map(|_| backoff.after_session(Duration::from_millis(5)).as_secs())
            .collect();
        assert_eq!(waits, [1, 2, 4]);
    }

    #[test]
    fn long_session_resets_backoff() {
        let mut backoff = SessionBackoff::new(&BackoffPolicy::default());
        backoff.after_session(Duration::ZERO);
        backoff.after_session(Duration::ZERO);

        assert_eq!(backoff.after_session(Duration::from_secs(600)), Duration::ZERO);
        assert_eq!(backoff.after_session(Duration::ZERO), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn already_cancelled_gives_up_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let conn =
            connect_with_backoff(&unreachable_client(), &BackoffPolicy::default(), &cancel).await;
        assert!(conn.is_none());
    }

    #[tokio::test]
    async fn cancel_while_waiting_between_attempts() {
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy {
            first: Duration::from_secs(60),
            ..Default::default()
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let conn = tokio::time::timeout(
            Duration::from_secs(5),
            connect_with_backoff(&unreachable_client(), &policy, &cancel),
        )
        .await
        .expect("backoff wait should observe cancellation");
        assert!(conn.is_none());
    }
}
