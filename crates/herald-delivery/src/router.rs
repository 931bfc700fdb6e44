//! Delivery Router: real-time push or persisted-only.
//!
//! Presence is read at routing time, never cached from request start.
//! Any state other than `online` means "cannot receive live push": the
//! message stays `sent` for backlog pickup and the push-notification
//! collaborator is signalled. This one rule removes the race between
//! backlog replay and live delivery.

use std::sync::Arc;
use std::time::Duration;

use herald_presence::PresenceDirectory;
use herald_types::{Message, MessageStatus, PresenceState, DEFAULT_PUSH_ACK_TIMEOUT_MS};

use crate::push::{LivePush, PushNotifier, PushOutcome};
use crate::MessageLog;

/// Router tuning.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Bounded wait for a live-push acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(DEFAULT_PUSH_ACK_TIMEOUT_MS),
        }
    }
}

/// Why a message was left for backlog pickup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistReason {
    /// The recipient is offline or still syncing.
    NotOnline(PresenceState),
    /// Presence could not be read; fail toward persisted-only.
    PresenceUnavailable,
    PushTimedOut,
    Unreachable,
    /// The row is already past `sent` (e.g. a duplicate of a delivered send).
    AlreadyDelivered,
}

/// What the router did with a stored message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Pushed live and acknowledged; the row is now `delivered`.
    LiveDelivered,
    /// Left as persisted-only.
    Persisted(PersistReason),
}

/// Routes stored messages to live connections when the recipient is online.
pub struct DeliveryRouter<S, P, T, N> {
    log: Arc<S>,
    presence: Arc<P>,
    live: Arc<T>,
    notifier: Arc<N>,
    config: RouterConfig,
}

impl<S, P, T, N> DeliveryRouter<S, P, T, N>
where
    S: MessageLog,
    P: PresenceDirectory,
    T: LivePush,
    N: PushNotifier,
{
    pub fn new(
        log: Arc<S>,
        presence: Arc<P>,
        live: Arc<T>,
        notifier: Arc<N>,
        config: RouterConfig,
    ) -> Self {
        Self {
            log,
            presence,
            live,
            notifier,
            config,
        }
    }

    /// Route one stored message. Never fails: every failure degrades to
    /// persisted-only, which the message already is.
    pub async fn route(&self, message: &Message) -> RouteOutcome {
        if message.status != MessageStatus::Sent {
            return RouteOutcome::Persisted(PersistReason::AlreadyDelivered);
        }

        let record = match self.presence.get(&message.recipient_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    recipient = %message.recipient_id,
                    error = %e,
                    "presence unavailable, degrading to persisted-only"
                );
                self.notifier.notify(message).await;
                return RouteOutcome::Persisted(PersistReason::PresenceUnavailable);
            }
        };

        let record = match record {
            Some(record) if record.state.accepts_live_push() => record,
            other => {
                let state = other.map(|r| r.state).unwrap_or(PresenceState::Offline);
                tracing::debug!(
                    recipient = %message.recipient_id,
                    sequence = message.sequence,
                    %state,
                    "recipient not online, persisted-only"
                );
                self.notifier.notify(message).await;
                return RouteOutcome::Persisted(PersistReason::NotOnline(state));
            }
        };

        let outcome = match tokio::time::timeout(
            self.config.ack_timeout,
            self.live.push(&record, message),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => PushOutcome::TimedOut,
        };

        match outcome {
            PushOutcome::Acked => {
                if let Err(e) = self
                    .log
                    .update_status(&[message.message_id], MessageStatus::Delivered)
                    .await
                {
                    // Row stays `sent`; the next drain redelivers it.
                    tracing::warn!(
                        message_id = message.message_id,
                        error = %e,
                        "failed to mark live-pushed message delivered"
                    );
                }
                RouteOutcome::LiveDelivered
            }
            PushOutcome::TimedOut => {
                tracing::debug!(
                    recipient = %message.recipient_id,
                    sequence = message.sequence,
                    "live push timed out, persisted-only"
                );
                self.notifier.notify(message).await;
                RouteOutcome::Persisted(PersistReason::PushTimedOut)
            }
            PushOutcome::Unreachable => {
                self.notifier.notify(message).await;
                RouteOutcome::Persisted(PersistReason::Unreachable)
            }
        }
    }
}
