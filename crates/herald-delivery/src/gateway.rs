//! Ingestion Gateway.
//!
//! Validates an inbound send, appends it idempotently and forwards the
//! stored row to the [`DeliveryRouter`]. A detected duplicate is routed
//! exactly like a fresh insert and acknowledged with the original
//! receipt. Store failures always surface to the caller.

use std::sync::Arc;
use std::time::Duration;

use herald_presence::PresenceDirectory;
use herald_types::{AppendReceipt, NewMessage, MAX_ID_LEN};

use crate::push::{LivePush, PushNotifier};
use crate::router::{DeliveryRouter, RouteOutcome};
use crate::{DeliveryError, MessageLog, Result};

/// Default upper bound on message content, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 4000;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub max_content_chars: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }
}

/// Explicit bounded retry of one logical send.
///
/// Every attempt reuses the caller's `client_message_id`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Acknowledgment returned to the sender once the append is durable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendAck {
    pub receipt: AppendReceipt,
    /// The send matched an existing row.
    pub duplicate: bool,
    /// What the router did after the append. Informational only; the send
    /// is confirmed regardless.
    pub route: RouteOutcome,
}

pub struct IngestionGateway<S, P, T, N> {
    log: Arc<S>,
    router: Arc<DeliveryRouter<S, P, T, N>>,
    config: GatewayConfig,
}

impl<S, P, T, N> IngestionGateway<S, P, T, N>
where
    S: MessageLog,
    P: PresenceDirectory,
    T: LivePush,
    N: PushNotifier,
{
    pub fn new(
        log: Arc<S>,
        router: Arc<DeliveryRouter<S, P, T, N>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            log,
            router,
            config,
        }
    }

    pub fn router(&self) -> &Arc<DeliveryRouter<S, P, T, N>> {
        &self.router
    }

    /// Validate, append and route one send.
    pub async fn send(&self, new: &NewMessage) -> Result<SendAck> {
        self.validate(new)?;

        let outcome = match self.log.append(new).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = DeliveryError::from(e);
                tracing::warn!(
                    recipient = %new.recipient_id,
                    client_message_id = %new.client_message_id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "append failed"
                );
                return Err(err);
            }
        };

        let duplicate = outcome.is_duplicate();
        let message = outcome.into_message();
        let route = self.router.route(&message).await;

        tracing::debug!(
            recipient = %message.recipient_id,
            sequence = message.sequence,
            duplicate,
            ?route,
            "send accepted"
        );

        Ok(SendAck {
            receipt: message.receipt(),
            duplicate,
            route,
        })
    }

    /// [`send`](Self::send) with bounded retry on transient store failures.
    ///
    /// Non-retryable errors return immediately. After `max_attempts` the
    /// last transient error is returned.
    pub async fn send_with_retry(&self, new: &NewMessage, policy: &RetryPolicy) -> Result<SendAck> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send(new).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::debug!(
                        client_message_id = %new.client_message_id,
                        attempt,
                        "retrying send with the same idempotency key"
                    );
                    tokio::time::sleep(policy.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn validate(&self, new: &NewMessage) -> Result<()> {
        for (field, value) in [
            ("conversation_id", &new.conversation_id),
            ("client_message_id", &new.client_message_id),
            ("sender_id", &new.sender_id),
            ("recipient_id", &new.recipient_id),
        ] {
            if value.is_empty() {
                return Err(DeliveryError::Validation(format!("{field} is empty")));
            }
            if value.len() > MAX_ID_LEN {
                return Err(DeliveryError::Validation(format!(
                    "{field} exceeds {MAX_ID_LEN} bytes"
                )));
            }
        }
        if new.content.is_empty() {
            return Err(DeliveryError::Validation("content is empty".into()));
        }
        let chars = new.content.chars().count();
        if chars > self.config.max_content_chars {
            return Err(DeliveryError::Validation(format!(
                "content has {chars} characters, max {}",
                self.config.max_content_chars
            )));
        }
        Ok(())
    }
}
